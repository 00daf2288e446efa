// SPDX-License-Identifier: BSD-3-Clause

//! Library-wide configuration, read from the environment so that both
//! application code and the integration tests can point the client at a
//! non-default controller socket without a compile-time constant.

use nsaas_proto::wire::{DEFAULT_BUF_COUNT, DEFAULT_SQ_SIZE};

pub const DEFAULT_CONTROLLER_SOCKET: &str = "/var/run/nsaas/controller.sock";

/// Knobs for `init()`/`attach()`. Construct with [`Config::from_env`] in
/// application code, or build one directly in tests.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the controller's listening Unix domain socket (spec.md §6.1).
    pub controller_socket: String,

    /// Control SQ/CQ capacity requested in `REQ_CHANNEL`.
    pub sq_size: u32,

    /// Pool buffer count requested in `REQ_CHANNEL`.
    pub buf_count: u32,

    /// Request `MAP_HUGETLB` when mapping the channel the controller hands
    /// back (spec.md §4.2). Silently falls back to ordinary pages if the
    /// kernel has none reserved.
    pub hugepages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            controller_socket: DEFAULT_CONTROLLER_SOCKET.to_string(),
            sq_size: DEFAULT_SQ_SIZE,
            buf_count: DEFAULT_BUF_COUNT,
            hugepages: false,
        }
    }
}

impl Config {
    /// Reads overrides from the environment, falling back to the defaults
    /// above for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("NSAAS_CONTROLLER_SOCKET") {
            config.controller_socket = path;
        }
        if let Ok(v) = std::env::var("NSAAS_SQ_SIZE") {
            if let Ok(parsed) = v.parse() {
                config.sq_size = parsed;
            }
        }
        if let Ok(v) = std::env::var("NSAAS_BUF_COUNT") {
            if let Ok(parsed) = v.parse() {
                config.buf_count = parsed;
            }
        }
        if let Ok(v) = std::env::var("NSAAS_HUGEPAGES") {
            config.hugepages = matches!(v.as_str(), "1" | "true" | "yes");
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_wire_defaults() {
        let config = Config::default();
        assert_eq!(config.sq_size, DEFAULT_SQ_SIZE);
        assert_eq!(config.buf_count, DEFAULT_BUF_COUNT);
        assert_eq!(config.controller_socket, DEFAULT_CONTROLLER_SOCKET);
    }
}
