// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

use nsaas_proto::ProtoError;

/// The possible errors that can arise from using the control socket, binding
/// a channel, or driving the datapath (spec.md §7).
#[derive(Debug)]
pub enum NsaasError {
    /// The controller rejected registration, a channel request, or a flow
    /// request. Carries the `status` it returned.
    Rejected(i32),

    /// The controller's reply didn't match what was expected: wrong
    /// `msg_type`, wrong `msg_id`, or a record of the wrong size.
    Protocol(&'static str),

    /// The controller spoke a message format this client doesn't
    /// understand. `init()` closes the socket rather than continuing.
    VersionMismatch,

    /// Errors while interpreting the mapped channel's wire layout.
    Wire(ProtoError),

    /// A control request timed out waiting for a completion queue entry.
    Timeout,

    /// No free buffers were available to satisfy a `send`.
    OutOfBuffers,

    /// Errors returned by I/O failures (socket, mmap, memfd).
    Io(std::io::Error),
}

impl std::error::Error for NsaasError {}

impl fmt::Display for NsaasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(status) => write!(f, "controller rejected request (status {status})"),
            Self::Protocol(what) => write!(f, "protocol error: {what}"),
            Self::VersionMismatch => write!(f, "controller protocol version mismatch"),
            Self::Wire(e) => write!(f, "wire format error: {e}"),
            Self::Timeout => write!(f, "timed out waiting for controller"),
            Self::OutOfBuffers => write!(f, "buffer pool exhausted"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl From<std::io::Error> for NsaasError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtoError> for NsaasError {
    fn from(e: ProtoError) -> Self {
        Self::Wire(e)
    }
}

impl From<nix::Error> for NsaasError {
    fn from(e: nix::Error) -> Self {
        Self::Io(std::io::Error::from(e))
    }
}
