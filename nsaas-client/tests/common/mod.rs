// SPDX-License-Identifier: BSD-3-Clause

//! Shared harness for the end-to-end scenario tests: spin up a
//! `nsaas-stub-controller` on its own thread and poll its socket the way
//! `rpc_protocol/tests/rpcbind.rs`'s `wait_for_server` does.

use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nsaas_stub_controller::{Behavior, StubController};
use tempfile::TempDir;

static TEMP_DIR: OnceLock<TempDir> = OnceLock::new();

/// A socket path under a process-local temp directory, so that tests in
/// different processes (one per integration test file, per the default
/// Cargo test harness) never collide even when run in parallel.
pub fn socket_path(name: &str) -> String {
    let dir = TEMP_DIR.get_or_init(|| {
        tempfile::Builder::new()
            .prefix("nsaas-test-")
            .tempdir()
            .expect("create temp dir for test socket")
    });
    dir.path().join(format!("{name}.sock")).to_string_lossy().into_owned()
}

/// Binds and runs a stub controller on a background thread, waiting until
/// its socket is actually accepting connections before returning a handle
/// to its registration counter.
pub fn spawn_controller(path: &str, behavior: Behavior) -> Arc<AtomicUsize> {
    let controller = StubController::bind(path, behavior).expect("bind stub controller");
    let register_count = controller.register_count();
    std::thread::spawn(move || controller.run());
    wait_for_socket(path);
    register_count
}

fn wait_for_socket(path: &str) {
    let mut attempts = 50;
    while attempts > 0 {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
        attempts -= 1;
    }
    panic!("timed out waiting for stub controller at {path}");
}
