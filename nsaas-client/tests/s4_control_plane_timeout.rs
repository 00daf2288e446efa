// SPDX-License-Identifier: BSD-3-Clause

//! S4 (spec.md §8): the controller accepts a control-queue submission but
//! never posts a completion. `listen()` exhausts its bounded poll and
//! returns a timeout rather than blocking forever.

mod common;

use std::time::{Duration, Instant};

use nsaas_client::{init, listen, Config, NsaasError};

#[test]
fn control_plane_never_completing_returns_timeout() {
    let path = common::socket_path("s4");
    common::spawn_controller(&path, nsaas_stub_controller::Behavior { never_complete: true, ..Default::default() });

    let config = Config {
        controller_socket: path,
        ..Default::default()
    };

    let client = init(&config).expect("init");
    let handle = client.attach(&config).expect("attach");

    let started = Instant::now();
    let err = listen(&handle, "10.0.0.1", 9000).unwrap_err();
    assert!(matches!(err, NsaasError::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(8));
}
