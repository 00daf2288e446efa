// SPDX-License-Identifier: BSD-3-Clause

//! S5 (spec.md §8): the controller replies to `REQ_REGISTER` with a
//! `msg_type` the client doesn't recognize. `init()` fails with
//! `VersionMismatch` rather than treating the reply as success.

mod common;

use nsaas_client::{init, Config, NsaasError};

#[test]
fn registering_against_a_mismatched_controller_fails() {
    let path = common::socket_path("s5");
    common::spawn_controller(&path, nsaas_stub_controller::Behavior { protocol_mismatch: true, ..Default::default() });

    let config = Config {
        controller_socket: path,
        ..Default::default()
    };

    let err = init(&config).unwrap_err();
    assert!(matches!(err, NsaasError::VersionMismatch));
}
