// SPDX-License-Identifier: BSD-3-Clause

//! Invariant 5 (spec.md §8): calling `init()` twice in the same process
//! produces exactly one registration — the second call must not touch the
//! controller at all.

mod common;

use std::sync::atomic::Ordering;

use nsaas_client::{init, Config};

#[test]
fn second_init_call_does_not_register_again() {
    let path = common::socket_path("idempotent-init");
    let register_count =
        common::spawn_controller(&path, nsaas_stub_controller::Behavior::default());

    let config = Config {
        controller_socket: path,
        ..Default::default()
    };

    let first = init(&config).expect("first init");
    let second = init(&config).expect("second init");

    assert_eq!(first.app_uuid(), second.app_uuid());
    assert_eq!(register_count.load(Ordering::Relaxed), 1);
}
