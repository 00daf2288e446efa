// SPDX-License-Identifier: BSD-3-Clause

//! S1 (spec.md §8): register, attach a channel, open a flow, send one
//! message small enough for a single pool buffer, and receive it back
//! through a loopback-behaving stub controller.

mod common;

use std::time::Duration;

use nsaas_client::{connect, init, recv, send, Config, SendOptions};

#[test]
fn single_buffer_send_recv_round_trip() {
    let path = common::socket_path("s1");
    common::spawn_controller(&path, nsaas_stub_controller::Behavior { loopback: true, ..Default::default() });

    let config = Config {
        controller_socket: path,
        ..Default::default()
    };

    let client = init(&config).expect("init");
    let handle = client.attach(&config).expect("attach");
    let flow = connect(&handle, "10.0.0.1", "10.0.0.2", 9000).expect("connect");

    send(&handle, flow, b"hello", SendOptions::default()).expect("send");

    let mut buf = [0u8; 64];
    let mut delivered = None;
    for _ in 0..50 {
        if let Some(result) = recv(&handle, &mut buf).expect("recv") {
            delivered = Some(result);
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let (recv_flow, n) = delivered.expect("message was never delivered");
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(recv_flow, flow);
}
