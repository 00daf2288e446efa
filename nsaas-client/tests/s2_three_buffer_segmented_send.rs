// SPDX-License-Identifier: BSD-3-Clause

//! S2 (spec.md §8): a message too large for one pool buffer is fragmented
//! across a chain and reassembled on receive, end to end through a real
//! attached channel rather than a hand-built one.

mod common;

use std::time::Duration;

use nsaas_client::{connect, init, recv, send, Config, SendOptions};

#[test]
fn three_buffer_segmented_send_reassembles_on_receive() {
    let path = common::socket_path("s2");
    common::spawn_controller(&path, nsaas_stub_controller::Behavior { loopback: true, ..Default::default() });

    let config = Config {
        controller_socket: path,
        buf_count: 8,
        ..Default::default()
    };

    let client = init(&config).expect("init");
    let handle = client.attach(&config).expect("attach");
    let flow = connect(&handle, "10.0.0.1", "10.0.0.2", 9000).expect("connect");

    let data: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
    send(&handle, flow, &data, SendOptions::default()).expect("send");

    let mut buf = vec![0u8; 4096];
    let mut delivered = None;
    for _ in 0..50 {
        if let Some(result) = recv(&handle, &mut buf).expect("recv") {
            delivered = Some(result);
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let (_, n) = delivered.expect("message was never delivered");
    assert_eq!(n, data.len());
    assert_eq!(&buf[..n], &data[..]);
}
