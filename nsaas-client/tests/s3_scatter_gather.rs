// SPDX-License-Identifier: BSD-3-Clause

//! S3 (spec.md §8): a message assembled from multiple scatter segments on
//! send is gathered into a differently-shaped set of segments on receive —
//! the buffer-chain loop and the segment loop advance independently.

mod common;

use std::time::Duration;

use nsaas_client::{connect, init, recvmsg, sendmsg, Config, SendOptions};

#[test]
fn scatter_gather_send_into_differently_shaped_gather_recv() {
    let path = common::socket_path("s3");
    common::spawn_controller(&path, nsaas_stub_controller::Behavior { loopback: true, ..Default::default() });

    let config = Config {
        controller_socket: path,
        buf_count: 8,
        ..Default::default()
    };

    let client = init(&config).expect("init");
    let handle = client.attach(&config).expect("attach");
    let flow = connect(&handle, "10.0.0.1", "10.0.0.2", 9000).expect("connect");

    let seg_a = vec![0xAAu8; 600];
    let seg_b = vec![0xBBu8; 600];
    sendmsg(&handle, flow, &[&seg_a, &seg_b], SendOptions::default()).expect("sendmsg");

    let mut s1 = [0u8; 400];
    let mut s2 = [0u8; 400];
    let mut s3 = [0u8; 400];
    let mut segments: Vec<&mut [u8]> = vec![&mut s1, &mut s2, &mut s3];

    let mut delivered = None;
    for _ in 0..50 {
        if let Some(result) = recvmsg(&handle, &mut segments).expect("recvmsg") {
            delivered = Some(result);
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let (_, n) = delivered.expect("message was never delivered");
    assert_eq!(n, 1200);

    let mut expected = seg_a.clone();
    expected.extend_from_slice(&seg_b);
    let mut received = Vec::new();
    received.extend_from_slice(&s1);
    received.extend_from_slice(&s2);
    received.extend_from_slice(&s3);
    assert_eq!(received, expected);
}
