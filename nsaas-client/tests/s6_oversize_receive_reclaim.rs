// SPDX-License-Identifier: BSD-3-Clause

//! S6 (spec.md §8): a delivered message larger than the caller's receive
//! segments fails the receive but still reclaims every buffer in the
//! chain — a delivered message is never stranded on the free list.

mod common;

use std::time::Duration;

use nsaas_client::{connect, init, recvmsg, send, Config, NsaasError, SendOptions};
use nsaas_proto::buffer;

#[test]
fn oversize_delivered_message_reclaims_its_whole_chain() {
    let path = common::socket_path("s6");
    common::spawn_controller(&path, nsaas_stub_controller::Behavior { loopback: true, ..Default::default() });

    let config = Config {
        controller_socket: path,
        buf_count: 16,
        ..Default::default()
    };

    let client = init(&config).expect("init");
    let handle = client.attach(&config).expect("attach");
    let flow = connect(&handle, "10.0.0.1", "10.0.0.2", 9000).expect("connect");

    let data = vec![0x5Au8; 4000];
    send(&handle, flow, &data, SendOptions::default()).expect("send");

    let mut small = [0u8; 64];
    let mut segments: Vec<&mut [u8]> = vec![&mut small];

    let mut result = None;
    for _ in 0..50 {
        match recvmsg(&handle, &mut segments) {
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            other => {
                result = Some(other);
                break;
            }
        }
    }

    let err = result
        .expect("message was never delivered")
        .unwrap_err();
    assert!(matches!(err, NsaasError::Protocol(_)));

    let channel = handle.channel();
    let slots = buffer::buf_alloc_bulk(channel, channel.buf_count());
    assert_eq!(
        slots.len(),
        channel.buf_count() as usize,
        "oversize receive must return every chain buffer to the free list"
    );
}
