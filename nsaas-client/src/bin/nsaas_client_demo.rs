// SPDX-License-Identifier: BSD-3-Clause

//! Minimal command-line client: register, attach a channel, connect a
//! flow, send one message, and print whatever comes back within a short
//! poll window. Exists to exercise the library by hand against either a
//! real controller or `nsaas-stub-controller --loopback`.

use std::time::Duration;

use clap::Parser;
use log::info;

use nsaas_client::{connect, init, recv, send, Config, SendOptions};

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "/var/run/nsaas/controller.sock")]
    socket: String,

    #[arg(long, default_value = "10.0.0.1")]
    src_ip: String,

    #[arg(long, default_value = "10.0.0.2")]
    dst_ip: String,

    #[arg(long, default_value_t = 9000)]
    port: u16,

    #[arg(long, default_value = "hello from nsaas-client-demo")]
    message: String,

    #[arg(long)]
    hugepages: bool,

    #[arg(long)]
    notify_delivery: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Cli::parse();

    let config = Config {
        controller_socket: args.socket,
        hugepages: args.hugepages,
        ..Config::default()
    };

    let client = init(&config)?;
    info!("registered as {}", client.app_uuid());

    let handle = client.attach(&config)?;
    let flow = connect(&handle, &args.src_ip, &args.dst_ip, args.port)?;
    info!("flow created: {flow:?}");

    let send_options = SendOptions {
        notify_delivery: args.notify_delivery,
    };
    send(&handle, flow, args.message.as_bytes(), send_options)?;
    info!("sent {} bytes", args.message.len());

    let mut buf = [0u8; 4096];
    for _ in 0..25 {
        if let Some((from, n)) = recv(&handle, &mut buf)? {
            println!("received {n} bytes from {from:?}: {:?}", String::from_utf8_lossy(&buf[..n]));
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("no reply within the poll window");
    Ok(())
}
