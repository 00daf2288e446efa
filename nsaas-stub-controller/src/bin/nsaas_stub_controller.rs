// SPDX-License-Identifier: BSD-3-Clause

use clap::Parser;

use nsaas_stub_controller::{Behavior, StubController};

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "/var/run/nsaas/controller.sock")]
    socket: String,

    /// Echo every app-ring buffer straight back onto the stack ring.
    #[arg(long)]
    loopback: bool,

    /// Reply to every request with an unrecognized msg_type.
    #[arg(long)]
    protocol_mismatch: bool,

    /// Accept control-queue submissions but never post a completion.
    #[arg(long)]
    never_complete: bool,
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let args = Cli::parse();
    let behavior = Behavior {
        protocol_mismatch: args.protocol_mismatch,
        never_complete: args.never_complete,
        loopback: args.loopback,
    };

    let controller = StubController::bind(&args.socket, behavior)?;
    controller.run();
    Ok(())
}
