// SPDX-License-Identifier: BSD-3-Clause

//! Flow-plane client: submits `CREATE_FLOW`/`LISTEN` entries onto the
//! control SQ and polls the CQ for the matching completion (spec.md §4.3).
//!
//! The poll loop mirrors the teacher's connect-retry-loop test harness
//! (`rpc_protocol/tests/rpcbind.rs`): a fixed number of attempts with a
//! sleep between them, rather than blocking indefinitely.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use log::debug;
use nsaas_proto::wire::{CtrlEntry, Flow, ListenerTuple, STATUS_SUCCESS};

use crate::bind::ChannelHandle;
use crate::error::NsaasError;

const POLL_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

const INADDR_ANY: u32 = 0;
const INADDR_NONE: u32 = u32::MAX;

static NEXT_REQ_ID: AtomicU32 = AtomicU32::new(1);

fn next_req_id() -> u32 {
    NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed)
}

fn parse_ip(s: &str) -> Result<u32, NsaasError> {
    let addr: Ipv4Addr = s
        .parse()
        .map_err(|_| NsaasError::Protocol("invalid IP address"))?;
    let ip = u32::from_be_bytes(addr.octets());
    if ip == INADDR_NONE {
        return Err(NsaasError::Protocol("IP address must not be INADDR_NONE"));
    }
    Ok(ip)
}

/// Submits a `CREATE_FLOW` entry for a connection from `src_ip` to
/// `dst_ip:dst_port` and waits for its completion, returning the
/// controller-assigned flow tuple on success.
pub fn connect(
    handle: &ChannelHandle,
    src_ip: &str,
    dst_ip: &str,
    dst_port: u16,
) -> Result<Flow, NsaasError> {
    let src = parse_ip(src_ip)?;
    let dst = parse_ip(dst_ip)?;
    if dst == INADDR_ANY {
        return Err(NsaasError::Protocol("connect: destination must not be INADDR_ANY"));
    }

    let flow = Flow {
        src_ip: src,
        dst_ip: dst,
        src_port: 0,
        dst_port,
    };

    let id = next_req_id();
    let entry = CtrlEntry::new_create_flow(id, flow);
    submit_and_wait(handle, entry).map(|completed| completed.flow())
}

/// Submits a `LISTEN` entry for `local_ip:local_port` and waits for its
/// completion, returning the bound listener tuple on success.
pub fn listen(handle: &ChannelHandle, local_ip: &str, local_port: u16) -> Result<ListenerTuple, NsaasError> {
    let local = parse_ip(local_ip)?;
    let listener = ListenerTuple {
        local_ip: local,
        local_port: local_port as u32,
    };

    let id = next_req_id();
    let entry = CtrlEntry::new_listen(id, listener);
    submit_and_wait(handle, entry).map(|completed| completed.listener())
}

fn submit_and_wait(handle: &ChannelHandle, entry: CtrlEntry) -> Result<CtrlEntry, NsaasError> {
    let channel = handle.channel();
    let sq = channel.sq();

    if !sq.push(entry) {
        return Err(NsaasError::Protocol("control submission queue full"));
    }
    debug!("submitted control entry {}", entry.id);

    let cq = channel.cq();
    for attempt in 0..POLL_ATTEMPTS {
        if let Some(completed) = cq.pop() {
            if completed.id != entry.id {
                // Not ours: another thread's request landed first in this
                // single-consumer CQ. A real multi-flow client would keep a
                // small reorder buffer; out of scope here since NSaaS
                // channels are bound to one application thread at a time.
                return Err(NsaasError::Protocol("unexpected completion id"));
            }
            if completed.status != STATUS_SUCCESS {
                return Err(NsaasError::Rejected(completed.status));
            }
            return Ok(completed);
        }
        if attempt + 1 < POLL_ATTEMPTS {
            thread::sleep(POLL_INTERVAL);
        }
    }

    Err(NsaasError::Timeout)
}
