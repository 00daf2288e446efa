// SPDX-License-Identifier: BSD-3-Clause

//! Message send/receive over the bound channel's buffer pool and data
//! rings (spec.md §4.4, §4.5).
//!
//! `sendmsg` copies the caller's scatter segments into one or more pool
//! buffers, chains them with `SYN`/`FIN`/`SG` flags the way spec.md §3.4
//! describes, and pushes the head slot onto the app ring. `recvmsg` pops a
//! slot off the stack ring and gathers its chain back into the caller's
//! segments, reclaiming the whole chain even when the caller's segments
//! are too small to hold it.

use std::sync::atomic::Ordering;

use nsaas_proto::buffer::{self, BufFlags, BufferHeader};
use nsaas_proto::channel::Channel;
use nsaas_proto::wire::{Flow, MSG_MAX_LEN};

use crate::bind::ChannelHandle;
use crate::error::NsaasError;

/// How many freed slots `recvmsg` batches up before flushing them back to
/// the pool (spec.md §4.5's `release_batch`).
const RELEASE_BATCH: usize = 16;

/// Per-message send options, carried the way a `msghdr`'s `flags` field
/// would be (spec.md §3.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Ask the stack to post an explicit delivery notification rather than
    /// deliver best-effort (spec.md §3.4's `NOTIFY_DELIVERY`, §4.4 step 7).
    pub notify_delivery: bool,
}

/// Sends `data` as one message over `flow`. A convenience wrapper around
/// [`sendmsg`] for the common single-segment case.
pub fn send(
    handle: &ChannelHandle,
    flow: Flow,
    data: &[u8],
    options: SendOptions,
) -> Result<(), NsaasError> {
    sendmsg(handle, flow, &[data], options)
}

/// Sends a message assembled by concatenating `segments`, fragmenting
/// across as many pool buffers as needed.
pub fn sendmsg(
    handle: &ChannelHandle,
    flow: Flow,
    segments: &[&[u8]],
    options: SendOptions,
) -> Result<(), NsaasError> {
    let channel = handle.channel();
    let msg_size: usize = segments.iter().map(|s| s.len()).sum();

    if msg_size == 0 {
        return Err(NsaasError::Protocol("message must not be empty"));
    }
    if msg_size > MSG_MAX_LEN {
        return Err(NsaasError::Protocol("message exceeds MSG_MAX_LEN"));
    }

    let buf_mss = channel.buf_mss();
    let needed = msg_size.div_ceil(buf_mss) as u32;

    let slots = buffer::buf_alloc_bulk(channel, needed);
    if slots.len() < needed as usize {
        buffer::buf_free_bulk(channel, &slots)?;
        return Err(NsaasError::OutOfBuffers);
    }

    let copied = fill_chain(channel, &slots, segments)?;
    assert_eq!(copied, msg_size, "short copy into buffer chain: integrity violation");

    link_and_flag_chain(channel, &slots, flow, msg_size as u32, options);

    if !channel.app_ring().push(slots[0]) {
        // Open question in spec.md §9, resolved here: a failed enqueue must
        // not leak the buffers it already filled.
        buffer::buf_free_bulk(channel, &slots)?;
        return Err(NsaasError::Protocol("app ring full, message not sent"));
    }

    Ok(())
}

/// Sends each of `msgs` in turn, stopping at the first failure. Returns the
/// count of messages successfully enqueued.
pub fn sendmmsg(handle: &ChannelHandle, msgs: &[(Flow, &[u8], SendOptions)]) -> usize {
    let mut sent = 0;
    for (flow, data, options) in msgs {
        if send(handle, *flow, data, *options).is_err() {
            break;
        }
        sent += 1;
    }
    sent
}

/// Receives the next delivered message into `buf`. Returns `Ok(None)` if no
/// message has been delivered yet.
pub fn recv(handle: &ChannelHandle, buf: &mut [u8]) -> Result<Option<(Flow, usize)>, NsaasError> {
    let mut segments = [buf];
    recvmsg(handle, &mut segments)
}

/// Gathers the next delivered message into `segments` in order. Fails (and
/// reclaims the whole chain) if the delivered message is larger than the
/// combined capacity of `segments`.
pub fn recvmsg(
    handle: &ChannelHandle,
    segments: &mut [&mut [u8]],
) -> Result<Option<(Flow, usize)>, NsaasError> {
    let channel = handle.channel();
    let Some(head_slot) = channel.stack_ring().pop() else {
        return Ok(None);
    };

    let flow = header(channel, head_slot).flow;

    let mut release_batch = Vec::with_capacity(RELEASE_BATCH);
    let mut cur_slot = head_slot;
    let mut buf_ofs = 0usize;
    let mut seg_idx = 0usize;
    let mut seg_ofs = 0usize;
    let mut total = 0usize;
    let mut overflow = false;

    loop {
        if seg_idx >= segments.len() {
            overflow = true;
        }

        if overflow {
            reclaim_one(channel, cur_slot, &mut release_batch)?;
            match advance_or_stop(channel, cur_slot)? {
                Some(next) => {
                    cur_slot = next;
                    buf_ofs = 0;
                    continue;
                }
                None => break,
            }
        }

        if segments[seg_idx].is_empty() {
            seg_idx += 1;
            continue;
        }

        let view = buffer::buffer_view(channel, cur_slot)?;
        let buf_remaining = view.data_len() - buf_ofs;
        if buf_remaining == 0 {
            drop(view);
            reclaim_one(channel, cur_slot, &mut release_batch)?;
            match advance_or_stop(channel, cur_slot)? {
                Some(next) => {
                    cur_slot = next;
                    buf_ofs = 0;
                    continue;
                }
                None => break,
            }
        }

        let seg_remaining = segments[seg_idx].len() - seg_ofs;
        let take = buf_remaining.min(seg_remaining);
        segments[seg_idx][seg_ofs..seg_ofs + take]
            .copy_from_slice(&view.as_slice()[buf_ofs..buf_ofs + take]);
        drop(view);

        buf_ofs += take;
        seg_ofs += take;
        total += take;

        if seg_ofs == segments[seg_idx].len() {
            seg_idx += 1;
            seg_ofs = 0;
        }
    }

    if !release_batch.is_empty() {
        buffer::buf_free_bulk(channel, &release_batch)?;
    }

    if overflow {
        return Err(NsaasError::Protocol(
            "receive buffer too small for delivered message",
        ));
    }

    Ok(Some((flow, total)))
}

fn reclaim_one(channel: &Channel, slot: u32, batch: &mut Vec<u32>) -> Result<(), NsaasError> {
    batch.push(slot);
    if batch.len() == RELEASE_BATCH {
        buffer::buf_free_bulk(channel, batch)?;
        batch.clear();
    }
    Ok(())
}

/// Returns the next slot in the chain, or `None` if `slot` was the tail
/// (`FIN` set or no valid `next`).
fn advance_or_stop(channel: &Channel, slot: u32) -> Result<Option<u32>, NsaasError> {
    let view = buffer::buffer_view(channel, slot)?;
    let flags = view.flags();
    let next = header(channel, slot).next.load(Ordering::Acquire);
    if flags.contains(BufFlags::FIN) || next == buffer::INVALID_SLOT {
        Ok(None)
    } else {
        Ok(Some(next))
    }
}

/// Copies `segments` into `slots` in order, advancing to the next slot
/// whenever the current one's tailroom is exhausted. Returns the total
/// number of bytes copied.
fn fill_chain(channel: &Channel, slots: &[u32], segments: &[&[u8]]) -> Result<usize, NsaasError> {
    let mut slot_idx = 0;
    let mut view = buffer::buffer_view(channel, slots[slot_idx])?;
    let mut total = 0usize;

    for segment in segments {
        let mut remaining = *segment;
        while !remaining.is_empty() {
            if view.tailroom() == 0 {
                slot_idx += 1;
                view = buffer::buffer_view(channel, slots[slot_idx])?;
            }
            let take = view.tailroom().min(remaining.len());
            let ok = view.append(&remaining[..take]);
            assert!(ok, "buffer append overflow: integrity violation");
            remaining = &remaining[take..];
            total += take;
        }
    }

    Ok(total)
}

/// Sets `SYN`/`FIN`/`SG` and links `next` across the chain, and writes
/// `last`/`msg_len`/`flow` on the head buffer only (spec.md §3.4's chain
/// invariant). `NOTIFY_DELIVERY` is OR'd into the head buffer's flags only,
/// same as `last`/`msg_len`/`flow` (spec.md §4.4 step 7).
fn link_and_flag_chain(
    channel: &Channel,
    slots: &[u32],
    flow: Flow,
    msg_size: u32,
    options: SendOptions,
) {
    let last_slot = *slots.last().unwrap();

    for (i, &slot) in slots.iter().enumerate() {
        let mut flags = BufFlags::empty();
        if i == 0 {
            flags |= BufFlags::SYN;
            if options.notify_delivery {
                flags |= BufFlags::NOTIFY_DELIVERY;
            }
        }
        let is_last = i + 1 == slots.len();
        if is_last {
            flags |= BufFlags::FIN;
        } else {
            flags |= BufFlags::SG;
        }

        let next = if is_last {
            buffer::INVALID_SLOT
        } else {
            slots[i + 1]
        };

        let header = header_mut(channel, slot);
        header.flags = flags.bits();
        header.next.store(next, Ordering::Release);
        if i == 0 {
            header.last = last_slot;
            header.msg_len = msg_size;
            header.flow = flow;
        }
    }
}

fn header(channel: &Channel, slot: u32) -> &BufferHeader {
    unsafe { &*(raw_header_ptr(channel, slot) as *const BufferHeader) }
}

fn header_mut(channel: &Channel, slot: u32) -> &mut BufferHeader {
    unsafe { &mut *(raw_header_ptr(channel, slot) as *mut BufferHeader) }
}

fn raw_header_ptr(channel: &Channel, slot: u32) -> *mut u8 {
    let stride = channel.buf_stride();
    unsafe { channel.buf_pool_base().add(slot as usize * stride) }
}
