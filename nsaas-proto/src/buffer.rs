// SPDX-License-Identifier: BSD-3-Clause

//! The message buffer pool (spec.md §3.4, §6.2): a fixed array of
//! fixed-capacity buffers, each with a header carrying scatter-gather
//! chain links, handed back and forth between application and stack as
//! slot indices over the data rings in [`crate::channel`].
//!
//! Free buffers are tracked with a Treiber-stack style lock-free free list,
//! reusing `BufferHeader::next` as the free-list link: a buffer's `next` only
//! means "next buffer in this SG chain" while the buffer is allocated, and
//! "next free slot" while it sits on the free list, never both at once.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::channel::Channel;
use crate::error::ProtoError;
use crate::wire::Flow;

pub const BUF_MAGIC: u32 = 0x4e_53_42_75; // "NSBu"
pub const INVALID_SLOT: u32 = u32::MAX;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u32 {
        /// First buffer of a message (spec.md's `MSG_SYN` equivalent).
        const SYN = 1 << 0;
        /// Last buffer of a message.
        const FIN = 1 << 1;
        /// Part of a multi-buffer scatter-gather chain.
        const SG = 1 << 2;
        /// Stack should notify on delivery completion rather than best-effort.
        const NOTIFY_DELIVERY = 1 << 3;
    }
}

/// Header at the front of each pool buffer (spec.md §3.4).
#[repr(C)]
pub struct BufferHeader {
    pub magic: AtomicU32,
    pub flags: u32,
    pub next: AtomicU32,
    pub last: u32,
    pub msg_len: u32,
    pub flow: Flow,
    pub data_len: u32,
}

/// # Safety
/// `channel` must have just been created by [`Channel::create_in_place`]
/// and not yet published (its magic not yet set), so no other thread can
/// observe the pool while this runs.
pub unsafe fn init_free_list(channel: &Channel, buf_count: u32) {
    let stride = channel.buf_stride();
    for slot in 0..buf_count {
        let header = buffer_header_mut(channel, slot, stride);
        let next = if slot + 1 < buf_count { slot + 1 } else { INVALID_SLOT };
        unsafe {
            std::ptr::write(
                header,
                BufferHeader {
                    magic: AtomicU32::new(BUF_MAGIC),
                    flags: 0,
                    next: AtomicU32::new(next),
                    last: INVALID_SLOT,
                    msg_len: 0,
                    flow: Flow::default(),
                    data_len: 0,
                },
            );
        }
    }
    channel.free_head().store(0, Ordering::Release);
}

fn buffer_header_mut(channel: &Channel, slot: u32, stride: usize) -> *mut BufferHeader {
    unsafe { channel.buf_pool_base().add(slot as usize * stride) as *mut BufferHeader }
}

fn buffer_header(channel: &Channel, slot: u32, stride: usize) -> &BufferHeader {
    unsafe { &*(buffer_header_mut(channel, slot, stride) as *const BufferHeader) }
}

fn check_slot(channel: &Channel, slot: u32) -> Result<(), ProtoError> {
    if slot >= channel.buf_count() {
        return Err(ProtoError::SlotOutOfRange { slot });
    }
    Ok(())
}

/// A buffer's `magic` no longer matches `BUF_MAGIC`: the pool is corrupted,
/// either by a peer writing past a buffer's bounds or by memory
/// corruption. There is no recovery short of a fresh channel, so this
/// aborts the process immediately rather than handing the caller a
/// `Result` it could catch and keep running on top of (spec.md §7, §5).
fn fatal_bad_buffer_magic(slot: u32) -> ! {
    log::error!("buffer {slot} has a corrupted magic value, aborting");
    std::process::abort();
}

/// Pops up to `count` buffers off the free list. Returns fewer than `count`
/// if the pool is exhausted.
pub fn buf_alloc_bulk(channel: &Channel, count: u32) -> Vec<u32> {
    let stride = channel.buf_stride();
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        loop {
            let head = channel.free_head().load(Ordering::Acquire);
            if head == INVALID_SLOT {
                return out;
            }
            let header = buffer_header(channel, head, stride);
            let next = header.next.load(Ordering::Acquire);
            if channel
                .free_head()
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                out.push(head);
                break;
            }
        }
    }
    out
}

/// Pushes a set of buffer slots back onto the free list.
pub fn buf_free_bulk(channel: &Channel, slots: &[u32]) -> Result<(), ProtoError> {
    let stride = channel.buf_stride();
    for &slot in slots {
        check_slot(channel, slot)?;
        let header = buffer_header(channel, slot, stride);
        if header.magic.load(Ordering::Acquire) != BUF_MAGIC {
            fatal_bad_buffer_magic(slot);
        }
        loop {
            let head = channel.free_head().load(Ordering::Acquire);
            header.next.store(head, Ordering::Release);
            if channel
                .free_head()
                .compare_exchange_weak(head, slot, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }
    Ok(())
}

/// A handle to one allocated buffer's header and payload region, borrowed
/// from the pool for the duration of a send/recv call.
pub struct BufferView<'a> {
    header: &'a BufferHeader,
    data: *mut u8,
    capacity: usize,
}

pub fn buffer_view(channel: &Channel, slot: u32) -> Result<BufferView<'_>, ProtoError> {
    check_slot(channel, slot)?;
    let stride = channel.buf_stride();
    let header = buffer_header(channel, slot, stride);
    if header.magic.load(Ordering::Acquire) != BUF_MAGIC {
        fatal_bad_buffer_magic(slot);
    }
    let data = unsafe {
        (buffer_header_mut(channel, slot, stride) as *mut u8).add(std::mem::size_of::<BufferHeader>())
    };
    let capacity = stride - std::mem::size_of::<BufferHeader>();
    Ok(BufferView { header, data, capacity })
}

impl<'a> BufferView<'a> {
    pub fn data_len(&self) -> usize {
        self.header.data_len as usize
    }

    pub fn tailroom(&self) -> usize {
        self.capacity - self.data_len()
    }

    pub fn flags(&self) -> BufFlags {
        BufFlags::from_bits_truncate(self.header.flags)
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.data_len()) }
    }

    /// Appends `bytes` to the buffer's payload. Returns `false` without
    /// writing anything if `bytes` would not fit in the remaining tailroom.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.tailroom() {
            return false;
        }
        let ofs = self.data_len();
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.add(ofs), bytes.len());
        }
        let header = self.header as *const BufferHeader as *mut BufferHeader;
        unsafe {
            (*header).data_len += bytes.len() as u32;
        }
        true
    }

    pub fn data_ofs(&self) -> usize {
        std::mem::size_of::<BufferHeader>()
    }
}
