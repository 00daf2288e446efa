// SPDX-License-Identifier: BSD-3-Clause

//! Fixed-size wire records exchanged over the controller socket and the
//! control SQ/CQ. Unlike the XDR records in the teacher's RPC stack, these
//! are plain `#[repr(C)]` structs: there is no variable-length data here, so
//! there is nothing for an IDL compiler to generate. Encoding is a straight
//! byte copy.

use std::mem::{size_of, MaybeUninit};

use crate::error::ProtoError;

/// # Safety
/// `T` must be `#[repr(C)]`, contain no padding bytes, and contain no
/// pointers or references (plain old data only).
unsafe fn record_to_bytes<T, const SIZE: usize>(value: &T) -> [u8; SIZE] {
    debug_assert_eq!(size_of::<T>(), SIZE);
    let mut out = [0u8; SIZE];
    unsafe {
        std::ptr::copy_nonoverlapping(value as *const T as *const u8, out.as_mut_ptr(), SIZE);
    }
    out
}

/// # Safety
/// Same requirements as [`record_to_bytes`].
unsafe fn record_from_bytes<T, const SIZE: usize>(buf: &[u8]) -> Result<T, ProtoError> {
    debug_assert_eq!(size_of::<T>(), SIZE);
    if buf.len() != SIZE {
        return Err(ProtoError::ShortRecord {
            expected: SIZE,
            got: buf.len(),
        });
    }
    let mut out = MaybeUninit::<T>::uninit();
    unsafe {
        std::ptr::copy_nonoverlapping(buf.as_ptr(), out.as_mut_ptr() as *mut u8, SIZE);
        Ok(out.assume_init())
    }
}

/// Message type for [`ControlMessage::msg_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    ReqRegister = 1,
    ReqChannel = 2,
    Response = 3,
}

impl MsgType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::ReqRegister),
            2 => Some(Self::ReqChannel),
            3 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Response status carried in [`ControlMessage::status`] and [`CtrlEntry::status`].
pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_ERROR: i32 = -1;

/// Default descriptor-ring size and buffer count requested by `attach()`
/// when the caller hasn't overridden them via [`crate::Config`]-style knobs
/// upstream (kept here as the wire-level defaults the original C source
/// hardcodes into the `REQ_CHANNEL` it builds).
pub const DEFAULT_SQ_SIZE: u32 = 128;
pub const DEFAULT_BUF_COUNT: u32 = 1024;

/// Upper bound on a single message's total length (spec.md §4.4).
pub const MSG_MAX_LEN: usize = 1 << 20;

/// `channel_info` payload of a `REQ_CHANNEL` control message.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelInfo {
    pub channel_uuid: [u8; 16],
    pub sq_size: u32,
    pub buf_count: u32,
}

/// The fixed-size record exchanged over the controller socket (spec.md §3.2).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlMessage {
    pub msg_type: u32,
    pub msg_id: u32,
    pub status: i32,
    pub app_uuid: [u8; 16],
    pub channel_info: ChannelInfo,
}

pub const CONTROL_MESSAGE_SIZE: usize = size_of::<ControlMessage>();

impl ControlMessage {
    pub fn to_bytes(&self) -> [u8; CONTROL_MESSAGE_SIZE] {
        // Safety: `ControlMessage` is `#[repr(C)]` plain data with fields
        // ordered so that every member stays 4-byte aligned and no padding
        // is inserted (`u32`/`i32`/`[u8;16]`/`ChannelInfo`, all multiples of 4).
        unsafe { record_to_bytes(self) }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtoError> {
        // Safety: see `to_bytes`.
        unsafe { record_from_bytes(buf) }
    }
}

/// Control-queue opcode (spec.md §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CtrlOpcode {
    CreateFlow = 1,
    Listen = 2,
}

impl CtrlOpcode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::CreateFlow),
            2 => Some(Self::Listen),
            _ => None,
        }
    }
}

/// A network 4-tuple, host byte order throughout (spec.md §3.6).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flow {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
}

/// A listener's local address, the payload for a `LISTEN` entry. Ports are
/// stored widened to `u32` so that the union below has a clean 4-byte
/// alignment with no tail padding; the public API still takes/returns `u16`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerTuple {
    pub local_ip: u32,
    pub local_port: u32,
}

/// One union payload per opcode, exactly as spec.md §3.5 describes: which
/// field is valid is determined entirely by the entry's `opcode`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union CtrlPayload {
    pub flow: Flow,
    pub listener: ListenerTuple,
}

impl Default for CtrlPayload {
    fn default() -> Self {
        CtrlPayload {
            flow: Flow::default(),
        }
    }
}

/// A control submission/completion queue entry (spec.md §3.5). Lives inside
/// the mapped channel's SQ/CQ rings, not on the controller socket.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CtrlEntry {
    pub id: u32,
    pub opcode: u32,
    pub status: i32,
    pub payload: CtrlPayload,
}

impl Default for CtrlEntry {
    fn default() -> Self {
        CtrlEntry {
            id: 0,
            opcode: 0,
            status: 0,
            payload: CtrlPayload::default(),
        }
    }
}

impl CtrlEntry {
    pub fn new_create_flow(id: u32, flow: Flow) -> Self {
        CtrlEntry {
            id,
            opcode: CtrlOpcode::CreateFlow as u32,
            status: 0,
            payload: CtrlPayload { flow },
        }
    }

    pub fn new_listen(id: u32, listener: ListenerTuple) -> Self {
        CtrlEntry {
            id,
            opcode: CtrlOpcode::Listen as u32,
            status: 0,
            payload: CtrlPayload { listener },
        }
    }

    /// Reads the `flow` member of the payload.
    ///
    /// Caller must only call this when `opcode == CREATE_FLOW`; the union
    /// has no other way to tell which member was last written.
    pub fn flow(&self) -> Flow {
        // Safety: caller's responsibility per the opcode contract above.
        unsafe { self.payload.flow }
    }

    /// Reads the `listener` member of the payload. Same caveat as [`Self::flow`].
    pub fn listener(&self) -> ListenerTuple {
        // Safety: caller's responsibility per the opcode contract above.
        unsafe { self.payload.listener }
    }
}

impl std::fmt::Debug for CtrlEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrlEntry")
            .field("id", &self.id)
            .field("opcode", &self.opcode)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_message_round_trips() {
        let msg = ControlMessage {
            msg_type: MsgType::ReqChannel as u32,
            msg_id: 42,
            status: STATUS_SUCCESS,
            app_uuid: [7; 16],
            channel_info: ChannelInfo {
                channel_uuid: [9; 16],
                sq_size: DEFAULT_SQ_SIZE,
                buf_count: DEFAULT_BUF_COUNT,
            },
        };

        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), CONTROL_MESSAGE_SIZE);

        let decoded = ControlMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.msg_id, 42);
        assert_eq!(decoded.app_uuid, [7; 16]);
        assert_eq!(decoded.channel_info.sq_size, DEFAULT_SQ_SIZE);
    }

    #[test]
    fn control_message_rejects_short_buffer() {
        let err = ControlMessage::from_bytes(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, ProtoError::ShortRecord { .. }));
    }

    #[test]
    fn ctrl_entry_union_reads_back_the_written_variant() {
        let flow = Flow {
            src_ip: 1,
            dst_ip: 2,
            src_port: 3,
            dst_port: 4,
        };
        let entry = CtrlEntry::new_create_flow(5, flow);
        assert_eq!(entry.id, 5);
        assert_eq!(entry.flow(), flow);
    }
}
