// SPDX-License-Identifier: BSD-3-Clause

//! Wire formats and shared-memory channel layout for NSaaS.
//!
//! This crate has no knowledge of sockets or `mmap` itself — it only knows
//! how to read and write the bytes once a region of memory or a socket
//! buffer is handed to it. `nsaas-client` and `nsaas-stub-controller` own
//! the actual file descriptors.

pub mod buffer;
pub mod channel;
pub mod error;
pub mod wire;

pub use buffer::{BufFlags, BufferHeader, BufferView, BUF_MAGIC, INVALID_SLOT};
pub use channel::{Channel, ChannelHeader, ChannelLayout, RawRing, RingMeta, CHANNEL_MAGIC};
pub use error::ProtoError;
pub use wire::{
    ChannelInfo, ControlMessage, CtrlEntry, CtrlOpcode, CtrlPayload, Flow, ListenerTuple, MsgType,
    CONTROL_MESSAGE_SIZE, DEFAULT_BUF_COUNT, DEFAULT_SQ_SIZE, MSG_MAX_LEN, STATUS_ERROR,
    STATUS_SUCCESS,
};
