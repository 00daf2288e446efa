// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

/// Errors that can arise while interpreting the wire format or the mapped
/// channel layout. Kept separate from the client-facing error type so that
/// `nsaas-client` can fold these into its own taxonomy without this crate
/// depending on it.
#[derive(Debug)]
pub enum ProtoError {
    /// A fixed-size record was the wrong length for its type.
    ShortRecord { expected: usize, got: usize },

    /// The channel header's `magic` field did not match `CHANNEL_MAGIC`.
    BadChannelMagic,

    /// A buffer's `magic` field did not match `BUF_MAGIC`. The caller must
    /// treat this as unrecoverable (spec: memory corruption or peer
    /// misbehavior) rather than retry.
    BadBufferMagic { slot: u32 },

    /// A buffer chain referenced a `next`/`last` slot index outside
    /// `0..buf_count`.
    SlotOutOfRange { slot: u32 },
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortRecord { expected, got } => {
                write!(f, "expected a {expected}-byte record, got {got} bytes")
            }
            Self::BadChannelMagic => write!(f, "channel header magic mismatch"),
            Self::BadBufferMagic { slot } => write!(f, "buffer {slot} magic mismatch"),
            Self::SlotOutOfRange { slot } => write!(f, "slot index {slot} out of range"),
        }
    }
}

impl std::error::Error for ProtoError {}
