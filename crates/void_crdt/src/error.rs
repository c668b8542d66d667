//! Error types for the CRDT crate

use thiserror::Error;

use crate::message::CrdtMessageType;

/// Errors from encoding or decoding the wire format
///
/// Offsets point at the start of the offending frame.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Truncated header at offset {offset}: {remaining} bytes left")]
    TruncatedHeader { offset: usize, remaining: usize },

    #[error("Frame at offset {offset} declares {declared} payload bytes but only {remaining} remain")]
    PayloadOverrun {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    #[error("Unknown message type {tag} at offset {offset}")]
    UnknownMessageType { offset: usize, tag: u8 },

    #[error("{kind} at offset {offset} carries {len} payload bytes, expected none")]
    UnexpectedPayload {
        offset: usize,
        kind: CrdtMessageType,
        len: usize,
    },

    #[error("Payload of {len} bytes does not fit the length field")]
    PayloadTooLarge { len: usize },

    #[error("Header encoding error: {0}")]
    Header(#[from] bincode::Error),
}

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;
