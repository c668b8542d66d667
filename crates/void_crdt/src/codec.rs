//! Wire codec - flat binary framing of a message sequence
//!
//! # Format (version 1)
//!
//! Messages are concatenated with no separators. Each one is a fixed-width
//! little-endian header immediately followed by its payload:
//!
//! ```text
//! offset  size  field
//! 0       1     message type tag (see CrdtMessageType)
//! 1       4     entity id
//! 5       4     component id (0 for DeleteEntity)
//! 9       4     timestamp
//! 13      4     payload length N
//! 17      N     payload bytes
//! ```
//!
//! Deletes always carry a zero-length payload. Decoding a buffer is
//! all-or-nothing: a single bad frame rejects the whole buffer.

use serde::{Deserialize, Serialize};
use void_core::{ComponentId, EntityId, Timestamp};
use void_memory::BufferPool;

use crate::error::WireError;
use crate::message::{CrdtMessage, CrdtMessageType, ProcessedMessage};

/// Version of the framing described in the module docs
pub const WIRE_FORMAT_VERSION: u32 = 1;

/// Size of an encoded header in bytes
pub const HEADER_LEN: usize = 17;

/// Fixed-width header, encoded with bincode's fixint little-endian layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct WireHeader {
    tag: u8,
    entity: u32,
    component: u32,
    timestamp: u32,
    payload_len: u32,
}

impl WireHeader {
    fn for_message(message: &CrdtMessage) -> Result<Self, WireError> {
        let payload_len = message.payload().len();
        let payload_len = u32::try_from(payload_len).map_err(|_| WireError::PayloadTooLarge { len: payload_len })?;

        Ok(Self {
            tag: message.message_type().tag(),
            entity: message.entity().raw(),
            component: message.component().map_or(0, |c| c.raw()),
            timestamp: message.timestamp().raw(),
            payload_len,
        })
    }

    fn read(bytes: &[u8], offset: usize) -> Result<Self, WireError> {
        let remaining = bytes.len() - offset;
        if remaining < HEADER_LEN {
            return Err(WireError::TruncatedHeader { offset, remaining });
        }

        Ok(bincode::deserialize(&bytes[offset..offset + HEADER_LEN])?)
    }
}

/// A frame that passed validation
struct Frame {
    kind: CrdtMessageType,
    header: WireHeader,
    payload_offset: usize,
}

/// Total encoded size of `messages`
pub fn encoded_len(messages: &[ProcessedMessage]) -> usize {
    messages.iter().map(ProcessedMessage::wire_len).sum()
}

/// Append a single message to `out`
pub fn encode_message(message: &CrdtMessage, out: &mut Vec<u8>) -> Result<(), WireError> {
    let header = WireHeader::for_message(message)?;
    bincode::serialize_into(&mut *out, &header)?;
    out.extend_from_slice(message.payload());
    Ok(())
}

/// Append every message to `out` in order, returns the number of bytes written
pub fn encode_into(messages: &[ProcessedMessage], out: &mut Vec<u8>) -> Result<usize, WireError> {
    let start = out.len();
    out.reserve(encoded_len(messages));

    for processed in messages {
        if let Err(err) = encode_message(processed.message(), out) {
            out.truncate(start);
            return Err(err);
        }
    }

    Ok(out.len() - start)
}

/// Decode `bytes` into a new vector
pub fn decode(bytes: &[u8], pool: &BufferPool) -> Result<Vec<CrdtMessage>, WireError> {
    let mut messages = Vec::new();
    decode_into(bytes, pool, &mut messages)?;
    Ok(messages)
}

/// Decode `bytes` and append the messages to `out`
///
/// Payloads are copied into buffers from `pool`, so `bytes` can be reused as
/// soon as this returns. On error `out` is left exactly as it was.
pub fn decode_into(bytes: &[u8], pool: &BufferPool, out: &mut Vec<CrdtMessage>) -> Result<usize, WireError> {
    let count = validate(bytes)?;
    let start = out.len();
    out.reserve(count);

    let mut offset = 0;
    while offset < bytes.len() {
        let frame = match read_frame(bytes, offset) {
            Ok(frame) => frame,
            Err(err) => {
                out.truncate(start);
                return Err(err);
            }
        };

        let payload_len = frame.header.payload_len as usize;
        let payload = match pool.copy_slice(bytes, frame.payload_offset, payload_len) {
            Some(payload) => payload,
            None => {
                out.truncate(start);
                return Err(WireError::PayloadOverrun {
                    offset,
                    declared: payload_len,
                    remaining: bytes.len() - frame.payload_offset,
                });
            }
        };

        let entity = EntityId::from_raw(frame.header.entity);
        let component = ComponentId::new(frame.header.component);
        let timestamp = Timestamp::new(frame.header.timestamp);

        out.push(match frame.kind {
            CrdtMessageType::PutComponent => CrdtMessage::put(entity, component, timestamp, payload),
            CrdtMessageType::AppendComponent => CrdtMessage::append(entity, component, timestamp, payload),
            CrdtMessageType::DeleteComponent => CrdtMessage::delete_component(entity, component, timestamp),
            CrdtMessageType::DeleteEntity => CrdtMessage::delete_entity(entity, timestamp),
        });

        offset = frame.payload_offset + payload_len;
    }

    Ok(count)
}

/// Walk the framing without touching the pool, returns the number of messages
pub fn validate(bytes: &[u8]) -> Result<usize, WireError> {
    let mut offset = 0;
    let mut count = 0;

    while offset < bytes.len() {
        let frame = read_frame(bytes, offset)?;
        offset = frame.payload_offset + frame.header.payload_len as usize;
        count += 1;
    }

    Ok(count)
}

fn read_frame(bytes: &[u8], offset: usize) -> Result<Frame, WireError> {
    let header = WireHeader::read(bytes, offset)?;

    let kind = CrdtMessageType::from_tag(header.tag).ok_or(WireError::UnknownMessageType {
        offset,
        tag: header.tag,
    })?;

    let payload_len = header.payload_len as usize;
    if !kind.has_payload() && payload_len != 0 {
        return Err(WireError::UnexpectedPayload {
            offset,
            kind,
            len: payload_len,
        });
    }

    let payload_offset = offset + HEADER_LEN;
    let remaining = bytes.len() - payload_offset;
    if payload_len > remaining {
        return Err(WireError::PayloadOverrun {
            offset,
            declared: payload_len,
            remaining,
        });
    }

    Ok(Frame {
        kind,
        header,
        payload_offset,
    })
}
