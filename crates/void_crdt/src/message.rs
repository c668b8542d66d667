//! CRDT messages - timestamped state mutations exchanged with a scene
//!
//! A message is created once per mutation, owns its payload until it is
//! consumed, and is never modified afterwards.

use void_core::{ComponentId, EntityId, Timestamp};
use void_memory::OwnedBuffer;

use crate::codec::HEADER_LEN;

/// Message discriminant as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CrdtMessageType {
    PutComponent = 1,
    DeleteComponent = 2,
    DeleteEntity = 3,
    AppendComponent = 4,
}

impl CrdtMessageType {
    /// Wire tag
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::PutComponent),
            2 => Some(Self::DeleteComponent),
            3 => Some(Self::DeleteEntity),
            4 => Some(Self::AppendComponent),
            _ => None,
        }
    }

    /// Whether messages of this type carry a payload
    #[inline]
    pub const fn has_payload(self) -> bool {
        matches!(self, Self::PutComponent | Self::AppendComponent)
    }
}

impl std::fmt::Display for CrdtMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PutComponent => "PutComponent",
            Self::DeleteComponent => "DeleteComponent",
            Self::DeleteEntity => "DeleteEntity",
            Self::AppendComponent => "AppendComponent",
        };
        f.write_str(name)
    }
}

/// A single state mutation
#[derive(Debug, PartialEq, Eq)]
pub enum CrdtMessage {
    /// Create or replace a component (last write wins)
    PutComponent {
        entity: EntityId,
        component: ComponentId,
        timestamp: Timestamp,
        payload: OwnedBuffer,
    },
    /// Remove a component (last write wins)
    DeleteComponent {
        entity: EntityId,
        component: ComponentId,
        timestamp: Timestamp,
    },
    /// Remove every component of an entity written no later than `timestamp`
    DeleteEntity {
        entity: EntityId,
        timestamp: Timestamp,
    },
    /// Add an entry to the ordered log of a component, never collapsed
    AppendComponent {
        entity: EntityId,
        component: ComponentId,
        timestamp: Timestamp,
        payload: OwnedBuffer,
    },
}

impl CrdtMessage {
    pub fn put(entity: EntityId, component: ComponentId, timestamp: Timestamp, payload: OwnedBuffer) -> Self {
        Self::PutComponent { entity, component, timestamp, payload }
    }

    pub fn delete_component(entity: EntityId, component: ComponentId, timestamp: Timestamp) -> Self {
        Self::DeleteComponent { entity, component, timestamp }
    }

    pub fn delete_entity(entity: EntityId, timestamp: Timestamp) -> Self {
        Self::DeleteEntity { entity, timestamp }
    }

    pub fn append(entity: EntityId, component: ComponentId, timestamp: Timestamp, payload: OwnedBuffer) -> Self {
        Self::AppendComponent { entity, component, timestamp, payload }
    }

    /// Get the message type
    pub fn message_type(&self) -> CrdtMessageType {
        match self {
            Self::PutComponent { .. } => CrdtMessageType::PutComponent,
            Self::DeleteComponent { .. } => CrdtMessageType::DeleteComponent,
            Self::DeleteEntity { .. } => CrdtMessageType::DeleteEntity,
            Self::AppendComponent { .. } => CrdtMessageType::AppendComponent,
        }
    }

    /// Get the target entity
    pub fn entity(&self) -> EntityId {
        match self {
            Self::PutComponent { entity, .. }
            | Self::DeleteComponent { entity, .. }
            | Self::DeleteEntity { entity, .. }
            | Self::AppendComponent { entity, .. } => *entity,
        }
    }

    /// Get the target component, `None` for entity deletes
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            Self::PutComponent { component, .. }
            | Self::DeleteComponent { component, .. }
            | Self::AppendComponent { component, .. } => Some(*component),
            Self::DeleteEntity { .. } => None,
        }
    }

    /// Get the timestamp
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::PutComponent { timestamp, .. }
            | Self::DeleteComponent { timestamp, .. }
            | Self::DeleteEntity { timestamp, .. }
            | Self::AppendComponent { timestamp, .. } => *timestamp,
        }
    }

    /// Get the payload bytes, empty for deletes
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::PutComponent { payload, .. } | Self::AppendComponent { payload, .. } => payload.as_slice(),
            Self::DeleteComponent { .. } | Self::DeleteEntity { .. } => &[],
        }
    }

    /// Consume the message, keeping only its payload
    pub fn into_payload(self) -> OwnedBuffer {
        match self {
            Self::PutComponent { payload, .. } | Self::AppendComponent { payload, .. } => payload,
            Self::DeleteComponent { .. } | Self::DeleteEntity { .. } => OwnedBuffer::empty(),
        }
    }

    /// Number of bytes this message takes once encoded
    #[inline]
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload().len()
    }
}

/// A message together with its precomputed wire length
///
/// Lets a batch size its output buffer without walking the payloads again.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessedMessage {
    message: CrdtMessage,
    wire_len: usize,
}

impl ProcessedMessage {
    pub fn new(message: CrdtMessage) -> Self {
        let wire_len = message.wire_len();
        Self { message, wire_len }
    }

    #[inline]
    pub fn message(&self) -> &CrdtMessage {
        &self.message
    }

    #[inline]
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    pub fn into_message(self) -> CrdtMessage {
        self.message
    }
}

impl From<CrdtMessage> for ProcessedMessage {
    fn from(message: CrdtMessage) -> Self {
        Self::new(message)
    }
}
