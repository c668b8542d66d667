//! Typed identifiers shared by both sides of the scene bridge
//!
//! Entity and component ids are opaque numbers handed out by the id-mapping
//! layer of the host. They are wrapped in distinct types so an entity can never
//! be passed where a component or a timestamp is expected.

use core::fmt;

/// An entity handle as seen by a scene
///
/// Lower 16 bits: entity number, upper 16 bits: version. Scenes reuse entity
/// numbers and bump the version when they do.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// Number of bits used by the entity number
    pub const NUMBER_BITS: u32 = 16;

    const NUMBER_MASK: u32 = (1 << Self::NUMBER_BITS) - 1;

    /// Create an entity id from its number and version
    #[inline]
    pub const fn new(number: u16, version: u16) -> Self {
        Self((version as u32) << Self::NUMBER_BITS | number as u32)
    }

    /// Wrap a raw id as it travels on the wire
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id as it travels on the wire
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// The reusable entity number
    #[inline]
    pub const fn number(&self) -> u16 {
        (self.0 & Self::NUMBER_MASK) as u16
    }

    /// The version of the entity number
    #[inline]
    pub const fn version(&self) -> u16 {
        (self.0 >> Self::NUMBER_BITS) as u16
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.number(), self.version())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.number(), self.version())
    }
}

/// A component type handle
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ComponentId(u32);

impl ComponentId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical clock of a single `(entity, component)` slot
///
/// Only comparable with timestamps of the same slot; there is no global order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Timestamp(u32);

impl Timestamp {
    /// The timestamp of a slot nobody has written to
    pub const ZERO: Timestamp = Timestamp(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// The timestamp a local write has to carry to win over this one
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_packing() {
        let id = EntityId::new(512, 3);
        assert_eq!(id.number(), 512);
        assert_eq!(id.version(), 3);
        assert_eq!(id.raw(), (3 << 16) | 512);
        assert_eq!(EntityId::from_raw(id.raw()), id);
    }

    #[test]
    fn test_entity_versions_are_distinct() {
        let a = EntityId::new(7, 0);
        let b = EntityId::new(7, 1);
        assert_ne!(a, b);
        assert_eq!(a.number(), b.number());
    }

    #[test]
    fn test_timestamp_next_saturates() {
        assert_eq!(Timestamp::ZERO.next(), Timestamp::new(1));
        assert_eq!(Timestamp::new(u32::MAX).next(), Timestamp::new(u32::MAX));
        assert!(Timestamp::new(5) > Timestamp::new(4));
    }
}
