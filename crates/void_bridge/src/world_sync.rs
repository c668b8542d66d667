//! World synchronisation - collapse a tick's effects before touching the host
//!
//! A single incoming batch can add, modify and delete the same component
//! several times. Replaying every step on the host world is wasted work, so
//! effects are merged per (entity, component) and only the net result is
//! applied when the batch is flushed. Net results follow the first and last
//! effect seen for a key:
//!
//! | first \ last | Added    | Modified | Deleted  |
//! |--------------|----------|----------|----------|
//! | Added        | Added    | Added    | nothing  |
//! | Modified     | Modified | Modified | Deleted  |
//! | Deleted      | Modified | Modified | Deleted  |
//!
//! Entity deletes discard everything pending for that entity. Appends are not
//! merged; every new entry is forwarded.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use void_crdt::{ComponentId, CrdtMessageType, EntityId, ReconciliationEffect, ReconciliationStore};

/// Host-side world the bridge keeps in step with the store
pub trait HostWorld {
    /// Create or overwrite a component
    fn apply_component(&mut self, entity: EntityId, component: ComponentId, payload: &[u8]);

    fn remove_component(&mut self, entity: EntityId, component: ComponentId);

    /// Remove an entity and all of its components
    fn remove_entity(&mut self, entity: EntityId);

    /// Deliver a new entry of an append-only component
    fn append_component(&mut self, entity: EntityId, component: ComponentId, payload: &[u8]) {
        self.apply_component(entity, component, payload);
    }
}

/// A world that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWorld;

impl HostWorld for NullWorld {
    fn apply_component(&mut self, _entity: EntityId, _component: ComponentId, _payload: &[u8]) {}

    fn remove_component(&mut self, _entity: EntityId, _component: ComponentId) {}

    fn remove_entity(&mut self, _entity: EntityId) {}
}

/// First and last effect recorded for a key
#[derive(Debug, Clone, Copy)]
struct PendingEffect {
    first: ReconciliationEffect,
    last: ReconciliationEffect,
}

impl PendingEffect {
    fn net(self) -> ReconciliationEffect {
        use ReconciliationEffect::*;
        match (self.first, self.last) {
            (ComponentAdded, ComponentDeleted) => NoChanges,
            (ComponentAdded, _) => ComponentAdded,
            (_, ComponentDeleted) => ComponentDeleted,
            _ => ComponentModified,
        }
    }
}

/// What a flush did to the host world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub applied: usize,
    pub removed: usize,
    pub entities_removed: usize,
    pub appended: usize,
}

/// Buffer of effects waiting to reach the host world
///
/// An effect leaves the buffer only once the world has taken it. If the world
/// panics mid-flush, whatever it did not take stays pending and goes out with
/// the next flush.
#[derive(Debug, Default)]
pub struct WorldSyncBuffer {
    pending: HashMap<(EntityId, ComponentId), PendingEffect>,
    /// Keys of `pending` in first-seen order
    order: Vec<(EntityId, ComponentId)>,
    /// New append entries per key not yet forwarded
    appends: HashMap<(EntityId, ComponentId), usize>,
    append_order: Vec<(EntityId, ComponentId)>,
    deleted_entities: VecDeque<EntityId>,
    /// Key being handed to the world when the last flush stopped
    in_flight: Option<(EntityId, ComponentId)>,
}

impl WorldSyncBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the effect of one reconciled message
    pub fn record(
        &mut self,
        kind: CrdtMessageType,
        entity: EntityId,
        component: Option<ComponentId>,
        effect: ReconciliationEffect,
    ) {
        match effect {
            ReconciliationEffect::NoChanges => {}
            ReconciliationEffect::EntityDeleted => self.record_entity_delete(entity),
            _ => {
                let Some(component) = component else {
                    return;
                };
                let key = (entity, component);

                if kind == CrdtMessageType::AppendComponent {
                    match self.appends.entry(key) {
                        Entry::Occupied(mut count) => *count.get_mut() += 1,
                        Entry::Vacant(slot) => {
                            slot.insert(1);
                            self.append_order.push(key);
                        }
                    }
                    return;
                }

                match self.pending.entry(key) {
                    Entry::Occupied(mut pending) => pending.get_mut().last = effect,
                    Entry::Vacant(slot) => {
                        slot.insert(PendingEffect { first: effect, last: effect });
                        self.order.push(key);
                    }
                }
            }
        }
    }

    fn record_entity_delete(&mut self, entity: EntityId) {
        self.pending.retain(|(e, _), _| *e != entity);
        self.order.retain(|(e, _)| *e != entity);
        self.appends.retain(|(e, _), _| *e != entity);
        self.append_order.retain(|(e, _)| *e != entity);

        if !self.deleted_entities.contains(&entity) {
            self.deleted_entities.push_back(entity);
        }
    }

    /// Nothing waiting to be flushed
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.appends.is_empty() && self.deleted_entities.is_empty()
    }

    /// Apply the net effects to the world, reading payloads from the store
    ///
    /// Entity removals go first. Whatever outlived the delete in the store is
    /// then restored: surviving components are re-applied and surviving append
    /// entries are forwarded again, since the world dropped them with the
    /// entity.
    pub fn flush<W: HostWorld + ?Sized>(&mut self, store: &ReconciliationStore, world: &mut W) -> SyncSummary {
        let mut summary = SyncSummary::default();

        // A key the world choked on last time goes to the back of the line
        if let Some(key) = self.in_flight.take() {
            rotate_to_back(&mut self.order, key);
            rotate_to_back(&mut self.append_order, key);
        }

        while let Some(&entity) = self.deleted_entities.front() {
            world.remove_entity(entity);
            summary.entities_removed += 1;

            for (component, stored) in store.components_of(entity) {
                if self.pending.contains_key(&(entity, component)) {
                    continue;
                }
                if let Some(payload) = stored.payload {
                    world.apply_component(entity, component, payload);
                    summary.applied += 1;
                }
            }

            for component in store.append_components_of(entity) {
                // Entries recorded after the delete are part of the survivors
                self.appends.remove(&(entity, component));
                for (_, payload) in store.append_log(entity, component) {
                    world.append_component(entity, component, payload);
                    summary.appended += 1;
                }
            }

            self.deleted_entities.pop_front();
        }

        for index in 0..self.order.len() {
            let key = self.order[index];
            let Some(pending) = self.pending.get(&key).copied() else {
                continue;
            };
            let (entity, component) = key;
            self.in_flight = Some(key);

            match pending.net() {
                ReconciliationEffect::ComponentAdded | ReconciliationEffect::ComponentModified => {
                    match store.try_get(entity, component).and_then(|stored| stored.payload) {
                        Some(payload) => {
                            world.apply_component(entity, component, payload);
                            summary.applied += 1;
                        }
                        None => log::warn!("No stored payload for {:?}/{:?} after an update", entity, component),
                    }
                }
                ReconciliationEffect::ComponentDeleted => {
                    world.remove_component(entity, component);
                    summary.removed += 1;
                }
                _ => {}
            }

            self.pending.remove(&key);
        }

        for index in 0..self.append_order.len() {
            let key = self.append_order[index];
            let Some(&added) = self.appends.get(&key) else {
                continue;
            };
            let (entity, component) = key;
            self.in_flight = Some(key);

            // Entries evicted before reaching the world are skipped; the
            // unforwarded ones are always the newest
            let len = store.append_len(entity, component);
            let skip = len - added.min(len);
            for (_, payload) in store.append_log(entity, component).skip(skip) {
                world.append_component(entity, component, payload);
                summary.appended += 1;
                if let Some(remaining) = self.appends.get_mut(&key) {
                    *remaining = remaining.saturating_sub(1);
                }
            }

            self.appends.remove(&key);
        }

        self.in_flight = None;
        self.order.clear();
        self.append_order.clear();
        summary
    }

    /// Drop everything pending without touching the world
    pub fn clear(&mut self) {
        self.pending.clear();
        self.order.clear();
        self.appends.clear();
        self.append_order.clear();
        self.deleted_entities.clear();
        self.in_flight = None;
    }
}

fn rotate_to_back(keys: &mut Vec<(EntityId, ComponentId)>, key: (EntityId, ComponentId)) {
    if let Some(position) = keys.iter().position(|k| *k == key) {
        let key = keys.remove(position);
        keys.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_crdt::{CrdtMessage, Timestamp};
    use void_memory::BufferPool;

    /// World that records every call
    #[derive(Debug, Default)]
    struct RecordingWorld {
        calls: Vec<String>,
        panic_on: Option<ComponentId>,
    }

    impl HostWorld for RecordingWorld {
        fn apply_component(&mut self, entity: EntityId, component: ComponentId, payload: &[u8]) {
            if self.panic_on == Some(component) {
                panic!("world rejected component {}", component.raw());
            }
            self.calls.push(format!(
                "apply {}/{} {}",
                entity.raw(),
                component.raw(),
                String::from_utf8_lossy(payload)
            ));
        }

        fn remove_component(&mut self, entity: EntityId, component: ComponentId) {
            self.calls.push(format!("remove {}/{}", entity.raw(), component.raw()));
        }

        fn remove_entity(&mut self, entity: EntityId) {
            self.calls.push(format!("remove entity {}", entity.raw()));
        }

        fn append_component(&mut self, entity: EntityId, component: ComponentId, payload: &[u8]) {
            self.calls.push(format!(
                "append {}/{} {}",
                entity.raw(),
                component.raw(),
                String::from_utf8_lossy(payload)
            ));
        }
    }

    struct Harness {
        pool: BufferPool,
        store: ReconciliationStore,
        sync: WorldSyncBuffer,
        world: RecordingWorld,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                pool: BufferPool::default(),
                store: ReconciliationStore::default(),
                sync: WorldSyncBuffer::new(),
                world: RecordingWorld::default(),
            }
        }

        fn feed(&mut self, message: CrdtMessage) {
            let kind = message.message_type();
            let entity = message.entity();
            let component = message.component();
            let reconciliation = self.store.reconcile(message);
            self.sync.record(kind, entity, component, reconciliation.effect);
        }

        fn put(&mut self, e: u16, c: u32, t: u32, payload: &[u8]) {
            let payload = self.pool.copy_from(payload);
            self.feed(CrdtMessage::put(EntityId::new(e, 0), ComponentId::new(c), Timestamp::new(t), payload));
        }

        fn delete(&mut self, e: u16, c: u32, t: u32) {
            self.feed(CrdtMessage::delete_component(EntityId::new(e, 0), ComponentId::new(c), Timestamp::new(t)));
        }

        fn append(&mut self, e: u16, c: u32, t: u32, payload: &[u8]) {
            let payload = self.pool.copy_from(payload);
            self.feed(CrdtMessage::append(EntityId::new(e, 0), ComponentId::new(c), Timestamp::new(t), payload));
        }

        fn flush(&mut self) -> SyncSummary {
            self.sync.flush(&self.store, &mut self.world)
        }
    }

    #[test]
    fn test_repeated_puts_apply_once() {
        let mut h = Harness::new();
        h.put(1, 1, 1, b"a");
        h.put(1, 1, 2, b"b");
        h.put(1, 1, 3, b"c");

        let summary = h.flush();
        assert_eq!(summary.applied, 1);
        assert_eq!(h.world.calls, vec!["apply 1/1 c"]);
        assert!(h.sync.is_empty());
    }

    #[test]
    fn test_added_then_deleted_is_invisible() {
        let mut h = Harness::new();
        h.put(1, 1, 1, b"a");
        h.delete(1, 1, 2);

        assert_eq!(h.flush(), SyncSummary::default());
        assert!(h.world.calls.is_empty());
    }

    #[test]
    fn test_existing_component_deleted_and_restored() {
        let mut h = Harness::new();
        h.put(1, 1, 1, b"a");
        h.flush();
        h.world.calls.clear();

        h.delete(1, 1, 2);
        h.put(1, 1, 3, b"back");
        h.flush();
        assert_eq!(h.world.calls, vec!["apply 1/1 back"]);

        h.world.calls.clear();
        h.put(1, 1, 4, b"x");
        h.delete(1, 1, 5);
        h.flush();
        assert_eq!(h.world.calls, vec!["remove 1/1"]);
    }

    #[test]
    fn test_rejected_messages_do_nothing() {
        let mut h = Harness::new();
        h.put(1, 1, 5, b"new");
        h.flush();
        h.world.calls.clear();

        h.put(1, 1, 4, b"old");
        h.put(1, 1, 5, b"tie");
        assert!(h.sync.is_empty());
        assert_eq!(h.flush(), SyncSummary::default());
    }

    #[test]
    fn test_entity_delete_discards_pending_and_restores_survivors() {
        let mut h = Harness::new();
        h.put(1, 1, 3, b"old");
        h.put(1, 2, 9, b"fresh");
        h.put(2, 1, 1, b"other");
        h.feed(CrdtMessage::delete_entity(EntityId::new(1, 0), Timestamp::new(5)));

        let summary = h.flush();
        assert_eq!(summary.entities_removed, 1);
        let entity_one = EntityId::new(1, 0).raw();
        let entity_two = EntityId::new(2, 0).raw();
        assert_eq!(
            h.world.calls,
            vec![
                format!("remove entity {}", entity_one),
                format!("apply {}/2 fresh", entity_one),
                format!("apply {}/1 other", entity_two),
            ]
        );
    }

    #[test]
    fn test_put_after_entity_delete_in_same_batch() {
        let mut h = Harness::new();
        h.feed(CrdtMessage::delete_entity(EntityId::new(1, 0), Timestamp::new(5)));
        h.put(1, 1, 7, b"later");

        h.flush();
        let entity = EntityId::new(1, 0).raw();
        assert_eq!(
            h.world.calls,
            vec![format!("remove entity {}", entity), format!("apply {}/1 later", entity)]
        );
    }

    #[test]
    fn test_appends_forward_each_new_entry() {
        let mut h = Harness::new();
        h.append(1, 3, 1, b"hi");
        h.flush();
        h.world.calls.clear();

        h.append(1, 3, 2, b"there");
        h.append(1, 3, 3, b"friend");

        let summary = h.flush();
        assert_eq!(summary.appended, 2);
        assert_eq!(h.world.calls, vec!["append 1/3 there", "append 1/3 friend"]);
    }

    #[test]
    fn test_clear_drops_pending() {
        let mut h = Harness::new();
        h.put(1, 1, 1, b"a");
        h.sync.clear();

        assert!(h.sync.is_empty());
        assert_eq!(h.flush(), SyncSummary::default());
    }

    #[test]
    fn test_append_surviving_entity_delete_is_forwarded() {
        let mut h = Harness::new();
        let entity = EntityId::new(1, 0);
        h.append(1, 9, 9, b"fresh");
        h.feed(CrdtMessage::delete_entity(entity, Timestamp::new(5)));
        h.append(1, 9, 7, b"after");

        let summary = h.flush();
        assert_eq!(summary.appended, 2);
        assert_eq!(
            h.world.calls,
            vec![
                format!("remove entity {}", entity.raw()),
                format!("append {}/9 fresh", entity.raw()),
                format!("append {}/9 after", entity.raw()),
            ]
        );
        assert!(h.sync.is_empty());
    }

    #[test]
    fn test_effects_survive_a_panicking_world() {
        let mut h = Harness::new();
        h.world.panic_on = Some(ComponentId::new(13));
        h.put(1, 13, 1, b"bad");
        h.put(1, 2, 1, b"good");

        let flushed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| h.flush()));
        assert!(flushed.is_err());
        assert!(!h.sync.is_empty());

        h.world.panic_on = None;
        h.flush();
        assert_eq!(h.world.calls, vec!["apply 1/2 good", "apply 1/13 bad"]);
        assert!(h.sync.is_empty());
    }

    #[test]
    fn test_failing_key_does_not_block_others() {
        let mut h = Harness::new();
        h.world.panic_on = Some(ComponentId::new(13));
        h.put(1, 13, 1, b"bad");
        h.put(1, 2, 1, b"good");

        for _ in 0..2 {
            let flushed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| h.flush()));
            assert!(flushed.is_err());
        }

        assert_eq!(h.world.calls, vec!["apply 1/2 good"]);
        assert!(!h.sync.is_empty());
    }
}
