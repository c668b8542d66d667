//! Reconciliation store - last-write-wins state per (entity, component)
//!
//! Put and delete messages collapse into one slot per key, the slot with the
//! highest timestamp wins. Append messages are kept as an ordered log per key
//! and never collapse. Deleting an entity only removes what was written no
//! later than the delete, so a fresher write that raced it survives.
//!
//! The store is owned by one thread and is never shared.

use std::collections::{HashMap, VecDeque};

use void_core::{ComponentId, EntityId, Timestamp};
use void_memory::{BufferPool, OwnedBuffer};

use crate::message::{CrdtMessage, ProcessedMessage};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Entries kept per append log, the oldest is evicted beyond that
    pub max_append_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_append_entries: 100 }
    }
}

/// What reconciling a message did to the CRDT state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationResult {
    /// The message won and replaced the slot
    StateUpdated,
    /// The slot already holds a newer write
    StaleTimestamp,
    /// The slot holds a write with the same timestamp, ties never reapply
    TiedTimestamp,
    /// The entity was deleted at or after this timestamp
    EntityAlreadyDeleted,
    /// The entity delete was recorded
    EntityDeleted,
    /// The entry was added to an append log
    Appended,
}

/// What the host world has to do because of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconciliationEffect {
    ComponentAdded,
    ComponentModified,
    ComponentDeleted,
    EntityDeleted,
    NoChanges,
}

/// Outcome of [`ReconciliationStore::reconcile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub result: ReconciliationResult,
    pub effect: ReconciliationEffect,
}

impl Reconciliation {
    const fn new(result: ReconciliationResult, effect: ReconciliationEffect) -> Self {
        Self { result, effect }
    }

    /// Whether the message changed the stored state
    pub fn is_accepted(&self) -> bool {
        matches!(
            self.result,
            ReconciliationResult::StateUpdated | ReconciliationResult::EntityDeleted | ReconciliationResult::Appended
        )
    }
}

/// Counters kept by the store, conflicts are not errors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationStats {
    pub accepted: u64,
    pub stale: u64,
    pub tied: u64,
    pub after_entity_delete: u64,
    pub entity_deletes: u64,
    pub appends: u64,
    pub evicted_appends: u64,
}

/// A read-only view of a last-write-wins slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredComponent<'a> {
    pub timestamp: Timestamp,
    /// `None` when the latest write was a delete
    pub payload: Option<&'a [u8]>,
}

impl StoredComponent<'_> {
    pub fn is_deleted(&self) -> bool {
        self.payload.is_none()
    }
}

struct LwwEntry {
    timestamp: Timestamp,
    payload: Option<OwnedBuffer>,
}

struct AppendEntry {
    timestamp: Timestamp,
    payload: OwnedBuffer,
}

/// Per-scene CRDT state
pub struct ReconciliationStore {
    config: StoreConfig,
    lww: HashMap<EntityId, HashMap<ComponentId, LwwEntry>>,
    appends: HashMap<EntityId, HashMap<ComponentId, VecDeque<AppendEntry>>>,
    /// Highest delete timestamp seen per entity
    deleted_entities: HashMap<EntityId, Timestamp>,
    stats: ReconciliationStats,
}

impl ReconciliationStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            lww: HashMap::new(),
            appends: HashMap::new(),
            deleted_entities: HashMap::new(),
            stats: ReconciliationStats::default(),
        }
    }

    /// Apply a message, returns whether it was accepted
    pub fn apply(&mut self, message: CrdtMessage) -> bool {
        self.reconcile(message).is_accepted()
    }

    /// Apply a message and report what it changed
    ///
    /// The store takes the payload of accepted puts and appends; rejected
    /// payloads go back to their pool.
    pub fn reconcile(&mut self, message: CrdtMessage) -> Reconciliation {
        let reconciliation = match message {
            CrdtMessage::PutComponent { entity, component, timestamp, payload } => {
                self.update_lww(entity, component, timestamp, Some(payload))
            }
            CrdtMessage::DeleteComponent { entity, component, timestamp } => {
                self.update_lww(entity, component, timestamp, None)
            }
            CrdtMessage::DeleteEntity { entity, timestamp } => self.delete_entity(entity, timestamp),
            CrdtMessage::AppendComponent { entity, component, timestamp, payload } => {
                self.append(entity, component, timestamp, payload)
            }
        };

        match reconciliation.result {
            ReconciliationResult::StaleTimestamp => self.stats.stale += 1,
            ReconciliationResult::TiedTimestamp => self.stats.tied += 1,
            ReconciliationResult::EntityAlreadyDeleted => self.stats.after_entity_delete += 1,
            _ => self.stats.accepted += 1,
        }

        reconciliation
    }

    fn update_lww(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        timestamp: Timestamp,
        payload: Option<OwnedBuffer>,
    ) -> Reconciliation {
        if self.is_deleted_at(entity, timestamp) {
            log::trace!("Dropping {:?} {:?} at {}: entity deleted", entity, component, timestamp);
            return Reconciliation::new(ReconciliationResult::EntityAlreadyDeleted, ReconciliationEffect::NoChanges);
        }

        let is_put = payload.is_some();
        let slots = self.lww.entry(entity).or_default();

        let existed = match slots.get(&component) {
            Some(stored) if stored.timestamp > timestamp => {
                log::trace!("Dropping {:?} {:?} at {}: stored {}", entity, component, timestamp, stored.timestamp);
                return Reconciliation::new(ReconciliationResult::StaleTimestamp, ReconciliationEffect::NoChanges);
            }
            Some(stored) if stored.timestamp == timestamp => {
                return Reconciliation::new(ReconciliationResult::TiedTimestamp, ReconciliationEffect::NoChanges);
            }
            Some(stored) => stored.payload.is_some(),
            None => false,
        };

        // The replaced payload, if any, goes back to its pool here
        slots.insert(component, LwwEntry { timestamp, payload });

        let effect = match (existed, is_put) {
            (false, true) => ReconciliationEffect::ComponentAdded,
            (true, true) => ReconciliationEffect::ComponentModified,
            (true, false) => ReconciliationEffect::ComponentDeleted,
            (false, false) => ReconciliationEffect::NoChanges,
        };

        Reconciliation::new(ReconciliationResult::StateUpdated, effect)
    }

    fn delete_entity(&mut self, entity: EntityId, timestamp: Timestamp) -> Reconciliation {
        if self.is_deleted_at(entity, timestamp) {
            return Reconciliation::new(ReconciliationResult::EntityAlreadyDeleted, ReconciliationEffect::NoChanges);
        }

        self.deleted_entities.insert(entity, timestamp);
        self.stats.entity_deletes += 1;

        if let Some(slots) = self.lww.get_mut(&entity) {
            slots.retain(|_, stored| stored.timestamp > timestamp);
            if slots.is_empty() {
                self.lww.remove(&entity);
            }
        }

        if let Some(logs) = self.appends.get_mut(&entity) {
            for log in logs.values_mut() {
                log.retain(|entry| entry.timestamp > timestamp);
            }
            logs.retain(|_, log| !log.is_empty());
            if logs.is_empty() {
                self.appends.remove(&entity);
            }
        }

        Reconciliation::new(ReconciliationResult::EntityDeleted, ReconciliationEffect::EntityDeleted)
    }

    fn append(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        timestamp: Timestamp,
        payload: OwnedBuffer,
    ) -> Reconciliation {
        let log = self.appends.entry(entity).or_default().entry(component).or_default();

        if self.config.max_append_entries > 0 && log.len() >= self.config.max_append_entries {
            log.pop_front();
            self.stats.evicted_appends += 1;
        }

        log.push_back(AppendEntry { timestamp, payload });
        self.stats.appends += 1;

        Reconciliation::new(ReconciliationResult::Appended, ReconciliationEffect::ComponentAdded)
    }

    fn is_deleted_at(&self, entity: EntityId, timestamp: Timestamp) -> bool {
        self.deleted_entities
            .get(&entity)
            .is_some_and(|deleted| *deleted >= timestamp)
    }

    /// Read the last-write-wins slot of a key
    pub fn try_get(&self, entity: EntityId, component: ComponentId) -> Option<StoredComponent<'_>> {
        self.lww
            .get(&entity)
            .and_then(|slots| slots.get(&component))
            .map(|stored| StoredComponent {
                timestamp: stored.timestamp,
                payload: stored.payload.as_deref(),
            })
    }

    /// Iterate the last-write-wins slots of an entity
    pub fn components_of(&self, entity: EntityId) -> impl Iterator<Item = (ComponentId, StoredComponent<'_>)> {
        self.lww.get(&entity).into_iter().flat_map(|slots| {
            slots.iter().map(|(component, stored)| {
                (
                    *component,
                    StoredComponent {
                        timestamp: stored.timestamp,
                        payload: stored.payload.as_deref(),
                    },
                )
            })
        })
    }

    /// Iterate an append log in receipt order
    pub fn append_log(&self, entity: EntityId, component: ComponentId) -> impl Iterator<Item = (Timestamp, &[u8])> {
        self.appends
            .get(&entity)
            .and_then(|logs| logs.get(&component))
            .into_iter()
            .flat_map(|log| log.iter().map(|entry| (entry.timestamp, entry.payload.as_slice())))
    }

    /// Components of an entity that hold a non-empty append log
    pub fn append_components_of(&self, entity: EntityId) -> impl Iterator<Item = ComponentId> + '_ {
        self.appends
            .get(&entity)
            .into_iter()
            .flat_map(|logs| logs.keys().copied())
    }

    /// Number of entries in an append log
    pub fn append_len(&self, entity: EntityId, component: ComponentId) -> usize {
        self.appends
            .get(&entity)
            .and_then(|logs| logs.get(&component))
            .map_or(0, VecDeque::len)
    }

    /// Timestamp of the latest accepted delete of an entity
    pub fn entity_deleted_at(&self, entity: EntityId) -> Option<Timestamp> {
        self.deleted_entities.get(&entity).copied()
    }

    /// Number of messages [`snapshot`](Self::snapshot) produces
    pub fn message_count(&self) -> usize {
        let lww: usize = self.lww.values().map(HashMap::len).sum();
        let appends: usize = self
            .appends
            .values()
            .flat_map(HashMap::values)
            .map(VecDeque::len)
            .sum();
        self.deleted_entities.len() + lww + appends
    }

    /// Messages that rebuild the current state on an empty store
    ///
    /// Ordered by entity then component; entity deletes come first so they
    /// cannot wipe the state that follows them.
    pub fn snapshot(&self, pool: &BufferPool) -> Vec<ProcessedMessage> {
        let mut messages = Vec::with_capacity(self.message_count());

        let mut deleted: Vec<_> = self.deleted_entities.iter().collect();
        deleted.sort_unstable_by_key(|(entity, _)| **entity);
        for (entity, timestamp) in deleted {
            messages.push(CrdtMessage::delete_entity(*entity, *timestamp).into());
        }

        let mut slots: Vec<_> = self
            .lww
            .iter()
            .flat_map(|(entity, slots)| slots.iter().map(move |(component, stored)| (*entity, *component, stored)))
            .collect();
        slots.sort_unstable_by_key(|(entity, component, _)| (*entity, *component));
        for (entity, component, stored) in slots {
            let message = match &stored.payload {
                Some(payload) => CrdtMessage::put(entity, component, stored.timestamp, pool.copy_from(payload)),
                None => CrdtMessage::delete_component(entity, component, stored.timestamp),
            };
            messages.push(message.into());
        }

        let mut logs: Vec<_> = self
            .appends
            .iter()
            .flat_map(|(entity, logs)| logs.iter().map(move |(component, log)| (*entity, *component, log)))
            .collect();
        logs.sort_unstable_by_key(|(entity, component, _)| (*entity, *component));
        for (entity, component, log) in logs {
            for entry in log {
                messages.push(CrdtMessage::append(entity, component, entry.timestamp, pool.copy_from(&entry.payload)).into());
            }
        }

        messages
    }

    /// Get statistics
    pub fn stats(&self) -> ReconciliationStats {
        self.stats
    }

    /// Drop all state, payloads go back to their pools
    pub fn clear(&mut self) {
        self.lww.clear();
        self.appends.clear();
        self.deleted_entities.clear();
    }
}

impl Default for ReconciliationStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
