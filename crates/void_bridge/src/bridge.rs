//! Scene bridge - the boundary between a scene runtime and the host
//!
//! The scene thread calls into the bridge once per tick:
//!
//! ```text
//! scene ──push_state(bytes)──► decode ──► ReconciliationStore ──► HostWorld
//! scene ◄──pull_state()─────── encode ◄── OutgoingMessages ◄── host systems
//! ```
//!
//! Every call is guarded. Malformed input and panics are reported through the
//! fault channel and the call returns a neutral value instead of unwinding
//! into the scene runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use void_crdt::{codec, CrdtMessage, ReconciliationStore};
use void_memory::BufferPool;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::fault::{catch_panic, FaultReporter, SceneFault};
use crate::outgoing::OutgoingMessages;
use crate::world_sync::{HostWorld, WorldSyncBuffer};

/// Counters for one bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub pushes: u64,
    pub pulls: u64,
    pub messages_received: u64,
    pub messages_accepted: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub faults: u64,
}

/// Cloneable handle that marks a bridge as shutting down
///
/// Once set, every bridge call returns immediately with an empty result.
#[derive(Debug, Clone, Default)]
pub struct DisposeHandle {
    flag: Arc<AtomicBool>,
}

impl DisposeHandle {
    pub fn set_disposing(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_disposing(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Bridge between one scene and the host world
pub struct SceneBridge<W: HostWorld> {
    pool: BufferPool,
    store: ReconciliationStore,
    outgoing: Arc<OutgoingMessages>,
    sync: WorldSyncBuffer,
    world: W,
    /// Decoded messages of the current push
    incoming: Vec<CrdtMessage>,
    /// Encoded bytes handed back by pull and get; only ever grows
    scratch: Vec<u8>,
    faults: FaultReporter,
    dispose: DisposeHandle,
    stats: BridgeStats,
}

impl<W: HostWorld> SceneBridge<W> {
    /// Create a bridge that allocates payloads from `pool`
    ///
    /// The pool is usually shared by every scene of the process.
    pub fn new(config: &BridgeConfig, pool: BufferPool, world: W, faults: FaultReporter) -> Self {
        Self {
            pool,
            store: ReconciliationStore::new(config.store_config()),
            outgoing: Arc::new(OutgoingMessages::new()),
            sync: WorldSyncBuffer::new(),
            world,
            incoming: Vec::new(),
            scratch: Vec::with_capacity(config.bridge.initial_scratch_capacity),
            faults,
            dispose: DisposeHandle::default(),
            stats: BridgeStats::default(),
        }
    }

    /// Merge a batch of messages sent by the scene
    ///
    /// A batch that fails to parse is rejected as a whole and reported as a
    /// fault; the store is not touched. If the host world panics while taking
    /// the batch's effects, the ones it did not take are kept and handed over
    /// again on the next push.
    pub fn push_state(&mut self, bytes: &[u8]) {
        if self.is_disposing() {
            return;
        }

        self.stats.pushes += 1;
        let result = catch_panic("push_state", || self.apply_incoming(bytes)).and_then(|r| r);
        if let Err(err) = result {
            self.incoming.clear();
            self.report("push_state", err);
        }
    }

    fn apply_incoming(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.incoming.clear();

        let count = codec::decode_into(bytes, &self.pool, &mut self.incoming)?;
        self.stats.messages_received += count as u64;

        for message in self.incoming.drain(..) {
            let kind = message.message_type();
            let entity = message.entity();
            let component = message.component();

            let reconciliation = self.store.reconcile(message);
            if reconciliation.is_accepted() {
                self.stats.messages_accepted += 1;
            }
            self.sync.record(kind, entity, component, reconciliation.effect);
        }

        let summary = self.sync.flush(&self.store, &mut self.world);
        log::trace!("Pushed {} messages: {:?}", count, summary);
        Ok(())
    }

    /// Encode and hand over everything queued for the scene since the last pull
    ///
    /// The returned bytes stay valid until the next call on this bridge.
    pub fn pull_state(&mut self) -> &[u8] {
        if self.is_disposing() {
            return &[];
        }

        self.stats.pulls += 1;
        let result = catch_panic("pull_state", || self.encode_outgoing()).and_then(|r| r);
        match result {
            Ok(()) => self.scratch.as_slice(),
            Err(err) => {
                self.scratch.clear();
                self.report("pull_state", err);
                &[]
            }
        }
    }

    fn encode_outgoing(&mut self) -> BridgeResult<()> {
        self.scratch.clear();

        let mut scope = self.outgoing.acquire_drain_scope();
        if scope.is_empty() {
            return Ok(());
        }

        let required = scope.payload_length();
        if self.scratch.capacity() < required {
            log::trace!("Growing outgoing buffer from {} to {} bytes", self.scratch.capacity(), required);
            self.scratch.reserve_exact(required);
        }

        // Each payload goes back to the pool as soon as it is encoded
        let mut sent = 0;
        for message in scope.drain() {
            codec::encode_message(message.message(), &mut self.scratch)?;
            sent += 1;
        }

        self.stats.messages_sent += sent;
        self.stats.bytes_sent += self.scratch.len() as u64;
        Ok(())
    }

    /// Encode the full reconciled state, for a scene that starts or reloads
    pub fn get_state(&mut self) -> &[u8] {
        if self.is_disposing() {
            return &[];
        }

        let result = catch_panic("get_state", || {
            self.scratch.clear();
            let snapshot = self.store.snapshot(&self.pool);
            codec::encode_into(&snapshot, &mut self.scratch).map(|_| ())
        });

        match result.and_then(|r| r.map_err(Into::into)) {
            Ok(()) => self.scratch.as_slice(),
            Err(err) => {
                self.scratch.clear();
                self.report("get_state", err);
                &[]
            }
        }
    }

    /// Queue a message for the scene
    pub fn send(&self, message: CrdtMessage) {
        if let Err(err) = self.outgoing.add(message) {
            self.faults.report(SceneFault::from_error("send", &err));
        }
    }

    /// Shared handle producers use to queue messages from any thread
    pub fn outgoing(&self) -> Arc<OutgoingMessages> {
        Arc::clone(&self.outgoing)
    }

    /// Pool payloads are allocated from
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn store(&self) -> &ReconciliationStore {
        &self.store
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Stop serving calls and close the outgoing batch
    pub fn set_disposing(&self) {
        self.dispose.set_disposing();
        self.outgoing.close();
        log::debug!("Scene bridge disposing");
    }

    pub fn is_disposing(&self) -> bool {
        self.dispose.is_disposing()
    }

    /// Handle that lets another thread start disposal
    ///
    /// Setting it from outside does not close the outgoing batch; the owner
    /// still calls [`set_disposing`](Self::set_disposing) or drops the bridge.
    pub fn dispose_handle(&self) -> DisposeHandle {
        self.dispose.clone()
    }

    fn report(&mut self, operation: &'static str, err: BridgeError) {
        self.stats.faults += 1;
        self.faults.report(SceneFault::from_error(operation, &err));
    }
}

impl<W: HostWorld> Drop for SceneBridge<W> {
    fn drop(&mut self) {
        self.dispose.set_disposing();
        self.outgoing.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{fault_channel, FaultKind};
    use crate::world_sync::NullWorld;
    use void_crdt::{ComponentId, EntityId, ProcessedMessage, Timestamp};

    fn bridge() -> (SceneBridge<NullWorld>, crossbeam_channel::Receiver<SceneFault>) {
        let (reporter, faults) = fault_channel(8);
        let bridge = SceneBridge::new(&BridgeConfig::default(), BufferPool::default(), NullWorld, reporter);
        (bridge, faults)
    }

    fn encode(messages: Vec<CrdtMessage>) -> Vec<u8> {
        let processed: Vec<ProcessedMessage> = messages.into_iter().map(Into::into).collect();
        let mut bytes = Vec::new();
        codec::encode_into(&processed, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_push_reconciles_into_store() {
        let (mut bridge, faults) = bridge();
        let pool = bridge.pool().clone();
        let bytes = encode(vec![CrdtMessage::put(
            EntityId::new(1, 0),
            ComponentId::new(1),
            Timestamp::new(1),
            pool.copy_from(b"state"),
        )]);

        bridge.push_state(&bytes);

        let stored = bridge.store().try_get(EntityId::new(1, 0), ComponentId::new(1)).unwrap();
        assert_eq!(stored.payload, Some(&b"state"[..]));
        assert_eq!(bridge.stats().messages_accepted, 1);
        assert!(faults.try_recv().is_err());
    }

    #[test]
    fn test_malformed_push_reports_fault() {
        let (mut bridge, faults) = bridge();

        bridge.push_state(&[1, 2, 3]);

        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.operation, "push_state");
        assert_eq!(fault.kind, FaultKind::MalformedWireData);
        assert_eq!(bridge.store().message_count(), 0);
        assert_eq!(bridge.stats().faults, 1);
    }

    #[test]
    fn test_pull_empty_batch_is_empty() {
        let (mut bridge, _faults) = bridge();
        assert!(bridge.pull_state().is_empty());
    }

    #[test]
    fn test_pull_drains_outgoing() {
        let (mut bridge, _faults) = bridge();
        bridge.send(CrdtMessage::delete_entity(EntityId::new(3, 0), Timestamp::new(2)));

        let first = bridge.pull_state().to_vec();
        assert_eq!(first.len(), codec::HEADER_LEN);
        assert!(bridge.pull_state().is_empty());
        assert_eq!(bridge.stats().messages_sent, 1);
    }

    #[test]
    fn test_disposing_bridge_is_inert() {
        let (mut bridge, faults) = bridge();
        bridge.set_disposing();

        bridge.push_state(&[0xff; 4]);
        assert!(bridge.pull_state().is_empty());
        assert!(bridge.get_state().is_empty());
        assert!(faults.try_recv().is_err());
        assert_eq!(bridge.stats().pushes, 0);
    }

    #[test]
    fn test_send_after_dispose_reports_closed_batch() {
        let (bridge, faults) = bridge();
        bridge.set_disposing();

        bridge.send(CrdtMessage::delete_entity(EntityId::new(1, 0), Timestamp::new(1)));
        assert_eq!(faults.try_recv().unwrap().kind, FaultKind::BatchClosed);
    }
}
