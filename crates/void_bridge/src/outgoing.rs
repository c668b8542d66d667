//! Outgoing message batch - producers append, the bridge drains
//!
//! The batch is a small state machine guarded by one mutex:
//!
//! ```text
//!   Idle ──acquire_drain_scope──► Draining ──scope dropped──► Idle
//!     └────────────close──────────► Closed
//! ```
//!
//! Producers block in [`OutgoingMessages::add_message`] while a drain scope is
//! alive, so a drain never observes a half-appended batch and nothing is
//! appended into a batch that is being read. The scope does not hold the mutex
//! itself; it may be released from any thread.

use parking_lot::{Condvar, Mutex};
use void_crdt::{CrdtMessage, ProcessedMessage};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchPhase {
    Idle,
    Draining,
    Closed,
}

struct BatchState {
    phase: BatchPhase,
    messages: Vec<ProcessedMessage>,
    /// Sum of the wire lengths of `messages`
    payload_length: usize,
}

/// Thread-safe, append-only accumulator of outgoing messages
pub struct OutgoingMessages {
    state: Mutex<BatchState>,
    /// Signalled whenever the batch leaves the draining phase
    idle: Condvar,
}

impl OutgoingMessages {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty batch with room for `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BatchState {
                phase: BatchPhase::Idle,
                messages: Vec::with_capacity(capacity),
                payload_length: 0,
            }),
            idle: Condvar::new(),
        }
    }

    /// Append a message, waiting out any drain in progress
    ///
    /// Fails once the batch is closed; the message is dropped and its payload
    /// goes back to the pool.
    pub fn add_message(&self, message: ProcessedMessage) -> BridgeResult<()> {
        let mut state = self.state.lock();
        while state.phase == BatchPhase::Draining {
            self.idle.wait(&mut state);
        }

        if state.phase == BatchPhase::Closed {
            return Err(BridgeError::BatchClosed);
        }

        state.payload_length += message.wire_len();
        state.messages.push(message);
        Ok(())
    }

    /// Append a message that has not been processed yet
    pub fn add(&self, message: CrdtMessage) -> BridgeResult<()> {
        self.add_message(ProcessedMessage::new(message))
    }

    /// Sum of the wire lengths of the messages currently held
    pub fn payload_length(&self) -> usize {
        self.state.lock().payload_length
    }

    /// Number of messages currently held
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().phase == BatchPhase::Closed
    }

    /// Take exclusive ownership of everything appended so far
    ///
    /// Blocks while another scope is alive. Producers stay blocked until the
    /// returned scope is dropped; forgetting it deadlocks them.
    pub fn acquire_drain_scope(&self) -> DrainScope<'_> {
        let mut state = self.state.lock();
        while state.phase == BatchPhase::Draining {
            self.idle.wait(&mut state);
        }

        if state.phase == BatchPhase::Idle {
            state.phase = BatchPhase::Draining;
        }

        let messages = std::mem::take(&mut state.messages);
        let payload_length = std::mem::take(&mut state.payload_length);

        DrainScope {
            owner: self,
            messages,
            payload_length,
        }
    }

    /// Empty the batch and refuse further messages
    ///
    /// Waits for an in-flight drain to finish first.
    pub fn close(&self) {
        let mut state = self.state.lock();
        while state.phase == BatchPhase::Draining {
            self.idle.wait(&mut state);
        }

        state.phase = BatchPhase::Closed;
        state.messages.clear();
        state.payload_length = 0;
        drop(state);

        self.idle.notify_all();
    }

    fn finish_drain(&self, mut messages: Vec<ProcessedMessage>) {
        messages.clear();

        let mut state = self.state.lock();
        debug_assert!(
            state.phase != BatchPhase::Idle,
            "drain scope released while the batch was idle"
        );
        debug_assert!(state.messages.is_empty(), "messages appended during a drain");

        // Hand the storage back so the next tick does not reallocate
        if state.messages.capacity() < messages.capacity() {
            state.messages = messages;
        }

        if state.phase == BatchPhase::Draining {
            state.phase = BatchPhase::Idle;
        }
        drop(state);

        self.idle.notify_all();
    }
}

impl Default for OutgoingMessages {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to a drained batch
///
/// Dropping the scope clears whatever is left in it and lets producers resume.
pub struct DrainScope<'a> {
    owner: &'a OutgoingMessages,
    messages: Vec<ProcessedMessage>,
    payload_length: usize,
}

impl DrainScope<'_> {
    /// The drained messages in append order
    pub fn messages(&self) -> &[ProcessedMessage] {
        &self.messages
    }

    /// Sum of the wire lengths of the drained messages
    pub fn payload_length(&self) -> usize {
        self.payload_length
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Move the messages out of the scope
    pub fn drain(&mut self) -> std::vec::Drain<'_, ProcessedMessage> {
        self.payload_length = 0;
        self.messages.drain(..)
    }

    /// Release the scope, same as dropping it
    pub fn release(self) {}
}

impl Drop for DrainScope<'_> {
    fn drop(&mut self) {
        let messages = std::mem::take(&mut self.messages);
        self.owner.finish_drain(messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use void_crdt::{ComponentId, EntityId, Timestamp, HEADER_LEN};
    use void_memory::OwnedBuffer;

    fn message_with_wire_len(wire_len: usize) -> ProcessedMessage {
        ProcessedMessage::new(CrdtMessage::put(
            EntityId::new(1, 0),
            ComponentId::new(1),
            Timestamp::new(1),
            OwnedBuffer::from_vec(vec![0; wire_len - HEADER_LEN]),
        ))
    }

    #[test]
    fn test_payload_length_is_additive() {
        let batch = OutgoingMessages::new();
        batch.add_message(message_with_wire_len(30)).unwrap();
        batch.add_message(message_with_wire_len(60)).unwrap();

        assert_eq!(batch.payload_length(), 90);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_drain_takes_everything_and_resets() {
        let batch = OutgoingMessages::new();
        batch.add_message(message_with_wire_len(30)).unwrap();
        batch.add_message(message_with_wire_len(40)).unwrap();

        {
            let scope = batch.acquire_drain_scope();
            assert_eq!(scope.len(), 2);
            assert_eq!(scope.payload_length(), 70);
        }

        assert!(batch.is_empty());
        assert_eq!(batch.payload_length(), 0);

        batch.add_message(message_with_wire_len(20)).unwrap();
        assert_eq!(batch.acquire_drain_scope().len(), 1);
    }

    #[test]
    fn test_drain_moves_messages_out() {
        let batch = OutgoingMessages::new();
        batch.add_message(message_with_wire_len(25)).unwrap();

        let mut scope = batch.acquire_drain_scope();
        let taken: Vec<_> = scope.drain().collect();
        assert_eq!(taken.len(), 1);
        assert!(scope.is_empty());
        scope.release();

        assert!(batch.is_empty());
    }

    #[test]
    fn test_producer_blocks_until_scope_released() {
        let batch = Arc::new(OutgoingMessages::new());
        let added = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let scope = batch.acquire_drain_scope();

        let producer = {
            let batch = Arc::clone(&batch);
            let added = Arc::clone(&added);
            std::thread::spawn(move || {
                batch.add_message(message_with_wire_len(30)).unwrap();
                added.store(true, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!added.load(Ordering::SeqCst));

        drop(scope);

        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        producer.join().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_scope_can_be_released_on_another_thread() {
        let batch = OutgoingMessages::new();
        batch.add_message(message_with_wire_len(30)).unwrap();

        let scope = batch.acquire_drain_scope();
        std::thread::scope(|s| {
            s.spawn(move || drop(scope));
        });

        batch.add_message(message_with_wire_len(30)).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_closed_batch_rejects_messages() {
        let batch = OutgoingMessages::new();
        batch.add_message(message_with_wire_len(30)).unwrap();

        batch.close();
        assert!(batch.is_closed());
        assert!(batch.is_empty());
        assert!(matches!(batch.add_message(message_with_wire_len(30)), Err(BridgeError::BatchClosed)));

        // Draining a closed batch yields nothing and leaves it closed
        assert!(batch.acquire_drain_scope().is_empty());
        assert!(batch.is_closed());
    }
}
