//! Scene fault reporting
//!
//! Failures inside bridge calls never unwind into the caller. They are turned
//! into [`SceneFault`]s and pushed down a bounded channel to whoever owns the
//! scene's lifecycle; that owner decides whether to flag the scene as faulted.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};

use crate::error::BridgeError;

/// Category of a scene fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Incoming bytes did not parse
    MalformedWireData,
    /// A bridge call panicked
    Panic,
    /// A message was offered to a closed batch
    BatchClosed,
}

/// A failure observed at the bridge boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneFault {
    /// Bridge call that failed
    pub operation: &'static str,
    pub kind: FaultKind,
    pub message: String,
}

impl SceneFault {
    pub fn from_error(operation: &'static str, error: &BridgeError) -> Self {
        Self {
            operation,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Sending half of the fault channel
///
/// Reporting never blocks. When the channel is full the fault is logged and
/// dropped.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    sender: Option<Sender<SceneFault>>,
}

impl FaultReporter {
    /// A reporter that only logs
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn report(&self, fault: SceneFault) {
        log::error!("Scene fault in {} ({:?}): {}", fault.operation, fault.kind, fault.message);

        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(fault) {
            Ok(()) => {}
            Err(TrySendError::Full(fault)) => {
                log::warn!("Fault channel full, dropping fault from {}", fault.operation);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Fault receiver gone");
            }
        }
    }
}

impl Default for FaultReporter {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Create a bounded fault channel
pub fn fault_channel(capacity: usize) -> (FaultReporter, Receiver<SceneFault>) {
    let (sender, receiver) = bounded(capacity);
    (FaultReporter { sender: Some(sender) }, receiver)
}

/// Run `f`, turning a panic into [`BridgeError::Panicked`]
pub(crate) fn catch_panic<F, R>(operation: &'static str, f: F) -> Result<R, BridgeError>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        BridgeError::Panicked { operation, message }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(operation: &'static str) -> SceneFault {
        SceneFault {
            operation,
            kind: FaultKind::Panic,
            message: "boom".into(),
        }
    }

    #[test]
    fn test_fault_delivered() {
        let (reporter, faults) = fault_channel(4);
        reporter.report(fault("push_state"));

        let received = faults.try_recv().unwrap();
        assert_eq!(received.operation, "push_state");
        assert_eq!(received.kind, FaultKind::Panic);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (reporter, faults) = fault_channel(1);
        reporter.report(fault("first"));
        reporter.report(fault("second"));

        assert_eq!(faults.len(), 1);
        assert_eq!(faults.try_recv().unwrap().operation, "first");
    }

    #[test]
    fn test_disconnected_and_disabled_reporters() {
        let (reporter, faults) = fault_channel(1);
        drop(faults);
        reporter.report(fault("orphan"));

        FaultReporter::disabled().report(fault("nowhere"));
    }

    #[test]
    fn test_catch_panic_messages() {
        let ok = catch_panic("ok", || 7);
        assert_eq!(ok.unwrap(), 7);

        let static_str = catch_panic("static", || -> u32 { panic!("static message") });
        assert!(matches!(
            static_str,
            Err(BridgeError::Panicked { operation: "static", ref message }) if message == "static message"
        ));

        let formatted = catch_panic("formatted", || -> u32 { panic!("value {}", 3) });
        assert!(matches!(
            formatted,
            Err(BridgeError::Panicked { ref message, .. }) if message == "value 3"
        ));
    }

    #[test]
    fn test_fault_from_error() {
        let fault = SceneFault::from_error("add_message", &BridgeError::BatchClosed);
        assert_eq!(fault.kind, FaultKind::BatchClosed);
        assert_eq!(fault.message, "Outgoing batch is closed");
    }
}
