//! A scripted sync transport.
//!
//! Each delivery consumes the next [`Step`] of the script; once the script
//! runs out every batch is accepted. Accepted events are collected in a
//! remote-side log so tests can check what the endpoint ended up with.

use async_trait::async_trait;
use opsledger_core::{Event, EventId};
use opsledger_sync::{DeliveryReport, SyncError, SyncResult, SyncTransport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// One scripted delivery outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Confirm the whole batch.
    AcceptAll,
    /// Confirm only the first `n` events of the batch.
    AcceptFirst(usize),
    /// Fail the call with a transport error.
    Fail {
        /// Whether the error is marked retryable.
        retryable: bool,
    },
    /// Answer as [`Step::AcceptAll`] after sleeping.
    Delay(Duration),
}

/// A transport that replays a fixed script of outcomes.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    batches: Mutex<Vec<Vec<EventId>>>,
    remote: Mutex<Vec<Event>>,
}

impl ScriptedTransport {
    /// Creates a transport that will play `steps` in order.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Appends steps to the script.
    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().extend(steps);
    }

    /// Returns the number of steps not yet played.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }

    /// Returns the ids of every batch received, in call order.
    pub fn batches(&self) -> Vec<Vec<EventId>> {
        self.batches.lock().clone()
    }

    /// Returns every confirmed event in confirmation order.
    pub fn remote_events(&self) -> Vec<Event> {
        self.remote.lock().clone()
    }

    fn accept(&self, events: &[Event]) -> DeliveryReport {
        self.remote.lock().extend(events.iter().cloned());
        DeliveryReport::all(events)
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn deliver(&self, events: &[Event]) -> SyncResult<DeliveryReport> {
        self.batches
            .lock()
            .push(events.iter().map(|e| e.id).collect());
        let step = self.script.lock().pop_front().unwrap_or(Step::AcceptAll);

        match step {
            Step::AcceptAll => Ok(self.accept(events)),
            Step::AcceptFirst(n) => Ok(self.accept(&events[..n.min(events.len())])),
            Step::Fail { retryable } => Err(SyncError::Transport {
                message: "scripted failure".into(),
                retryable,
            }),
            Step::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept(events))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{emit_cases, TestLedger};

    #[tokio::test]
    async fn plays_steps_then_accepts() {
        let ledger = TestLedger::new();
        emit_cases(&ledger, 3);
        let batch = ledger.get_pending_events(None);
        let transport =
            ScriptedTransport::new([Step::Fail { retryable: true }, Step::AcceptFirst(2)]);

        assert!(transport.deliver(&batch).await.is_err());
        let report = transport.deliver(&batch).await.unwrap();
        assert_eq!(report.synced.len(), 2);
        assert_eq!(transport.remaining(), 0);
        let report = transport.deliver(&batch).await.unwrap();
        assert_eq!(report.synced.len(), 3);

        assert_eq!(transport.batches().len(), 3);
        assert_eq!(transport.remote_events().len(), 5);
    }
}
