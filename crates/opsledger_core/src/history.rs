//! Undo/redo history over reversible events.
//!
//! History lives only in memory for the lifetime of the process. It is
//! never persisted and never synchronized; after a restart nothing emitted
//! before the restart can be undone.

use crate::error::HandlerError;
use crate::event::{Event, EventKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Describes how to undo one event.
///
/// Reverse actions are plain data so they can be logged and inspected.
/// [`ReverseAction::Compensate`] is carried out by the event log itself;
/// every other variant is handed to the application's [`ReverseHandler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReverseAction {
    /// Put `previous` back at `target`.
    Restore {
        /// Application-defined location (store, record path, form field).
        target: String,
        /// Value to restore.
        previous: Value,
    },
    /// Delete the record `id` that the forward action created.
    Remove {
        /// Collection the record lives in.
        target: String,
        /// Record identifier.
        id: String,
    },
    /// Re-insert a record that the forward action deleted.
    Reinsert {
        /// Collection the record lives in.
        target: String,
        /// Full record to re-insert.
        record: Value,
    },
    /// Emit a compensating (non-reversible) event.
    Compensate {
        /// Kind of the compensating event.
        kind: EventKind,
        /// Payload of the compensating event.
        payload: Value,
    },
}

/// Application port that performs reverse actions against its own state.
#[async_trait]
pub trait ReverseHandler: Send + Sync {
    /// Applies `action`. May suspend (e.g. on a local database write).
    async fn apply(&self, action: &ReverseAction) -> Result<(), HandlerError>;
}

/// A reversible event together with the means to undo it.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// The event as emitted.
    pub event: Event,
    /// How to undo it, if known.
    pub reverse: Option<ReverseAction>,
}

/// Whether undo and redo currently have anything to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UndoRedoStatus {
    /// The undo stack is non-empty.
    pub can_undo: bool,
    /// The redo stack is non-empty.
    pub can_redo: bool,
}

/// Bounded undo and redo stacks.
///
/// # Invariants
///
/// - each stack holds at most its configured number of entries; pushing
///   beyond the bound drops the oldest entry
/// - recording a fresh reversible event clears the redo stack
#[derive(Debug)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: VecDeque<HistoryEntry>,
    max_undo: usize,
    max_redo: usize,
}

impl History {
    /// Creates empty stacks with the given bounds.
    #[must_use]
    pub fn new(max_undo: usize, max_redo: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            max_undo,
            max_redo,
        }
    }

    /// Records a freshly emitted reversible event and clears redo.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.push_undo(entry);
        self.redo.clear();
    }

    /// Pushes onto the undo stack without touching redo (used by redo).
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        push_bounded(&mut self.undo, entry, self.max_undo);
    }

    /// Pops the most recent undoable entry.
    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    /// Pushes an undone entry onto the redo stack.
    pub fn push_redo(&mut self, entry: HistoryEntry) {
        push_bounded(&mut self.redo, entry, self.max_redo);
    }

    /// Pops the most recently undone entry.
    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop_back()
    }

    /// Returns what undo/redo can currently do.
    #[must_use]
    pub fn status(&self) -> UndoRedoStatus {
        UndoRedoStatus {
            can_undo: !self.undo.is_empty(),
            can_redo: !self.redo.is_empty(),
        }
    }

    /// Number of undoable entries.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Number of redoable entries.
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
}

fn push_bounded(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, bound: usize) {
    if bound == 0 {
        return;
    }
    stack.push_back(entry);
    while stack.len() > bound {
        stack.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventIdGenerator, EventMetadata, SyncStatus};
    use crate::identity::NetworkType;
    use serde_json::json;

    fn entry(gen: &EventIdGenerator, n: u64) -> HistoryEntry {
        HistoryEntry {
            event: Event {
                id: gen.next_id(n),
                kind: "field.edited".into(),
                timestamp: n,
                actor_id: "a".into(),
                session_id: "s".into(),
                device_id: "d".into(),
                operation_scope: None,
                payload: json!({ "n": n }),
                metadata: EventMetadata {
                    network_type: NetworkType::Unknown,
                    user_agent: "t".into(),
                    session_elapsed_ms: 0,
                },
                reversible: true,
                sync_status: SyncStatus::Pending,
                retry_count: 0,
            },
            reverse: Some(ReverseAction::Restore {
                target: "field".into(),
                previous: json!(n - 1),
            }),
        }
    }

    #[test]
    fn undo_is_lifo() {
        let gen = EventIdGenerator::new();
        let mut history = History::new(10, 10);
        history.record(entry(&gen, 1));
        history.record(entry(&gen, 2));

        assert_eq!(history.pop_undo().unwrap().event.timestamp, 2);
        assert_eq!(history.pop_undo().unwrap().event.timestamp, 1);
        assert!(history.pop_undo().is_none());
    }

    #[test]
    fn bound_drops_oldest() {
        let gen = EventIdGenerator::new();
        let mut history = History::new(3, 3);
        for n in 1..=5 {
            history.record(entry(&gen, n));
        }
        assert_eq!(history.undo_len(), 3);

        let remaining: Vec<_> = std::iter::from_fn(|| history.pop_undo())
            .map(|e| e.event.timestamp)
            .collect();
        assert_eq!(remaining, vec![5, 4, 3]);
    }

    #[test]
    fn record_clears_redo_but_push_undo_does_not() {
        let gen = EventIdGenerator::new();
        let mut history = History::new(10, 10);
        history.push_redo(entry(&gen, 1));
        history.push_redo(entry(&gen, 2));

        history.push_undo(entry(&gen, 3));
        assert_eq!(history.redo_len(), 2);

        history.record(entry(&gen, 4));
        assert_eq!(history.redo_len(), 0);
        assert_eq!(
            history.status(),
            UndoRedoStatus {
                can_undo: true,
                can_redo: false
            }
        );
    }

    #[test]
    fn zero_bound_keeps_nothing() {
        let gen = EventIdGenerator::new();
        let mut history = History::new(0, 0);
        history.record(entry(&gen, 1));
        assert!(!history.status().can_undo);
    }

    #[test]
    fn reverse_action_json_shape() {
        let action = ReverseAction::Compensate {
            kind: "county.removed".into(),
            payload: json!({ "county": "Pinellas" }),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["op"], "compensate");
        assert_eq!(value["kind"], "county.removed");
    }
}
