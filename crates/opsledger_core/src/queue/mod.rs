//! Bounded sync queue.
//!
//! The queue holds events awaiting (or having completed) delivery to the
//! remote endpoint, in emission order. It is persisted as a whole after
//! every mutation.

mod persister;
mod store;

pub(crate) use persister::{PersistEvent, Persister};
pub use store::{decode_queue, encode_queue, QueueStore};

use crate::event::{Event, EventId, SyncStatus};
use std::collections::{HashSet, VecDeque};

/// A bounded, ordered queue of events.
///
/// # Invariants
///
/// - Events are in emission order; nothing is ever reordered
/// - `len() <= max_size()` after every operation
/// - When room is needed, `Synced` events go first, then `Failed` ones,
///   then the oldest `Pending` event
/// - Only `sync_status` and `retry_count` of a queued event ever change
#[derive(Debug, Clone)]
pub struct EventQueue {
    entries: VecDeque<Event>,
    max_size: usize,
}

impl EventQueue {
    /// Creates an empty queue holding at most `max_size` events.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Rebuilds a queue from persisted events.
    ///
    /// Returns the queue and any events evicted because the persisted
    /// queue is larger than the current bound.
    #[must_use]
    pub fn from_events(events: Vec<Event>, max_size: usize) -> (Self, Vec<Event>) {
        let mut queue = Self {
            entries: events.into(),
            max_size: max_size.max(1),
        };
        let mut evicted = Vec::new();
        while queue.entries.len() > queue.max_size {
            match queue.evict_one() {
                Some(event) => evicted.push(event),
                None => break,
            }
        }
        (queue, evicted)
    }

    /// Appends an event, evicting one if the bound is exceeded.
    ///
    /// Returns the evicted event, if any.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        self.entries.push_back(event);
        if self.entries.len() > self.max_size {
            self.evict_one()
        } else {
            None
        }
    }

    fn evict_one(&mut self) -> Option<Event> {
        let victim = self
            .position_of(SyncStatus::Synced)
            .or_else(|| self.position_of(SyncStatus::Failed))
            .unwrap_or(0);
        self.entries.remove(victim)
    }

    fn position_of(&self, status: SyncStatus) -> Option<usize> {
        self.entries.iter().position(|e| e.sync_status == status)
    }

    /// Returns a snapshot of pending events, optionally filtered by scope.
    #[must_use]
    pub fn pending(&self, scope: Option<&str>) -> Vec<Event> {
        self.pending_batch(scope, usize::MAX)
    }

    /// Returns up to `limit` of the oldest pending events in scope.
    #[must_use]
    pub fn pending_batch(&self, scope: Option<&str>, limit: usize) -> Vec<Event> {
        self.entries
            .iter()
            .filter(|e| e.is_pending() && e.in_scope(scope))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// Largest `retry_count` among pending events in scope.
    #[must_use]
    pub fn max_pending_retries(&self, scope: Option<&str>) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.is_pending() && e.in_scope(scope))
            .map(|e| e.retry_count)
            .max()
            .unwrap_or(0)
    }

    /// Marks the given events `Synced`.
    ///
    /// Unknown ids and already-synced events are ignored. Returns how many
    /// events changed status.
    pub fn mark_synced(&mut self, ids: &[EventId]) -> usize {
        let ids: HashSet<_> = ids.iter().collect();
        let mut changed = 0;
        for event in self.entries.iter_mut().filter(|e| ids.contains(&e.id)) {
            if event.sync_status != SyncStatus::Synced {
                event.sync_status = SyncStatus::Synced;
                changed += 1;
            }
        }
        changed
    }

    /// Records a failed delivery attempt for the given pending events.
    ///
    /// With `max_attempts = Some(n)`, an event whose `retry_count` reaches
    /// `n` becomes `Failed`; those events are returned. Without a limit the
    /// events stay `Pending` forever.
    pub fn mark_failed(&mut self, ids: &[EventId], max_attempts: Option<u32>) -> Vec<Event> {
        let ids: HashSet<_> = ids.iter().collect();
        let mut abandoned = Vec::new();
        for event in self
            .entries
            .iter_mut()
            .filter(|e| e.is_pending() && ids.contains(&e.id))
        {
            event.retry_count = event.retry_count.saturating_add(1);
            if max_attempts.is_some_and(|max| event.retry_count >= max) {
                event.sync_status = SyncStatus::Failed;
                abandoned.push(event.clone());
            }
        }
        abandoned
    }

    /// Moves every `Failed` event back to `Pending`. Returns how many moved.
    pub fn retry_failed(&mut self) -> usize {
        let mut moved = 0;
        for event in self
            .entries
            .iter_mut()
            .filter(|e| e.sync_status == SyncStatus::Failed)
        {
            event.sync_status = SyncStatus::Pending;
            moved += 1;
        }
        moved
    }

    /// Removes every `Synced` event. Returns how many were removed.
    pub fn clear_synced(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.sync_status != SyncStatus::Synced);
        before - self.entries.len()
    }

    /// Returns an owned copy of the queue in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.iter().cloned().collect()
    }

    /// Iterates over queued events in order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    /// Returns the newest queued event.
    #[must_use]
    pub fn last(&self) -> Option<&Event> {
        self.entries.back()
    }

    /// Returns the bound.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
