//! Event log statistics.
//!
//! Counters are atomic and can be read while the log is in use. The
//! surrounding application can poll [`EventLog::stats`] to drive a
//! "not saved / not synced" indicator.
//!
//! [`EventLog::stats`]: crate::EventLog::stats

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event log counters.
#[derive(Debug, Default)]
pub struct LedgerStats {
    /// Events appended through `emit` (including redo and bookkeeping).
    emitted: AtomicU64,
    /// Local diagnostics published.
    published: AtomicU64,
    /// Handler invocations that failed or panicked.
    handler_errors: AtomicU64,
    /// Events evicted from the queue for space.
    evicted: AtomicU64,
    /// Failed queue writes (and failed loads at open).
    persist_failures: AtomicU64,
    /// Events that hit the delivery attempt limit.
    abandoned: AtomicU64,
    /// Undo calls that completed.
    undos: AtomicU64,
    /// Redo calls that completed.
    redos: AtomicU64,
}

impl LedgerStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_errors(&self, count: usize) {
        if count > 0 {
            self.handler_errors.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_eviction(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self, count: usize) {
        self.abandoned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_undo(&self) {
        self.undos.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redo(&self) {
        self.redos.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of appended events.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Returns the number of published diagnostics.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Returns the number of failed handler invocations.
    pub fn handler_errors(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of evicted events.
    ///
    /// A steadily growing value indicates a long offline period.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Returns the number of failed persistence attempts.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of abandoned events.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self, persistence_degraded: bool) -> StatsSnapshot {
        StatsSnapshot {
            emitted: self.emitted(),
            published: self.published(),
            handler_errors: self.handler_errors(),
            evicted: self.evicted(),
            persist_failures: self.persist_failures(),
            abandoned: self.abandoned(),
            undos: self.undos.load(Ordering::Relaxed),
            redos: self.redos.load(Ordering::Relaxed),
            persistence_degraded,
        }
    }
}

/// A point-in-time copy of [`LedgerStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Events appended through `emit`.
    pub emitted: u64,
    /// Local diagnostics published.
    pub published: u64,
    /// Failed handler invocations.
    pub handler_errors: u64,
    /// Events evicted for space.
    pub evicted: u64,
    /// Failed persistence attempts.
    pub persist_failures: u64,
    /// Events abandoned after the delivery attempt limit.
    pub abandoned: u64,
    /// Completed undos.
    pub undos: u64,
    /// Completed redos.
    pub redos: u64,
    /// Queue writes are currently failing.
    pub persistence_degraded: bool,
}
