//! Event log fixtures.
//!
//! Provides logs wired to a manual clock, a fixed identity and a store
//! the test can inspect, fault or reopen.

use opsledger_core::{Clock, EventId, EventLog, Identity, LedgerConfig, ManualClock};
use opsledger_storage::{BlobStore, FileBlobStore, InMemoryBlobStore};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Clock reading every fixture starts from.
pub const FIXTURE_EPOCH_MS: u64 = 1_767_225_600_000;

/// Device id every fixture identity uses.
pub const FIXTURE_DEVICE: &str = "device-under-test";

fn open_log(
    config: &LedgerConfig,
    store: Arc<dyn BlobStore>,
    clock: &Arc<ManualClock>,
) -> EventLog {
    let identity = Arc::new(Identity::new(FIXTURE_DEVICE, "opsledger-testkit", clock.as_ref()));
    let clock: Arc<dyn Clock> = Arc::clone(clock) as Arc<dyn Clock>;
    EventLog::open(config.clone(), store, identity, clock)
}

/// An event log over an in-memory store.
pub struct TestLedger {
    /// The event log instance.
    pub log: EventLog,
    /// The backing store; use `set_available` to inject faults.
    pub store: Arc<InMemoryBlobStore>,
    /// The clock stamped into events.
    pub clock: Arc<ManualClock>,
    config: LedgerConfig,
}

impl TestLedger {
    /// Creates a log with the default configuration.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    /// Creates a log with `config`.
    pub fn with_config(config: LedgerConfig) -> Self {
        let store = Arc::new(InMemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MS));
        let log = open_log(&config, store.clone(), &clock);
        Self {
            log,
            store,
            clock,
            config,
        }
    }

    /// Shuts the log down and opens a new one over the same store,
    /// simulating a process restart.
    pub fn reopen(&mut self) {
        self.log.shutdown();
        self.log = open_log(&self.config, self.store.clone(), &self.clock);
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestLedger {
    type Target = EventLog;

    fn deref(&self) -> &Self::Target {
        &self.log
    }
}

impl Drop for TestLedger {
    fn drop(&mut self) {
        self.log.shutdown();
    }
}

/// An event log over a [`FileBlobStore`] in a temporary directory.
pub struct FileLedger {
    /// The event log instance.
    pub log: EventLog,
    /// The clock stamped into events.
    pub clock: Arc<ManualClock>,
    config: LedgerConfig,
    temp_dir: TempDir,
}

impl FileLedger {
    /// Creates a file-backed log with the default configuration.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    /// Creates a file-backed log with `config`.
    pub fn with_config(config: LedgerConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH_MS));
        let log = open_log(&config, Self::store_at(temp_dir.path()), &clock);
        Self {
            log,
            clock,
            config,
            temp_dir,
        }
    }

    fn store_at(dir: &Path) -> Arc<dyn BlobStore> {
        Arc::new(FileBlobStore::open(dir).expect("Failed to open file store"))
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Shuts the log down and opens a new one over the same directory.
    pub fn reopen(&mut self) {
        self.log.shutdown();
        self.log = open_log(&self.config, Self::store_at(self.temp_dir.path()), &self.clock);
    }
}

impl Default for FileLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for FileLedger {
    type Target = EventLog;

    fn deref(&self) -> &Self::Target {
        &self.log
    }
}

impl Drop for FileLedger {
    fn drop(&mut self) {
        self.log.shutdown();
    }
}

/// Runs a test with a temporary in-memory event log.
///
/// # Example
///
/// ```rust,ignore
/// use opsledger_testkit::with_temp_ledger;
///
/// #[test]
/// fn my_test() {
///     with_temp_ledger(|log| {
///         log.emit("case.registered", serde_json::json!({}));
///     });
/// }
/// ```
pub fn with_temp_ledger<F, R>(f: F) -> R
where
    F: FnOnce(&EventLog) -> R,
{
    let ledger = TestLedger::new();
    f(&ledger.log)
}

/// Emits `count` numbered `case.registered` events and returns their ids.
pub fn emit_cases(log: &EventLog, count: usize) -> Vec<EventId> {
    (0..count)
        .map(|n| log.emit("case.registered", json!({ "case": n })))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_reopen_restores_queue() {
        let mut ledger = TestLedger::new();
        let ids = emit_cases(&ledger, 3);
        ledger.reopen();
        let restored: Vec<_> = ledger.queue().iter().map(|e| e.id).collect();
        assert_eq!(restored, ids);
    }

    #[test]
    fn file_ledger_reopen_restores_queue() {
        let mut ledger = FileLedger::new();
        emit_cases(&ledger, 2);
        ledger.reopen();
        assert_eq!(ledger.pending_count(), 2);
        assert!(ledger.path().exists());
    }

    #[test]
    fn fixture_events_use_the_manual_clock() {
        let ledger = TestLedger::new();
        ledger.clock.advance(5);
        ledger.emit("case.registered", json!({}));
        let event = &ledger.queue()[0];
        assert_eq!(event.timestamp, FIXTURE_EPOCH_MS + 5);
        assert_eq!(event.device_id, FIXTURE_DEVICE);
    }

    #[test]
    fn with_temp_ledger_returns_closure_value() {
        let pending = with_temp_ledger(|log| {
            emit_cases(log, 4);
            log.pending_count()
        });
        assert_eq!(pending, 4);
    }
}
