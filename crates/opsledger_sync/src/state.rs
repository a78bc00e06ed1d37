//! Sync cycle state machine and statistics.

use std::time::Instant;

/// Phase of the current sync cycle.
///
/// A cycle moves `Idle -> Draining -> Delivering -> {Completed | Failed}`
/// and back to `Idle` once the cycle releases the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No cycle is running.
    #[default]
    Idle,
    /// Reading the pending batch from the event log.
    Draining,
    /// Waiting for the transport.
    Delivering,
    /// The batch was delivered (possibly partially).
    Completed,
    /// The transport call failed.
    Failed,
}

impl SyncState {
    /// Returns true while a cycle holds the driver.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Draining | SyncState::Delivering)
    }
}

/// What a call to `run_cycle` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was pending.
    Idle,
    /// Connectivity is down; no delivery was attempted.
    Offline,
    /// Another cycle was running; it will run again when it finishes.
    Coalesced,
    /// The transport answered.
    Delivered {
        /// Events confirmed.
        synced: usize,
        /// Events the endpoint did not confirm.
        failed: usize,
    },
    /// The transport call failed for the whole batch.
    Failed {
        /// Events in the failed batch.
        failed: usize,
    },
}

impl CycleOutcome {
    /// Returns true if every event handed to the transport was confirmed.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Idle | CycleOutcome::Delivered { failed: 0, .. }
        )
    }
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles whose transport call returned a report.
    pub cycles_completed: u64,
    /// Cycles whose transport call failed.
    pub cycles_failed: u64,
    /// Events confirmed by the endpoint.
    pub events_synced: u64,
    /// Events marked failed after a delivery attempt.
    pub events_failed: u64,
    /// Triggers folded into an already running cycle.
    pub coalesced_triggers: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}
