//! Events: the atomic unit of change.
//!
//! An [`Event`] is stamped once at emit time and never changes afterwards,
//! except for its [`SyncStatus`] and `retry_count`, which only the sync
//! reconciliation path updates.

mod id;

pub use id::{EventId, EventIdGenerator};

use crate::history::ReverseAction;
use crate::identity::NetworkType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

/// Kinds the core itself emits or publishes.
pub mod kinds {
    /// Bookkeeping event emitted after a successful undo.
    pub const UNDO_PERFORMED: &str = "history.undo_performed";
    /// Emitted by the connectivity monitor when the network comes back.
    pub const CONNECTIVITY_RESTORED: &str = "connectivity.restored";
    /// Emitted by the connectivity monitor when the network goes away.
    pub const CONNECTIVITY_LOST: &str = "connectivity.lost";

    /// Local diagnostic: the queue evicted an event to stay within bounds.
    pub const QUEUE_OVERFLOW: &str = "ledger.queue_overflow";
    /// Local diagnostic: queue writes are failing.
    pub const PERSISTENCE_DEGRADED: &str = "ledger.persistence_degraded";
    /// Local diagnostic: queue writes succeed again.
    pub const PERSISTENCE_RESTORED: &str = "ledger.persistence_restored";
    /// Local diagnostic: an event hit the delivery attempt limit.
    pub const DELIVERY_ABANDONED: &str = "ledger.delivery_abandoned";
    /// Local diagnostic: a sync cycle started delivering a batch.
    pub const SYNC_STARTED: &str = "sync.started";
    /// Local diagnostic: a sync cycle finished without transport failure.
    pub const SYNC_COMPLETED: &str = "sync.completed";
    /// Local diagnostic: a sync cycle's delivery failed.
    pub const SYNC_FAILED: &str = "sync.failed";
}

/// Dot-namespaced event kind tag, e.g. `"county.added"`.
///
/// The taxonomy is defined by callers; the core only compares kinds for
/// equality.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(String);

impl EventKind {
    /// Creates a kind from a tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKind({})", self.0)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKind {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl From<&EventKind> for EventKind {
    fn from(kind: &EventKind) -> Self {
        kind.clone()
    }
}

impl Borrow<str> for EventKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for EventKind {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EventKind {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Synchronization status of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Not yet confirmed by the remote endpoint.
    Pending,
    /// Confirmed by the remote endpoint.
    Synced,
    /// Gave up after the configured number of delivery attempts.
    Failed,
}

impl SyncStatus {
    /// Returns the lowercase name used by diagnostics output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive context captured at emit time. Never used for logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Network type reported by the network probe.
    pub network_type: NetworkType,
    /// Client description (application name, version, platform).
    pub user_agent: String,
    /// Milliseconds since the emitting session started.
    pub session_elapsed_ms: u64,
}

/// An immutable record of one state-changing action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique, time-ordered identifier.
    pub id: EventId,
    /// Kind tag.
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch, assigned at emit time.
    pub timestamp: u64,
    /// Who emitted the event.
    pub actor_id: String,
    /// Process session the event was emitted in.
    pub session_id: String,
    /// Installation the event was emitted on.
    pub device_id: String,
    /// Aggregate (disaster operation) this event belongs to.
    pub operation_scope: Option<String>,
    /// Opaque caller data.
    pub payload: Value,
    /// Descriptive context.
    pub metadata: EventMetadata,
    /// Whether a reverse action was available when the event was emitted.
    pub reversible: bool,
    /// Sync status; only reconciliation changes it.
    pub sync_status: SyncStatus,
    /// Number of failed delivery attempts.
    pub retry_count: u32,
}

impl Event {
    /// Returns true if the event belongs to `scope` (`None` matches all).
    #[must_use]
    pub fn in_scope(&self, scope: Option<&str>) -> bool {
        match scope {
            None => true,
            Some(scope) => self.operation_scope.as_deref() == Some(scope),
        }
    }

    /// Returns true if the event is still awaiting delivery.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }
}

/// Options accepted by `EventLog::emit_with`.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Push the event onto the undo history.
    pub reversible: bool,
    /// How to undo the event within this process.
    pub reverse_action: Option<ReverseAction>,
    /// Aggregate the event belongs to.
    pub operation_scope: Option<String>,
}

impl EmitOptions {
    /// Options for a plain, non-reversible event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the event reversible through `action`.
    #[must_use]
    pub fn reversible(mut self, action: ReverseAction) -> Self {
        self.reversible = true;
        self.reverse_action = Some(action);
        self
    }

    /// Scopes the event to an operation.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.operation_scope = Some(scope.into());
        self
    }
}
