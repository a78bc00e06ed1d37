//! Error types for the opsledger core.

use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error returned by a subscriber's handler or by a reverse handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by subscriber handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Errors that can occur in opsledger core operations.
///
/// Ordinary application flow (`emit`, `subscribe`, `undo`, `redo`) never
/// returns these; failures there are absorbed and logged. Only `request`
/// surfaces [`LedgerError::Timeout`], and only persistence-facing helpers
/// such as `flush` surface the others.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] opsledger_storage::StorageError),

    /// The persisted queue blob could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The durable queue store is not accepting writes; the log keeps
    /// running in memory and retries later.
    #[error("persistence degraded: {0}")]
    PersistenceDegraded(String),

    /// No matching response arrived in time.
    #[error("no {kind} event arrived within {waited:?}")]
    Timeout {
        /// The response kind that was awaited.
        kind: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The event log was shut down while the caller was waiting.
    #[error("event log is closed")]
    Closed,

    /// A reverse action could not be applied.
    #[error("reverse action failed: {0}")]
    ReverseFailed(String),
}

impl LedgerError {
    /// Returns true if this error came from the persistence path.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(_) | LedgerError::Codec(_) | LedgerError::PersistenceDegraded(_)
        )
    }
}
