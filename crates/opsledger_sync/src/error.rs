//! Error types for the sync driver.

use opsledger_core::LedgerError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while delivering events.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the delivery can be retried.
        retryable: bool,
    },

    /// The transport did not answer within the delivery timeout.
    #[error("delivery timed out")]
    Timeout,

    /// Not connected to the remote endpoint.
    #[error("not connected to remote endpoint")]
    NotConnected,

    /// Event log error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The driver was stopped.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected => true,
            SyncError::Ledger(e) => e.is_persistence(),
            SyncError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_by_variant() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn messages_name_the_cause() {
        assert_eq!(
            SyncError::NotConnected.to_string(),
            "not connected to remote endpoint"
        );
        let err = SyncError::from(LedgerError::Closed);
        assert!(err.to_string().starts_with("ledger error"));
    }
}
