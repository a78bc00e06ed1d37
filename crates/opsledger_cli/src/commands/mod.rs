//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use opsledger_core::{decode_queue, Event, LedgerError};
use opsledger_storage::{BlobStore, FileBlobStore, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading a persisted queue.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no blob under the key.
    #[error("no queue blob {key:?} found in {path:?}")]
    NoQueue {
        /// Store directory.
        path: PathBuf,
        /// Storage key.
        key: String,
    },

    /// The store could not be read.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The blob could not be decoded.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Unknown `--status` value.
    #[error("unknown status {0:?} (expected pending, synced or failed)")]
    InvalidStatus(String),

    /// `verify` found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),
}

/// Reads the raw queue blob stored under `key` in `path`.
pub fn read_blob(path: &Path, key: &str) -> Result<Vec<u8>, CliError> {
    if !path.is_dir() {
        return Err(CliError::NoQueue {
            path: path.to_path_buf(),
            key: key.to_string(),
        });
    }
    let store = FileBlobStore::open(path)?;
    let bytes = store.read(key)?.ok_or_else(|| CliError::NoQueue {
        path: path.to_path_buf(),
        key: key.to_string(),
    })?;
    tracing::debug!(path = ?path, key, bytes = bytes.len(), "read queue blob");
    Ok(bytes)
}

/// Reads and decodes the queue stored under `key` in `path`.
pub fn load_queue(path: &Path, key: &str) -> Result<Vec<Event>, CliError> {
    let events = decode_queue(&read_blob(path, key)?)?;
    tracing::debug!(events = events.len(), "decoded queue");
    Ok(events)
}

#[cfg(test)]
pub(crate) mod test_support {
    use opsledger_core::{
        encode_queue, Event, EventIdGenerator, EventMetadata, NetworkType, SyncStatus,
    };
    use opsledger_storage::{BlobStore, FileBlobStore};
    use serde_json::json;
    use std::path::Path;

    pub(crate) fn event(n: u64, kind: &str, scope: Option<&str>, status: SyncStatus) -> Event {
        Event {
            id: EventIdGenerator::new().next_id(1_700_000_000_000 + n),
            kind: kind.into(),
            timestamp: 1_700_000_000_000 + n,
            actor_id: "tester".into(),
            session_id: "session".into(),
            device_id: "device".into(),
            operation_scope: scope.map(str::to_string),
            payload: json!({ "n": n }),
            metadata: EventMetadata {
                network_type: NetworkType::Wifi,
                user_agent: "opsledger-cli-tests".into(),
                session_elapsed_ms: n,
            },
            reversible: false,
            sync_status: status,
            retry_count: 0,
        }
    }

    pub(crate) fn write_queue(dir: &Path, key: &str, events: &[Event]) {
        let store = FileBlobStore::open(dir).unwrap();
        store.write(key, &encode_queue(events).unwrap()).unwrap();
    }
}
