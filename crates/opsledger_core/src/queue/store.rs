//! Durable queue store: the queue blob on top of a [`BlobStore`].
//!
//! The blob is the CBOR encoding of the ordered event array, written under
//! a single key. Diagnostics tools may decode it with [`decode_queue`].

use crate::error::{LedgerError, LedgerResult};
use crate::event::Event;
use opsledger_storage::BlobStore;
use std::sync::Arc;

/// Encodes a queue snapshot into its persisted form.
///
/// # Errors
///
/// Returns [`LedgerError::Codec`] if a payload cannot be encoded.
pub fn encode_queue(events: &[Event]) -> LedgerResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(events, &mut buf).map_err(|e| LedgerError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a persisted queue blob.
///
/// # Errors
///
/// Returns [`LedgerError::Codec`] if the blob is truncated or malformed.
pub fn decode_queue(bytes: &[u8]) -> LedgerResult<Vec<Event>> {
    ciborium::from_reader(bytes).map_err(|e| LedgerError::Codec(e.to_string()))
}

/// Loads and saves the queue blob.
#[derive(Clone)]
pub struct QueueStore {
    backend: Arc<dyn BlobStore>,
    key: String,
}

impl QueueStore {
    /// Creates a queue store writing under `key`.
    pub fn new(backend: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    /// Returns the storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replaces the persisted queue with `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the storage write fails.
    pub fn save(&self, events: &[Event]) -> LedgerResult<()> {
        let blob = encode_queue(events)?;
        self.backend.write(&self.key, &blob)?;
        Ok(())
    }

    /// Loads the persisted queue.
    ///
    /// A missing blob yields `Ok(None)`. A corrupt blob is logged and also
    /// yields `Ok(None)` so the caller starts with an empty queue.
    ///
    /// # Errors
    ///
    /// Returns an error only if the storage engine cannot be read.
    pub fn load(&self) -> LedgerResult<Option<Vec<Event>>> {
        let Some(blob) = self.backend.read(&self.key)? else {
            return Ok(None);
        };
        match decode_queue(&blob) {
            Ok(events) => Ok(Some(events)),
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    bytes = blob.len(),
                    error = %e,
                    "persisted queue is corrupt, starting with an empty queue"
                );
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SyncStatus;
    use crate::test_util::EventFactory;
    use opsledger_storage::{FileBlobStore, InMemoryBlobStore};
    use serde_json::json;

    #[test]
    fn save_then_load_preserves_queue() {
        let factory = EventFactory::new();
        let mut a = factory.make("county.added");
        a.payload = json!({ "county": "Hillsborough", "population": 1_459_762, "ratio": 0.25 });
        let mut b = factory.make_scoped("iap.section.edited", "op-2024-helene");
        b.sync_status = SyncStatus::Synced;
        let mut c = factory.make("facility.opened");
        c.retry_count = 4;
        c.payload = json!([null, true, "shelter", { "beds": 120 }]);
        let events = vec![a, b, c];

        let store = QueueStore::new(Arc::new(InMemoryBlobStore::new()), "event_queue");
        store.save(&events).unwrap();

        assert_eq!(store.load().unwrap(), Some(events));
    }

    #[test]
    fn missing_blob_loads_none() {
        let store = QueueStore::new(Arc::new(InMemoryBlobStore::new()), "event_queue");
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn corrupt_blob_loads_none() {
        let backend = InMemoryBlobStore::with_blob("event_queue", vec![0x9f, 0x01, 0xff, 0x42]);
        let store = QueueStore::new(Arc::new(backend), "event_queue");
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn truncated_blob_loads_none() {
        let factory = EventFactory::new();
        let blob = encode_queue(&[factory.make("a"), factory.make("b")]).unwrap();
        let backend = InMemoryBlobStore::with_blob("event_queue", blob[..blob.len() / 2].to_vec());
        let store = QueueStore::new(Arc::new(backend), "event_queue");
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn unavailable_backend_is_an_error() {
        let backend = Arc::new(InMemoryBlobStore::new());
        backend.set_available(false);
        let store = QueueStore::new(backend, "event_queue");
        assert!(store.load().is_err());
        assert!(store.save(&[]).is_err());
    }

    #[test]
    fn file_backed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let factory = EventFactory::new();
        let events = vec![factory.make("a"), factory.make("b")];

        {
            let backend = Arc::new(FileBlobStore::open(dir.path()).unwrap());
            QueueStore::new(backend, "event_queue").save(&events).unwrap();
        }

        let backend = Arc::new(FileBlobStore::open(dir.path()).unwrap());
        let loaded = QueueStore::new(backend, "event_queue").load().unwrap();
        assert_eq!(loaded, Some(events));
    }
}
