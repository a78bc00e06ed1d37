//! In-memory blob store for testing.

use crate::backend::{validate_key, BlobStore};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory blob store.
///
/// This store keeps all blobs in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need to survive a restart
///
/// It can also simulate an unreachable store: after
/// `set_available(false)` every call fails with
/// [`StorageError::Unavailable`] until availability is restored. Blobs
/// written before the outage are kept.
///
/// # Example
///
/// ```rust
/// use opsledger_storage::{BlobStore, InMemoryBlobStore};
///
/// let store = InMemoryBlobStore::new();
/// store.write("k", b"v").unwrap();
/// store.set_available(false);
/// assert!(store.write("k", b"w").is_err());
/// store.set_available(true);
/// assert_eq!(store.read("k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryBlobStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    /// Creates a store that already holds one blob.
    ///
    /// Useful for testing recovery from a previous session, including
    /// recovery from corrupt blobs.
    #[must_use]
    pub fn with_blob(key: &str, data: Vec<u8>) -> Self {
        let store = Self::new();
        store.blobs.write().insert(key.to_string(), data);
        store
    }

    /// Makes every subsequent call succeed (`true`) or fail (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the keys currently stored.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.blobs.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable(
                "in-memory store marked unavailable".into(),
            ))
        }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.check_available()?;
        Ok(self.blobs.read().get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.check_available()?;
        self.blobs.write().insert(key.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.check_available()?;
        self.blobs.write().remove(key);
        Ok(())
    }
}
