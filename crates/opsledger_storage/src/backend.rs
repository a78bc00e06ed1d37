//! Blob store trait definition.

use crate::error::{StorageError, StorageResult};

/// Maximum length of a storage key in bytes.
pub const MAX_KEY_LEN: usize = 128;

/// A keyed blob store.
///
/// Stores are **opaque**. The event log owns the encoding of everything it
/// writes; a store only remembers the last blob written under each key.
///
/// # Invariants
///
/// - `read` returns exactly the bytes of the last successful `write` for
///   that key, or `None` if the key was never written or was removed
/// - a failed `write` leaves the previous blob readable
/// - stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBlobStore`] - For testing
/// - [`super::FileBlobStore`] - For persistent storage
pub trait BlobStore: Send + Sync {
    /// Reads the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the store cannot be read.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the blob stored under `key`.
    ///
    /// After this returns successfully the new blob is durable as far as
    /// the store can guarantee it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the blob stored under `key`. Removing a missing key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the removal fails.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns true if a blob is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the store cannot be read.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.read(key)?.is_some())
    }
}

/// Checks that `key` can be used with every store implementation.
///
/// Keys are 1..=[`MAX_KEY_LEN`] bytes of ASCII letters, digits, `_`, `-`
/// and `.`, and may not start with a dot.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first problem found.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let reject = |reason| {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return reject("key is empty");
    }
    if key.len() > MAX_KEY_LEN {
        return reject("key is too long");
    }
    if key.starts_with('.') {
        return reject("key starts with a dot");
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return reject("key contains unsupported characters");
    }
    Ok(())
}
