//! File-based blob store for persistent storage.

use crate::backend::{validate_key, BlobStore};
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A file-based blob store.
///
/// Each key maps to one file inside the store directory. Data survives
/// process restarts.
///
/// # Durability
///
/// `write` never modifies the live file in place. The blob goes to a
/// hidden temporary sibling, which is `sync_all`ed and then renamed over
/// the target, so readers (and the next process) see either the old blob
/// or the new one, never a torn mix.
///
/// # Thread Safety
///
/// Writers within one process are serialized by an internal lock. The
/// directory is expected to have a single writing process.
///
/// # Example
///
/// ```no_run
/// use opsledger_storage::{BlobStore, FileBlobStore};
/// use std::path::Path;
///
/// let store = FileBlobStore::open(Path::new("ledger-data")).unwrap();
/// store.write("event_queue", b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBlobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBlobStore {
    /// Opens a store rooted at `dir`, creating the directory (and its
    /// parents) if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the file that holds the blob for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid.
    pub fn blob_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{key}.tmp"))
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> io::Result<()> {
        File::open(&self.dir)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        let tmp = self.temp_path(key);
        let _guard = self.write_lock.lock();

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        self.sync_dir()?;

        tracing::trace!(key, bytes = data.len(), "blob written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn file_create_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("store");

        let store = FileBlobStore::open(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.path(), nested);
    }

    #[test]
    fn file_missing_key_reads_none() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        assert_eq!(store.read("event_queue").unwrap(), None);
    }

    #[test]
    fn file_write_replaces_blob() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();

        store.write("event_queue", b"a much longer first blob").unwrap();
        store.write("event_queue", b"short").unwrap();

        assert_eq!(store.read("event_queue").unwrap(), Some(b"short".to_vec()));
        assert!(!store.temp_path("event_queue").exists());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileBlobStore::open(dir.path()).unwrap();
            store.write("event_queue", b"persistent data").unwrap();
        }

        {
            let store = FileBlobStore::open(dir.path()).unwrap();
            assert_eq!(
                store.read("event_queue").unwrap(),
                Some(b"persistent data".to_vec())
            );
        }
    }

    #[test]
    fn file_stale_temp_file_is_ignored() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        store.write("event_queue", b"good").unwrap();

        // A crash between writing the temp file and renaming it.
        fs::write(store.temp_path("event_queue"), b"half-writ").unwrap();

        let reopened = FileBlobStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read("event_queue").unwrap(), Some(b"good".to_vec()));

        reopened.write("event_queue", b"next").unwrap();
        assert_eq!(reopened.read("event_queue").unwrap(), Some(b"next".to_vec()));
    }

    #[test]
    fn file_remove() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();

        store.write("device_id", b"abc").unwrap();
        assert!(store.contains("device_id").unwrap());

        store.remove("device_id").unwrap();
        store.remove("device_id").unwrap();
        assert!(!store.contains("device_id").unwrap());
    }

    #[test]
    fn file_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.write("../outside", b"x"),
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.read("nested/key"),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn last_write_wins(writes in prop::collection::vec(
            (0usize..3, prop::collection::vec(any::<u8>(), 0..64)),
            1..20,
        )) {
            let dir = tempdir().unwrap();
            let store = FileBlobStore::open(dir.path()).unwrap();
            let keys = ["a", "b", "c"];
            let mut model = HashMap::new();

            for (k, data) in &writes {
                store.write(keys[*k], data).unwrap();
                model.insert(keys[*k], data.clone());
            }

            for key in keys {
                prop_assert_eq!(store.read(key).unwrap(), model.get(key).cloned());
            }
        }
    }
}
