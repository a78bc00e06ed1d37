//! # opsledger storage
//!
//! Keyed blob storage engine for the opsledger event log.
//!
//! This crate provides the lowest-level persistence abstraction used by
//! the event log. Stores are **opaque blob stores** - they map a short
//! string key to a byte blob and never interpret the bytes they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple keyed blobs (read, write, remove)
//! - No knowledge of events, queues or their encoding
//! - Must be `Send + Sync` so one store can be shared by the log and its
//!   background persister
//! - A write either replaces the whole blob or leaves the previous one
//!
//! ## Available Stores
//!
//! - [`InMemoryBlobStore`] - For testing and ephemeral sessions
//! - [`FileBlobStore`] - For persistent storage, one file per key
//!
//! ## Example
//!
//! ```rust
//! use opsledger_storage::{BlobStore, InMemoryBlobStore};
//!
//! let store = InMemoryBlobStore::new();
//! store.write("event_queue", b"hello").unwrap();
//! assert_eq!(store.read("event_queue").unwrap().as_deref(), Some(&b"hello"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_key, BlobStore, MAX_KEY_LEN};
pub use error::{StorageError, StorageResult};
pub use file::FileBlobStore;
pub use memory::InMemoryBlobStore;
