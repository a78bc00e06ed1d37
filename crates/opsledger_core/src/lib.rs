//! # opsledger core
//!
//! Local-first event log for offline data entry.
//!
//! This crate provides:
//! - The [`Event`] model with time-ordered UUIDv7 ids
//! - Clock, identity and network-type capabilities
//! - The [`EventLog`]: emit, subscribe, undo/redo and the pending sync queue
//! - A durable queue store persisting the queue as one CBOR blob
//!
//! Delivery of pending events to a remote endpoint lives in
//! `opsledger_sync`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod event;
mod history;
mod identity;
mod log;
mod queue;
mod stats;
mod subscription;

#[cfg(test)]
mod test_util;

pub use config::LedgerConfig;
pub use error::{HandlerError, HandlerResult, LedgerError, LedgerResult};
pub use event::{
    kinds, EmitOptions, Event, EventId, EventIdGenerator, EventKind, EventMetadata, SyncStatus,
};
pub use history::{History, HistoryEntry, ReverseAction, ReverseHandler, UndoRedoStatus};
pub use identity::{
    Clock, FixedNetwork, Identity, ManualClock, NetworkProbe, NetworkType, SystemClock,
    ANONYMOUS_ACTOR, DEVICE_ID_KEY,
};
pub use log::{EventLog, REQUEST_ID_FIELD};
pub use queue::{decode_queue, encode_queue, EventQueue, QueueStore};
pub use stats::{LedgerStats, StatsSnapshot};
pub use subscription::{Handler, Kinds, Once, SubscriptionHandle};
