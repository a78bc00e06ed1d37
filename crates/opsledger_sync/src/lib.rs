//! # opsledger sync
//!
//! Delivery of the event log's pending queue to a remote endpoint.
//!
//! This crate provides:
//! - The sync cycle state machine (idle → draining → delivering → completed/failed)
//! - A single-flight driver that coalesces overlapping triggers
//! - Capped exponential backoff driven by pending retry counts
//! - The [`SyncTransport`] boundary and a [`MockTransport`] for tests
//! - A connectivity monitor that emits restored/lost events
//!
//! ## Key Invariants
//!
//! - Only one batch is ever being delivered at a time
//! - Exactly the confirmed subset of a batch is marked synced
//! - The driver never drops events; only queue size pressure evicts

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod driver;
mod error;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::ConnectivityMonitor;
pub use driver::{SyncDriver, SyncHandle};
pub use error::{SyncError, SyncResult};
pub use state::{CycleOutcome, SyncState, SyncStats};
pub use transport::{DeliveryReport, MockTransport, SyncTransport};
