//! # opsledger testkit
//!
//! Test utilities for opsledger.
//!
//! This crate provides:
//! - Event log fixtures over in-memory and temporary-directory stores
//! - A scripted sync transport for replaying delivery outcomes
//! - An application-state model that implements the reverse-action port
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use opsledger_testkit::prelude::*;
//!
//! #[test]
//! fn emits_survive_reopen() {
//!     let mut ledger = FileLedger::new();
//!     ledger.emit("case.registered", serde_json::json!({}));
//!     ledger.reopen();
//!     assert_eq!(ledger.pending_count(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod model;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::transport::*;
}

pub use fixtures::*;
pub use generators::*;
pub use model::*;
pub use transport::*;
