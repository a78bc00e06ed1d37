//! Verify command implementation.

use super::{read_blob, CliError};
use opsledger_core::{decode_queue, Event};
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of events checked.
    pub events_checked: usize,
    /// List of problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks that ids are unique and strictly increasing in stored order.
pub fn check(events: &[Event]) -> VerifyResult {
    let mut result = VerifyResult {
        events_checked: events.len(),
        errors: Vec::new(),
    };
    let mut seen = HashSet::with_capacity(events.len());

    for (index, event) in events.iter().enumerate() {
        if !seen.insert(event.id) {
            result
                .errors
                .push(format!("Duplicate id {} at position {}", event.id, index));
        }
        if index > 0 && events[index - 1].id >= event.id {
            result.errors.push(format!(
                "Out-of-order id at position {}: {} follows {}",
                index,
                event.id,
                events[index - 1].id
            ));
        }
    }

    result
}

/// Runs the verify command.
pub fn run(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying queue {key:?} at {path:?}");
    println!();

    let bytes = read_blob(path, key)?;
    let result = match decode_queue(&bytes) {
        Ok(events) => check(&events),
        Err(e) => VerifyResult {
            events_checked: 0,
            errors: vec![format!("Queue blob does not decode: {e}")],
        },
    };

    println!("Events checked: {}", result.events_checked);
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Queue verification passed");
        Ok(())
    } else {
        println!("✗ Queue verification failed");
        Err(CliError::VerificationFailed(result.errors.len()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{event, write_queue};
    use opsledger_core::SyncStatus;
    use opsledger_storage::{BlobStore, FileBlobStore};

    #[test]
    fn ordered_queue_passes() {
        let events: Vec<_> = (1..=3)
            .map(|n| event(n, "a", None, SyncStatus::Pending))
            .collect();
        assert!(check(&events).is_ok());
    }

    #[test]
    fn duplicates_and_reordering_are_reported() {
        let a = event(1, "a", None, SyncStatus::Pending);
        let b = event(2, "b", None, SyncStatus::Pending);
        let result = check(&[b.clone(), a, b]);
        assert_eq!(result.events_checked, 3);
        assert!(result.errors.iter().any(|e| e.starts_with("Duplicate id")));
        assert!(result.errors.iter().any(|e| e.starts_with("Out-of-order")));
    }

    #[test]
    fn run_fails_on_corrupt_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        store.write("event_queue", b"not cbor at all").unwrap();
        assert!(run(dir.path(), "event_queue").is_err());

        let events = vec![event(1, "a", None, SyncStatus::Synced)];
        write_queue(dir.path(), "event_queue", &events);
        assert!(run(dir.path(), "event_queue").is_ok());
    }
}
