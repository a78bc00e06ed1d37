//! Inspect command implementation.

use super::{load_queue, CliError};
use opsledger_core::{Event, SyncStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Label used for events without an operation scope.
const UNSCOPED: &str = "(none)";

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct QueueSummary {
    /// Store directory.
    pub path: String,
    /// Storage key.
    pub key: String,
    /// Number of queued events.
    pub total: usize,
    /// Event count per sync status.
    pub by_status: BTreeMap<String, usize>,
    /// Event count per kind.
    pub by_kind: BTreeMap<String, usize>,
    /// Event count per operation scope.
    pub by_scope: BTreeMap<String, usize>,
    /// Timestamp (ms) of the oldest pending event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending: Option<u64>,
    /// Highest retry count in the queue.
    pub max_retry_count: u32,
}

/// Builds the summary of `events`.
pub fn summarize(path: &Path, key: &str, events: &[Event]) -> QueueSummary {
    let mut by_status: BTreeMap<String, usize> =
        [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Failed]
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
    let mut by_kind = BTreeMap::new();
    let mut by_scope = BTreeMap::new();

    for event in events {
        *by_status.entry(event.sync_status.as_str().to_string()).or_insert(0) += 1;
        *by_kind.entry(event.kind.to_string()).or_insert(0) += 1;
        let scope = event.operation_scope.as_deref().unwrap_or(UNSCOPED);
        *by_scope.entry(scope.to_string()).or_insert(0) += 1;
    }

    QueueSummary {
        path: path.display().to_string(),
        key: key.to_string(),
        total: events.len(),
        by_status,
        by_kind,
        by_scope,
        oldest_pending: events
            .iter()
            .filter(|e| e.is_pending())
            .map(|e| e.timestamp)
            .min(),
        max_retry_count: events.iter().map(|e| e.retry_count).max().unwrap_or(0),
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, key: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let events = load_queue(path, key)?;
    let summary = summarize(path, key, &events);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            print_text_output(&summary);
        }
    }

    Ok(())
}

fn print_text_output(summary: &QueueSummary) {
    println!("opsledger Queue Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", summary.path);
    println!("Key:  {}", summary.key);
    println!();
    println!("Events: {}", summary.total);
    for (status, count) in &summary.by_status {
        println!("  {status:<8} {count}");
    }
    println!();
    match summary.oldest_pending {
        Some(ts) => println!("Oldest pending:  {ts} ms"),
        None => println!("Oldest pending:  -"),
    }
    println!("Max retry count: {}", summary.max_retry_count);

    print_counts("Kinds", &summary.by_kind);
    print_counts("Scopes", &summary.by_scope);
}

fn print_counts(title: &str, counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!();
    println!("{title}:");
    for (name, count) in counts {
        println!("  {name}: {count}");
    }
}

/// Parses a `--status` value.
pub fn parse_status(value: &str) -> Result<SyncStatus, CliError> {
    match value.to_ascii_lowercase().as_str() {
        "pending" => Ok(SyncStatus::Pending),
        "synced" => Ok(SyncStatus::Synced),
        "failed" => Ok(SyncStatus::Failed),
        _ => Err(CliError::InvalidStatus(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::event;

    #[test]
    fn summary_counts_everything() {
        let mut events = vec![
            event(1, "case.registered", Some("flood"), SyncStatus::Synced),
            event(2, "case.registered", None, SyncStatus::Pending),
            event(3, "team.dispatched", Some("flood"), SyncStatus::Pending),
        ];
        events[2].retry_count = 4;

        let summary = summarize(Path::new("/data"), "event_queue", &events);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_status["pending"], 2);
        assert_eq!(summary.by_status["synced"], 1);
        assert_eq!(summary.by_status["failed"], 0);
        assert_eq!(summary.by_kind["case.registered"], 2);
        assert_eq!(summary.by_scope["flood"], 2);
        assert_eq!(summary.by_scope[UNSCOPED], 1);
        assert_eq!(summary.oldest_pending, Some(events[1].timestamp));
        assert_eq!(summary.max_retry_count, 4);
    }

    #[test]
    fn empty_queue_has_no_oldest_pending() {
        let summary = summarize(Path::new("/data"), "event_queue", &[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.oldest_pending, None);
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("oldest_pending").is_none());
    }

    #[test]
    fn status_parsing() {
        assert_eq!(parse_status("Pending").unwrap(), SyncStatus::Pending);
        assert_eq!(parse_status("failed").unwrap(), SyncStatus::Failed);
        assert!(matches!(
            parse_status("done"),
            Err(CliError::InvalidStatus(_))
        ));
    }
}
