//! Dump command implementation.

use super::inspect::parse_status;
use super::load_queue;
use opsledger_core::{Event, SyncStatus};
use std::path::Path;

/// Selects the events to print, in stored order.
pub fn select(events: Vec<Event>, status: Option<SyncStatus>, limit: Option<usize>) -> Vec<Event> {
    events
        .into_iter()
        .filter(|e| status.is_none_or(|s| e.sync_status == s))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    key: &str,
    status: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = status.map(parse_status).transpose()?;
    let events = select(load_queue(path, key)?, status, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        _ => {
            print_text_output(&events);
        }
    }

    Ok(())
}

fn print_text_output(events: &[Event]) {
    println!(
        "{:<36}  {:<13}  {:<7}  {:>5}  {:<12}  KIND",
        "ID", "TIMESTAMP", "STATUS", "RETRY", "SCOPE"
    );
    for event in events {
        println!("{}", format_line(event));
    }
    println!();
    println!("{} event(s)", events.len());
}

fn format_line(event: &Event) -> String {
    format!(
        "{:<36}  {:<13}  {:<7}  {:>5}  {:<12}  {} {}",
        event.id.to_string(),
        event.timestamp,
        event.sync_status.as_str(),
        event.retry_count,
        event.operation_scope.as_deref().unwrap_or("-"),
        event.kind,
        event.payload
    )
}
