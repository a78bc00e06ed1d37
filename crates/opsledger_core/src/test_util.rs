//! Shared helpers for unit tests.

use crate::event::{Event, EventIdGenerator, EventMetadata, SyncStatus};
use crate::identity::NetworkType;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct EventFactory {
    ids: EventIdGenerator,
    now: AtomicU64,
}

impl EventFactory {
    pub(crate) fn new() -> Self {
        Self {
            ids: EventIdGenerator::new(),
            now: AtomicU64::new(1_700_000_000_000),
        }
    }

    pub(crate) fn make(&self, kind: &str) -> Event {
        let now = self.now.fetch_add(1, Ordering::SeqCst);
        build(self.ids.next_id(now), now, kind, None)
    }

    pub(crate) fn make_scoped(&self, kind: &str, scope: &str) -> Event {
        let mut event = self.make(kind);
        event.operation_scope = Some(scope.to_string());
        event
    }
}

/// An event minted at millisecond `n`.
pub(crate) fn event_at(n: u64, kind: &str) -> Event {
    build(EventIdGenerator::new().next_id(n), n, kind, None)
}

fn build(id: crate::event::EventId, now: u64, kind: &str, scope: Option<String>) -> Event {
    Event {
        id,
        kind: kind.into(),
        timestamp: now,
        actor_id: "tester".into(),
        session_id: "session".into(),
        device_id: "device".into(),
        operation_scope: scope,
        payload: json!({ "at": now }),
        metadata: EventMetadata {
            network_type: NetworkType::Wifi,
            user_agent: "opsledger-tests".into(),
            session_elapsed_ms: now,
        },
        reversible: false,
        sync_status: SyncStatus::Pending,
        retry_count: 0,
    }
}
