//! A small application-state model for undo/redo tests.
//!
//! [`RecordStore`] keeps records in named collections. Forward changes are
//! made by emitting `record.upserted` / `record.deleted` events; the store
//! applies them from its own subscription, so a redo (which re-emits the
//! event) re-applies the change. Undo goes through the store's
//! [`ReverseHandler`] implementation.

use async_trait::async_trait;
use opsledger_core::{
    EmitOptions, Event, EventId, EventLog, HandlerError, HandlerResult, ReverseAction,
    ReverseHandler, SubscriptionHandle,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of the event that inserts or replaces a record.
pub const RECORD_UPSERTED: &str = "record.upserted";

/// Kind of the event that deletes a record.
pub const RECORD_DELETED: &str = "record.deleted";

/// Collection name to record id to record.
pub type Records = BTreeMap<String, BTreeMap<String, Value>>;

/// In-memory application state driven by the event log.
pub struct RecordStore {
    records: Mutex<Records>,
    fail_next: AtomicBool,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl RecordStore {
    /// Creates an empty store, subscribes it to `log` and installs it as
    /// the log's reverse handler.
    pub fn attach(log: &EventLog) -> Arc<Self> {
        let store = Arc::new(Self {
            records: Mutex::new(Records::new()),
            fail_next: AtomicBool::new(false),
            subscription: Mutex::new(None),
        });
        let target = Arc::downgrade(&store);
        let handle = log.subscribe([RECORD_UPSERTED, RECORD_DELETED], move |event: &Event| {
            match target.upgrade() {
                Some(store) => store.apply_forward(event),
                None => Ok(()),
            }
        });
        *store.subscription.lock() = Some(handle);
        log.set_reverse_handler(store.clone());
        store
    }

    /// Inserts or replaces `target/id` through the log.
    pub fn upsert(&self, log: &EventLog, target: &str, id: &str, value: Value) -> EventId {
        let reverse = match self.get(target, id) {
            Some(previous) => ReverseAction::Restore {
                target: format!("{target}/{id}"),
                previous,
            },
            None => ReverseAction::Remove {
                target: target.to_string(),
                id: id.to_string(),
            },
        };
        log.emit_with(
            RECORD_UPSERTED,
            json!({ "target": target, "id": id, "value": value }),
            EmitOptions::new().reversible(reverse),
        )
    }

    /// Deletes `target/id` through the log. Returns `None` if absent.
    pub fn delete(&self, log: &EventLog, target: &str, id: &str) -> Option<EventId> {
        let previous = self.get(target, id)?;
        let reverse = ReverseAction::Reinsert {
            target: target.to_string(),
            record: json!({ "id": id, "value": previous }),
        };
        Some(log.emit_with(
            RECORD_DELETED,
            json!({ "target": target, "id": id }),
            EmitOptions::new().reversible(reverse),
        ))
    }

    /// Returns the record at `target/id`.
    pub fn get(&self, target: &str, id: &str) -> Option<Value> {
        self.records.lock().get(target)?.get(id).cloned()
    }

    /// Returns a copy of every record.
    pub fn snapshot(&self) -> Records {
        self.records.lock().clone()
    }

    /// Makes the next reverse action fail.
    pub fn fail_next_reverse(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Stops following the log.
    pub fn detach(&self) {
        if let Some(handle) = self.subscription.lock().take() {
            handle.unsubscribe();
        }
    }

    fn apply_forward(&self, event: &Event) -> HandlerResult {
        let target = field(&event.payload, "target")?;
        let id = field(&event.payload, "id")?;
        if event.kind == RECORD_UPSERTED {
            let value = event.payload.get("value").cloned().unwrap_or(Value::Null);
            self.put(target, id, value);
        } else {
            self.remove(target, id);
        }
        Ok(())
    }

    fn put(&self, target: &str, id: &str, value: Value) {
        self.records
            .lock()
            .entry(target.to_string())
            .or_default()
            .insert(id.to_string(), value);
    }

    fn remove(&self, target: &str, id: &str) {
        let mut records = self.records.lock();
        if let Some(collection) = records.get_mut(target) {
            collection.remove(id);
            if collection.is_empty() {
                records.remove(target);
            }
        }
    }
}

#[async_trait]
impl ReverseHandler for RecordStore {
    async fn apply(&self, action: &ReverseAction) -> Result<(), HandlerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err("injected reverse failure".into());
        }
        match action {
            ReverseAction::Restore { target, previous } => {
                let (collection, id) = target
                    .rsplit_once('/')
                    .ok_or_else(|| format!("malformed restore target {target}"))?;
                self.put(collection, id, previous.clone());
            }
            ReverseAction::Remove { target, id } => self.remove(target, id),
            ReverseAction::Reinsert { target, record } => {
                let id = field(record, "id")?;
                let value = record.get("value").cloned().unwrap_or(Value::Null);
                self.put(target, id, value);
            }
            ReverseAction::Compensate { .. } => {
                return Err("compensating actions are handled by the log".into());
            }
        }
        Ok(())
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a str, HandlerError> {
    value
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string field {name}").into())
}
