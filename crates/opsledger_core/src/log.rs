//! The event log: the single in-process ledger of state-changing actions.

use crate::config::LedgerConfig;
use crate::error::{HandlerResult, LedgerError, LedgerResult};
use crate::event::{
    kinds, EmitOptions, Event, EventId, EventIdGenerator, EventKind, EventMetadata, SyncStatus,
};
use crate::history::{History, HistoryEntry, ReverseAction, ReverseHandler, UndoRedoStatus};
use crate::identity::{Clock, FixedNetwork, Identity, NetworkProbe, NetworkType, SystemClock};
use crate::queue::{EventQueue, PersistEvent, Persister, QueueStore};
use crate::stats::{LedgerStats, StatsSnapshot};
use crate::subscription::{self, Kinds, Once, Registry, SubscriptionHandle};
use opsledger_storage::{BlobStore, InMemoryBlobStore};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::{json, Value};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Payload field that correlates a `request` with its response.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// How an appended reversible event enters the history.
#[derive(Clone, Copy)]
enum Recording {
    /// A fresh action: push onto undo and clear redo.
    Fresh,
    /// A redo: push onto undo, keep the rest of the redo stack.
    Redo,
}

/// Everything guarded by the append lock.
struct LedgerState {
    /// Retained full log, oldest first.
    log: VecDeque<Event>,
    queue: EventQueue,
    history: History,
    /// Appended but not yet delivered to subscribers.
    outbox: VecDeque<Event>,
}

struct LogInner {
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
    identity: Arc<Identity>,
    network: RwLock<Arc<dyn NetworkProbe>>,
    ids: EventIdGenerator,
    state: Mutex<LedgerState>,
    registry: Arc<Registry>,
    /// Held while delivering; the flag marks a drain loop on this thread.
    dispatch: ReentrantMutex<Cell<bool>>,
    persister: Persister,
    reverse_handler: RwLock<Option<Arc<dyn ReverseHandler>>>,
    stats: LedgerStats,
    closed: AtomicBool,
}

/// The event log handle.
///
/// `EventLog` is cheap to clone; clones share one ledger. It provides:
/// - `emit`, stamping and appending events and notifying subscribers
/// - subscriptions, one-shot waits and request/response over events
/// - bounded undo/redo over reversible events
/// - the pending sync queue, persisted in the background
///
/// # Ordering
///
/// Appends are serialized by one lock, so every subscriber observes events
/// in a single global emission order. Subscribers registered before an
/// `emit` call are all invoked before it returns. An event emitted from
/// inside a handler is appended immediately but delivered after the
/// in-flight event's fan-out completes.
///
/// # Failure handling
///
/// `emit` never fails and never performs I/O. Queue snapshots are written
/// by a background persister; write failures are logged, published as
/// [`kinds::PERSISTENCE_DEGRADED`], and retried by later mutations or by
/// [`EventLog::retry_persistence`].
///
/// ```rust,ignore
/// use opsledger_core::{EventLog, LedgerConfig};
/// use serde_json::json;
///
/// let log = EventLog::in_memory(LedgerConfig::default());
/// log.emit("county.added", json!({ "county": "Hillsborough" }));
/// assert_eq!(log.get_pending_events(None).len(), 1);
/// log.shutdown();
/// ```
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<LogInner>,
}

impl EventLog {
    /// Opens an event log over `store`, restoring the persisted queue.
    ///
    /// A missing or corrupt queue blob starts an empty queue. A store that
    /// cannot be read is logged and also starts empty; the log then runs
    /// in memory until writes succeed.
    pub fn open(
        config: LedgerConfig,
        store: Arc<dyn BlobStore>,
        identity: Arc<Identity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue_store = QueueStore::new(store, config.queue_key.clone());
        let stats = LedgerStats::new();

        let restored = match queue_store.load() {
            Ok(events) => events.unwrap_or_default(),
            Err(e) => {
                stats.record_persist_failure();
                tracing::warn!(
                    key = %queue_store.key(),
                    error = %e,
                    "cannot load persisted queue, starting empty"
                );
                Vec::new()
            }
        };
        let restored_count = restored.len();
        let (queue, evicted) = EventQueue::from_events(restored, config.max_queue_size);
        if !evicted.is_empty() {
            for _ in &evicted {
                stats.record_eviction();
            }
            tracing::warn!(
                evicted = evicted.len(),
                max_queue_size = config.max_queue_size,
                "persisted queue exceeds its bound, evicted entries"
            );
        }

        let ids = queue
            .iter()
            .map(|e| e.id)
            .max()
            .map_or_else(EventIdGenerator::new, EventIdGenerator::starting_after);

        let mut log: VecDeque<Event> = queue.iter().cloned().collect();
        while log.len() > config.max_log_size {
            log.pop_front();
        }

        let history = History::new(config.max_history, config.max_redo);
        let inner = Arc::new_cyclic(|weak: &Weak<LogInner>| {
            let target = weak.clone();
            let persister = Persister::spawn(
                queue_store,
                Box::new(move |notice: PersistEvent| {
                    if let Some(inner) = target.upgrade() {
                        EventLog { inner }.on_persist(notice);
                    }
                }),
            );
            LogInner {
                config,
                clock,
                identity,
                network: RwLock::new(Arc::new(FixedNetwork(NetworkType::Unknown))),
                ids,
                state: Mutex::new(LedgerState {
                    log,
                    queue,
                    history,
                    outbox: VecDeque::new(),
                }),
                registry: Registry::new(),
                dispatch: ReentrantMutex::new(Cell::new(false)),
                persister,
                reverse_handler: RwLock::new(None),
                stats,
                closed: AtomicBool::new(false),
            }
        });

        let ledger = EventLog { inner };
        if !evicted.is_empty() {
            let state = ledger.inner.state.lock();
            ledger.inner.persister.submit(state.queue.snapshot());
        }
        tracing::info!(
            restored = restored_count,
            pending = ledger.pending_count(),
            device_id = %ledger.inner.identity.device_id(),
            session_id = %ledger.inner.identity.session_id(),
            "event log opened"
        );
        ledger
    }

    /// Opens a log over a fresh in-memory store with an ephemeral identity.
    pub fn in_memory(config: LedgerConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let identity = Arc::new(Identity::ephemeral("opsledger", clock.as_ref()));
        Self::open(config, Arc::new(InMemoryBlobStore::new()), identity, clock)
    }

    /// Replaces the probe consulted for `metadata.network_type`.
    pub fn set_network_probe(&self, probe: Arc<dyn NetworkProbe>) {
        *self.inner.network.write() = probe;
    }

    /// Installs the application port that performs reverse actions.
    pub fn set_reverse_handler(&self, handler: Arc<dyn ReverseHandler>) {
        *self.inner.reverse_handler.write() = Some(handler);
    }

    /// Removes the reverse handler. Undo of non-compensating actions
    /// becomes a logged no-op.
    pub fn clear_reverse_handler(&self) {
        *self.inner.reverse_handler.write() = None;
    }

    // === Write path ===

    /// Emits a non-reversible, unscoped event. See [`EventLog::emit_with`].
    pub fn emit(&self, kind: impl Into<EventKind>, payload: Value) -> EventId {
        self.emit_with(kind, payload, EmitOptions::default())
    }

    /// Stamps, appends and delivers an event, returning its id.
    ///
    /// The event is appended to the log and the sync queue (evicting per
    /// the queue's priority if full), and a snapshot of the queue is handed
    /// to the background persister. If `options.reversible` is set the
    /// event is recorded for undo and the redo stack is cleared.
    pub fn emit_with(
        &self,
        kind: impl Into<EventKind>,
        payload: Value,
        options: EmitOptions,
    ) -> EventId {
        self.append(kind.into(), payload, options, Recording::Fresh)
    }

    fn append(
        &self,
        kind: EventKind,
        payload: Value,
        options: EmitOptions,
        recording: Recording,
    ) -> EventId {
        let inner = &*self.inner;
        let EmitOptions {
            reversible,
            reverse_action,
            operation_scope,
        } = options;
        let network_type = inner.network.read().network_type();

        let (id, evicted) = {
            let mut state = inner.state.lock();
            let event = self.stamp(kind, payload, operation_scope, reversible, network_type);
            let id = event.id;
            tracing::trace!(event_id = %id, kind = %event.kind, reversible, "event appended");

            state.log.push_back(event.clone());
            while state.log.len() > inner.config.max_log_size {
                state.log.pop_front();
            }
            let evicted = state.queue.push(event.clone());
            if reversible {
                let entry = HistoryEntry {
                    event: event.clone(),
                    reverse: reverse_action,
                };
                match recording {
                    Recording::Fresh => state.history.record(entry),
                    Recording::Redo => state.history.push_undo(entry),
                }
            }
            state.outbox.push_back(event);
            inner.persister.submit(state.queue.snapshot());
            (id, evicted)
        };

        inner.stats.record_emit();
        if let Some(evicted) = evicted {
            self.report_overflow(&evicted);
        }
        self.dispatch();
        id
    }

    /// Delivers a local diagnostic to subscribers.
    ///
    /// Published events are stamped like emitted ones but are neither
    /// logged, queued for sync, nor recorded for undo.
    pub fn publish(&self, kind: impl Into<EventKind>, payload: Value) -> EventId {
        let network_type = self.inner.network.read().network_type();
        let id = {
            let mut state = self.inner.state.lock();
            let event = self.stamp(kind.into(), payload, None, false, network_type);
            let id = event.id;
            state.outbox.push_back(event);
            id
        };
        self.inner.stats.record_publish();
        self.dispatch();
        id
    }

    fn stamp(
        &self,
        kind: EventKind,
        payload: Value,
        operation_scope: Option<String>,
        reversible: bool,
        network_type: NetworkType,
    ) -> Event {
        let inner = &*self.inner;
        let now = inner.clock.now_millis();
        let identity = &inner.identity;
        Event {
            id: inner.ids.next_id(now),
            kind,
            timestamp: now,
            actor_id: identity.actor_id(),
            session_id: identity.session_id().to_string(),
            device_id: identity.device_id().to_string(),
            operation_scope,
            payload,
            metadata: EventMetadata {
                network_type,
                user_agent: identity.user_agent().to_string(),
                session_elapsed_ms: identity.session_elapsed_ms(now),
            },
            reversible,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
        }
    }

    /// Drains the outbox in order. A nested call on the same thread (an
    /// emit from inside a handler) returns at once; the outer loop
    /// delivers its event.
    fn dispatch(&self) {
        let draining = self.inner.dispatch.lock();
        if draining.get() {
            return;
        }
        draining.set(true);
        loop {
            let Some(event) = self.inner.state.lock().outbox.pop_front() else {
                break;
            };
            let handlers = self.inner.registry.handlers_for(&event.kind);
            let failures = subscription::notify(&handlers, &event);
            self.inner.stats.record_handler_errors(failures);
        }
        draining.set(false);
    }

    fn in_dispatch(&self) -> bool {
        self.inner.dispatch.try_lock().is_some_and(|draining| draining.get())
    }

    fn report_overflow(&self, evicted: &Event) {
        self.inner.stats.record_eviction();
        tracing::warn!(
            event_id = %evicted.id,
            kind = %evicted.kind,
            status = %evicted.sync_status,
            max_queue_size = self.inner.config.max_queue_size,
            "sync queue full, evicted event"
        );
        self.publish(
            kinds::QUEUE_OVERFLOW,
            json!({
                "evicted_id": evicted.id,
                "kind": evicted.kind,
                "sync_status": evicted.sync_status.as_str(),
                "max_queue_size": self.inner.config.max_queue_size,
            }),
        );
    }

    fn on_persist(&self, notice: PersistEvent) {
        match notice {
            PersistEvent::Failed { error, first } => {
                self.inner.stats.record_persist_failure();
                if first {
                    tracing::warn!(
                        error = %error,
                        "queue persistence degraded, continuing in memory"
                    );
                    self.publish(kinds::PERSISTENCE_DEGRADED, json!({ "error": error }));
                } else {
                    tracing::debug!(error = %error, "queue persistence still failing");
                }
            }
            PersistEvent::Restored => {
                tracing::info!("queue persistence restored");
                self.publish(kinds::PERSISTENCE_RESTORED, json!({}));
            }
        }
    }

    // === Subscriptions ===

    /// Registers `handler` for one kind, several kinds, or [`Kinds::Any`].
    ///
    /// The returned handle's `unsubscribe` removes every registration made
    /// by this call.
    pub fn subscribe<F>(&self, kinds: impl Into<Kinds>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner
            .registry
            .subscribe(kinds.into(), subscription::handler(handler))
    }

    /// Registers `handler` for every kind, diagnostics included.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(Kinds::Any, handler)
    }

    /// Resolves with the next `kind` event.
    pub fn once(&self, kind: impl Into<EventKind>) -> Once {
        self.inner.registry.once(kind.into(), |_| true)
    }

    /// Resolves with the next `kind` event accepted by `predicate`.
    pub fn once_matching<P>(&self, kind: impl Into<EventKind>, predicate: P) -> Once
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.inner.registry.once(kind.into(), predicate)
    }

    /// Emits `kind` and waits for a correlated `response_kind` event.
    ///
    /// Correlation uses the payload's `requestId` field. An object payload
    /// without one gets a fresh id; any other payload is wrapped as
    /// `{"requestId": .., "payload": ..}`. Responders echo the field.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Timeout`] if no response arrives within
    /// `timeout`, or [`LedgerError::Closed`] if the log shuts down first.
    pub async fn request(
        &self,
        kind: impl Into<EventKind>,
        payload: Value,
        response_kind: impl Into<EventKind>,
        timeout: Duration,
    ) -> LedgerResult<Value> {
        let response_kind = response_kind.into();
        let (request_id, payload) = attach_request_id(payload);
        let expected = request_id.clone();
        let waiter = self.once_matching(response_kind.clone(), move |event| {
            event.payload.get(REQUEST_ID_FIELD) == Some(&expected)
        });

        self.emit(kind, payload);

        match tokio::time::timeout(timeout, waiter).await {
            Ok(result) => result.map(|event| event.payload),
            Err(_) => {
                tracing::debug!(
                    response_kind = %response_kind,
                    request_id = %request_id,
                    waited = ?timeout,
                    "request timed out"
                );
                Err(LedgerError::Timeout {
                    kind: response_kind.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.subscription_count()
    }

    // === Undo / redo ===

    /// Undoes the most recent reversible event.
    ///
    /// Returns the undone event's id, or `None` if nothing was undone.
    /// Compensating actions are emitted by the log; others are handed to
    /// the installed [`ReverseHandler`]. On success the entry moves to the
    /// redo stack and [`kinds::UNDO_PERFORMED`] is emitted.
    ///
    /// Nothing is surfaced to the caller on failure: without a reverse
    /// handler the entry is dropped, and if the handler fails the entry is
    /// put back. Both cases are logged.
    pub async fn undo(&self) -> Option<EventId> {
        let entry = self.inner.state.lock().history.pop_undo();
        let Some(entry) = entry else {
            tracing::debug!("undo requested with empty history");
            return None;
        };
        let Some(action) = entry.reverse.clone() else {
            tracing::warn!(
                event_id = %entry.event.id,
                kind = %entry.event.kind,
                "undo skipped: no reverse action was recorded"
            );
            return None;
        };

        let result = match &action {
            ReverseAction::Compensate { kind, payload } => {
                self.emit(kind.clone(), payload.clone());
                Ok(())
            }
            _ => {
                let handler = self.inner.reverse_handler.read().clone();
                let Some(handler) = handler else {
                    tracing::warn!(
                        event_id = %entry.event.id,
                        kind = %entry.event.kind,
                        "undo skipped: no reverse handler is installed"
                    );
                    return None;
                };
                handler.apply(&action).await
            }
        };

        match result {
            Ok(()) => {
                let event_id = entry.event.id;
                let kind = entry.event.kind.clone();
                self.inner.state.lock().history.push_redo(entry);
                self.inner.stats.record_undo();
                tracing::debug!(event_id = %event_id, kind = %kind, "undo performed");
                self.emit(
                    kinds::UNDO_PERFORMED,
                    json!({ "event_id": event_id, "kind": kind }),
                );
                Some(event_id)
            }
            Err(e) => {
                let err = LedgerError::ReverseFailed(e.to_string());
                tracing::warn!(
                    event_id = %entry.event.id,
                    kind = %entry.event.kind,
                    error = %err,
                    "undo failed, entry kept for another attempt"
                );
                self.inner.state.lock().history.push_undo(entry);
                None
            }
        }
    }

    /// Re-emits the most recently undone event with a new id.
    ///
    /// The new event keeps the original kind, payload, scope and reverse
    /// action and goes back onto the undo stack. Returns its id, or `None`
    /// if the redo stack is empty.
    pub fn redo(&self) -> Option<EventId> {
        let entry = self.inner.state.lock().history.pop_redo()?;
        let HistoryEntry { event, reverse } = entry;
        let options = EmitOptions {
            reversible: event.reversible,
            reverse_action: reverse,
            operation_scope: event.operation_scope,
        };
        let id = self.append(event.kind, event.payload, options, Recording::Redo);
        self.inner.stats.record_redo();
        tracing::debug!(event_id = %id, redone = %event.id, "redo performed");
        Some(id)
    }

    /// Returns whether undo and redo currently have anything to act on.
    #[must_use]
    pub fn get_undo_redo_status(&self) -> UndoRedoStatus {
        self.inner.state.lock().history.status()
    }

    // === Sync queue ===

    /// Returns a snapshot of pending events in emission order, optionally
    /// restricted to one operation scope.
    #[must_use]
    pub fn get_pending_events(&self, scope: Option<&str>) -> Vec<Event> {
        self.inner.state.lock().queue.pending(scope)
    }

    /// Returns up to `limit` of the oldest pending events in scope.
    #[must_use]
    pub fn pending_batch(&self, scope: Option<&str>, limit: usize) -> Vec<Event> {
        self.inner.state.lock().queue.pending_batch(scope, limit)
    }

    /// Marks events `Synced` and persists the queue. Calling it again for
    /// the same ids changes nothing. Returns how many events changed.
    pub fn mark_synced(&self, ids: &[EventId]) -> usize {
        let mut state = self.inner.state.lock();
        let changed = state.queue.mark_synced(ids);
        if changed > 0 {
            self.inner.persister.submit(state.queue.snapshot());
        }
        changed
    }

    /// Records a failed delivery attempt for pending events and persists
    /// the queue.
    ///
    /// Events stay `Pending` unless `max_delivery_attempts` is configured
    /// and reached, in which case they become `Failed` and a
    /// [`kinds::DELIVERY_ABANDONED`] diagnostic is published for each.
    /// Returns the ids of abandoned events.
    pub fn mark_failed(&self, ids: &[EventId]) -> Vec<EventId> {
        if ids.is_empty() {
            return Vec::new();
        }
        let abandoned = {
            let mut state = self.inner.state.lock();
            let abandoned = state
                .queue
                .mark_failed(ids, self.inner.config.max_delivery_attempts);
            self.inner.persister.submit(state.queue.snapshot());
            abandoned
        };

        self.inner.stats.record_abandoned(abandoned.len());
        for event in &abandoned {
            tracing::warn!(
                event_id = %event.id,
                kind = %event.kind,
                attempts = event.retry_count,
                "delivery abandoned after repeated failures"
            );
            self.publish(
                kinds::DELIVERY_ABANDONED,
                json!({
                    "event_id": event.id,
                    "kind": event.kind,
                    "attempts": event.retry_count,
                }),
            );
        }
        abandoned.iter().map(|e| e.id).collect()
    }

    /// Moves every `Failed` event back to `Pending`. Returns how many moved.
    pub fn retry_failed(&self) -> usize {
        let mut state = self.inner.state.lock();
        let moved = state.queue.retry_failed();
        if moved > 0 {
            self.inner.persister.submit(state.queue.snapshot());
        }
        moved
    }

    /// Removes every `Synced` event from the queue. The retained full log
    /// is not affected. Returns how many were removed.
    pub fn clear_synced(&self) -> usize {
        let mut state = self.inner.state.lock();
        let removed = state.queue.clear_synced();
        if removed > 0 {
            self.inner.persister.submit(state.queue.snapshot());
        }
        removed
    }

    /// Largest `retry_count` among pending events in scope.
    #[must_use]
    pub fn max_pending_retries(&self, scope: Option<&str>) -> u32 {
        self.inner.state.lock().queue.max_pending_retries(scope)
    }

    // === Inspection ===

    /// Returns the retained log, oldest first, optionally filtered by scope.
    #[must_use]
    pub fn events(&self, scope: Option<&str>) -> Vec<Event> {
        self.inner
            .state
            .lock()
            .log
            .iter()
            .filter(|e| e.in_scope(scope))
            .cloned()
            .collect()
    }

    /// Returns a snapshot of the whole sync queue.
    #[must_use]
    pub fn queue(&self) -> Vec<Event> {
        self.inner.state.lock().queue.snapshot()
    }

    /// Returns the number of queued events.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().queue.pending_count()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(self.inner.persister.is_degraded())
    }

    /// Returns the identity events are stamped with.
    #[must_use]
    pub fn identity(&self) -> &Arc<Identity> {
        &self.inner.identity
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    // === Persistence lifecycle ===

    /// Re-submits the last snapshot whose write failed, if any.
    pub fn retry_persistence(&self) {
        self.inner.persister.retry();
    }

    /// Blocks until the newest queue snapshot has been written (or failed).
    ///
    /// Called from inside a handler this only reports the current state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceDegraded`] if the newest write
    /// failed.
    pub fn flush(&self) -> LedgerResult<()> {
        if self.in_dispatch() {
            return if self.inner.persister.is_degraded() {
                Err(LedgerError::PersistenceDegraded("queue writes are failing".into()))
            } else {
                Ok(())
            };
        }
        self.inner.persister.flush()
    }

    /// Writes outstanding state, stops the persister and drops every
    /// subscription. Pending `once`/`request` waiters fail with
    /// [`LedgerError::Closed`]. Calling it again does nothing.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.registry.close();
        if self.in_dispatch() {
            tracing::warn!(
                "shutdown called from a handler, persister stops when the log is dropped"
            );
            return;
        }
        self.inner.persister.shutdown();
        tracing::info!(queued = self.queue_len(), "event log shut down");
    }

    /// Returns true after [`EventLog::shutdown`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("device_id", &self.inner.identity.device_id())
            .field("session_id", &self.inner.identity.session_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Returns the correlation id and the payload carrying it.
fn attach_request_id(payload: Value) -> (Value, Value) {
    match payload {
        Value::Object(mut map) => {
            let id = map
                .entry(REQUEST_ID_FIELD)
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
                .clone();
            (id, Value::Object(map))
        }
        other => {
            let id = Value::String(Uuid::new_v4().to_string());
            let wrapped = json!({ REQUEST_ID_FIELD: id.clone(), "payload": other });
            (id, wrapped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn open_log(config: LedgerConfig) -> (EventLog, Arc<InMemoryBlobStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let identity = Arc::new(Identity::new("device-1", "tests/1.0", clock.as_ref()));
        let log = EventLog::open(config, store.clone(), identity, clock.clone());
        (log, store, clock)
    }

    fn recorder(
        log: &EventLog,
        kinds: impl Into<Kinds>,
    ) -> (SubscriptionHandle, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = log.subscribe(kinds, move |e| {
            sink.lock().push(e.clone());
            Ok(())
        });
        (handle, seen)
    }

    #[test]
    fn emit_stamps_event() {
        let (log, _, clock) = open_log(LedgerConfig::default());
        log.identity().set_actor("planner-7");
        log.set_network_probe(Arc::new(FixedNetwork(NetworkType::Cellular)));
        clock.advance(250);

        let id = log.emit_with(
            "county.added",
            json!({ "county": "Hillsborough" }),
            EmitOptions::new().scope("op-helene"),
        );
        let event = log.events(None).pop().unwrap();

        assert_eq!(event.id, id);
        assert_eq!(event.timestamp, 1_700_000_000_250);
        assert_eq!(event.actor_id, "planner-7");
        assert_eq!(event.device_id, "device-1");
        assert_eq!(event.operation_scope.as_deref(), Some("op-helene"));
        assert_eq!(event.metadata.network_type, NetworkType::Cellular);
        assert_eq!(event.metadata.session_elapsed_ms, 250);
        assert_eq!(event.metadata.user_agent, "tests/1.0");
        assert!(!event.reversible);
    }

    #[test]
    fn handlers_see_events_before_emit_returns() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (_handle, seen) = recorder(&log, "county.added");

        log.emit("county.added", json!({ "county": "Pinellas" }));
        assert_eq!(seen.lock().len(), 1);

        log.emit("county.removed", json!({}));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn handler_subscribed_during_fanout_misses_current_event() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let late = Arc::new(AtomicUsize::new(0));
        let late_handles = Arc::new(Mutex::new(Vec::new()));

        let log_in_handler = log.clone();
        let late_counter = Arc::clone(&late);
        let handles = Arc::clone(&late_handles);
        let _first = log.subscribe("a", move |_| {
            let counter = Arc::clone(&late_counter);
            handles.lock().push(log_in_handler.subscribe("a", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
            Ok(())
        });

        log.emit("a", json!(1));
        assert_eq!(late.load(Ordering::SeqCst), 0);
        log.emit("a", json!(2));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_emit_is_delivered_after_current_fanout() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (_all, seen) = recorder(&log, Kinds::Any);

        let inner_log = log.clone();
        let _reactor = log.subscribe("facility.opened", move |_| {
            inner_log.emit("shelter.capacity.changed", json!({ "beds": 120 }));
            Ok(())
        });

        log.emit("facility.opened", json!({ "name": "Northside" }));

        let observed: Vec<_> = seen.lock().iter().map(|e| e.kind.to_string()).collect();
        assert_eq!(observed, vec!["facility.opened", "shelter.capacity.changed"]);
        let events = log.events(None);
        assert!(events[0].id < events[1].id);
    }

    #[test]
    fn failing_handler_does_not_reach_emitter() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let _bad = log.subscribe("a", |_| Err("rejected".into()));
        let (_good, seen) = recorder(&log, "a");

        log.emit("a", json!({}));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(log.stats().handler_errors, 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (handle, seen) = recorder(&log, ["a", "b"]);

        log.emit("a", json!({}));
        log.emit("b", json!({}));
        handle.unsubscribe();
        log.emit("a", json!({}));
        log.emit("b", json!({}));

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn pending_events_after_emit() {
        let (log, _, _) = open_log(LedgerConfig::default());
        log.emit("county.added", json!({ "county": "Hillsborough" }));

        let pending = log.get_pending_events(None);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, "county.added");
        assert_eq!(pending[0].sync_status, SyncStatus::Pending);
    }

    #[test]
    fn pending_events_filtered_by_scope() {
        let (log, _, _) = open_log(LedgerConfig::default());
        log.emit_with("a", json!({}), EmitOptions::new().scope("op-1"));
        log.emit_with("b", json!({}), EmitOptions::new().scope("op-2"));
        log.emit("c", json!({}));

        assert_eq!(log.get_pending_events(Some("op-1")).len(), 1);
        assert_eq!(log.get_pending_events(None).len(), 3);
        assert_eq!(log.events(Some("op-2"))[0].kind, "b");
    }

    #[test]
    fn pending_snapshot_is_not_live() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let id = log.emit("a", json!({}));
        let snapshot = log.get_pending_events(None);

        log.mark_synced(&[id]);
        assert_eq!(snapshot[0].sync_status, SyncStatus::Pending);
        assert!(log.get_pending_events(None).is_empty());
    }

    #[test]
    fn mark_synced_twice_is_harmless() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let id = log.emit("a", json!({}));

        assert_eq!(log.mark_synced(&[id]), 1);
        assert_eq!(log.mark_synced(&[id]), 0);
        assert_eq!(log.queue()[0].sync_status, SyncStatus::Synced);
    }

    #[test]
    fn mark_failed_keeps_events_pending() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let id = log.emit("a", json!({}));

        for _ in 0..5 {
            assert!(log.mark_failed(&[id]).is_empty());
        }
        let pending = log.get_pending_events(None);
        assert_eq!(pending[0].retry_count, 5);
        assert_eq!(log.max_pending_retries(None), 5);
    }

    #[test]
    fn delivery_limit_abandons_with_diagnostic() {
        let (log, _, _) = open_log(LedgerConfig::default().max_delivery_attempts(2));
        let (_diag, seen) = recorder(&log, kinds::DELIVERY_ABANDONED);
        let id = log.emit("a", json!({}));

        assert!(log.mark_failed(&[id]).is_empty());
        assert_eq!(log.mark_failed(&[id]), vec![id]);
        assert!(log.get_pending_events(None).is_empty());
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(log.stats().abandoned, 1);

        assert_eq!(log.retry_failed(), 1);
        assert_eq!(log.get_pending_events(None).len(), 1);
    }

    #[test]
    fn overflow_evicts_synced_first_and_reports() {
        let (log, _, _) = open_log(LedgerConfig::default().max_queue_size(3));
        let (_diag, overflow) = recorder(&log, kinds::QUEUE_OVERFLOW);
        let ids: Vec<_> = (0..3).map(|i| log.emit("a", json!(i))).collect();
        log.mark_synced(&ids);

        let newest = log.emit("b", json!({}));
        let queue = log.queue();
        assert_eq!(queue.len(), 3);
        assert!(queue.iter().all(|e| e.id != ids[0]));
        assert_eq!(queue.last().map(|e| e.id), Some(newest));
        assert_eq!(queue.last().map(|e| e.sync_status), Some(SyncStatus::Pending));

        let overflow = overflow.lock();
        assert_eq!(overflow.len(), 1);
        assert_eq!(overflow[0].payload["evicted_id"], json!(ids[0]));
        assert_eq!(log.stats().evicted, 1);
    }

    #[test]
    fn diagnostics_are_not_queued() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (_all, seen) = recorder(&log, Kinds::Any);
        log.publish("ledger.custom_probe", json!({}));

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(log.queue_len(), 0);
        assert!(log.events(None).is_empty());
    }

    #[test]
    fn clear_synced_keeps_full_log() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let a = log.emit("a", json!({}));
        log.emit("b", json!({}));
        log.mark_synced(&[a]);

        assert_eq!(log.clear_synced(), 1);
        assert_eq!(log.queue_len(), 1);
        assert_eq!(log.events(None).len(), 2);
    }

    #[test]
    fn full_log_is_bounded() {
        let (log, _, _) = open_log(LedgerConfig::default().max_log_size(2));
        for i in 0..5 {
            log.emit("a", json!(i));
        }
        let events = log.events(None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload, json!(4));
        assert_eq!(log.queue_len(), 5);
    }

    #[test]
    fn queue_survives_reopen() {
        let store = Arc::new(InMemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(5_000));
        let open = || {
            let identity = Arc::new(Identity::new("device-1", "tests", clock.as_ref()));
            EventLog::open(LedgerConfig::default(), store.clone(), identity, clock.clone())
        };

        let first = open();
        let a = first.emit("a", json!({ "n": 1 }));
        let b = first.emit("b", json!({ "n": 2 }));
        first.mark_synced(&[a]);
        first.mark_failed(&[b]);
        let before = first.queue();
        first.shutdown();

        clock.set(1_000);
        let second = open();
        assert_eq!(second.queue(), before);
        assert_eq!(second.get_pending_events(None)[0].retry_count, 1);
        assert!(!second.get_undo_redo_status().can_undo);

        let c = second.emit("c", json!({}));
        assert!(c > b);
        second.shutdown();
    }

    #[test]
    fn corrupt_queue_starts_empty() {
        let store = Arc::new(InMemoryBlobStore::with_blob("event_queue", b"not cbor".to_vec()));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1));
        let identity = Arc::new(Identity::new("d", "ua", clock.as_ref()));
        let log = EventLog::open(LedgerConfig::default(), store, identity, clock);
        assert_eq!(log.queue_len(), 0);
        log.emit("a", json!({}));
        assert!(log.flush().is_ok());
    }

    #[test]
    fn persistence_degrades_and_recovers() {
        let (log, store, _) = open_log(LedgerConfig::default());
        let (_diag, seen) = recorder(
            &log,
            [kinds::PERSISTENCE_DEGRADED, kinds::PERSISTENCE_RESTORED],
        );

        store.set_available(false);
        let id = log.emit("a", json!({}));
        assert_eq!(log.get_pending_events(None)[0].id, id);
        assert!(matches!(log.flush(), Err(LedgerError::PersistenceDegraded(_))));
        assert!(log.stats().persistence_degraded);

        store.set_available(true);
        log.retry_persistence();
        log.flush().unwrap();
        assert!(!log.stats().persistence_degraded);

        let observed: Vec<_> = seen.lock().iter().map(|e| e.kind.to_string()).collect();
        assert_eq!(observed, vec![kinds::PERSISTENCE_DEGRADED, kinds::PERSISTENCE_RESTORED]);

        let saved = QueueStore::new(store, "event_queue").load().unwrap().unwrap();
        assert_eq!(saved.len(), 1);
    }

    #[derive(Default)]
    struct Counter {
        value: Mutex<i64>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ReverseHandler for Counter {
        async fn apply(&self, action: &ReverseAction) -> Result<(), crate::error::HandlerError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err("store locked".into());
            }
            if let ReverseAction::Restore { previous, .. } = action {
                *self.value.lock() = previous.as_i64().unwrap_or_default();
            }
            Ok(())
        }
    }

    fn wire_counter(log: &EventLog) -> (Arc<Counter>, SubscriptionHandle) {
        let counter = Arc::new(Counter::default());
        log.set_reverse_handler(counter.clone());
        let applied = Arc::clone(&counter);
        let handle = log.subscribe("counter.set", move |e| {
            *applied.value.lock() = e.payload["value"].as_i64().unwrap_or_default();
            Ok(())
        });
        (counter, handle)
    }

    fn set_counter(log: &EventLog, value: i64, previous: i64) -> EventId {
        log.emit_with(
            "counter.set",
            json!({ "value": value }),
            EmitOptions::new().reversible(ReverseAction::Restore {
                target: "counter".into(),
                previous: json!(previous),
            }),
        )
    }

    #[tokio::test]
    async fn undo_then_redo_restores_state() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (counter, _handle) = wire_counter(&log);
        let (_bookkeeping, undone) = recorder(&log, kinds::UNDO_PERFORMED);

        let original = set_counter(&log, 1, 0);
        assert_eq!(*counter.value.lock(), 1);

        assert_eq!(log.undo().await, Some(original));
        assert_eq!(*counter.value.lock(), 0);
        assert_eq!(
            log.get_undo_redo_status(),
            UndoRedoStatus { can_undo: false, can_redo: true }
        );
        assert_eq!(undone.lock()[0].payload["event_id"], json!(original));

        let redone = log.redo().unwrap();
        assert_ne!(redone, original);
        assert_eq!(*counter.value.lock(), 1);
        assert_eq!(
            log.get_undo_redo_status(),
            UndoRedoStatus { can_undo: true, can_redo: false }
        );
    }

    #[tokio::test]
    async fn fresh_reversible_emit_clears_redo() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (_counter, _handle) = wire_counter(&log);

        set_counter(&log, 1, 0);
        set_counter(&log, 2, 1);
        log.undo().await;
        log.undo().await;
        assert!(log.get_undo_redo_status().can_redo);

        log.redo();
        assert!(log.get_undo_redo_status().can_redo);

        set_counter(&log, 5, 1);
        assert!(!log.get_undo_redo_status().can_redo);
    }

    #[tokio::test]
    async fn undo_on_empty_history_is_noop() {
        let (log, _, _) = open_log(LedgerConfig::default());
        log.emit("a", json!({}));
        assert_eq!(log.undo().await, None);
        assert_eq!(log.redo(), None);
        assert_eq!(log.queue_len(), 1);
    }

    #[tokio::test]
    async fn undo_without_handler_drops_entry() {
        let (log, _, _) = open_log(LedgerConfig::default());
        set_counter(&log, 1, 0);

        assert_eq!(log.undo().await, None);
        assert_eq!(log.get_undo_redo_status(), UndoRedoStatus::default());
    }

    #[tokio::test]
    async fn failed_reverse_keeps_entry() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (counter, _handle) = wire_counter(&log);
        let id = set_counter(&log, 3, 0);

        counter.fail.store(true, Ordering::SeqCst);
        assert_eq!(log.undo().await, None);
        assert!(log.get_undo_redo_status().can_undo);

        counter.fail.store(false, Ordering::SeqCst);
        assert_eq!(log.undo().await, Some(id));
        assert_eq!(*counter.value.lock(), 0);
    }

    #[tokio::test]
    async fn compensating_undo_emits_event() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let (_handle, seen) = recorder(&log, "facility.closed");
        log.emit_with(
            "facility.opened",
            json!({ "id": "f-1" }),
            EmitOptions::new().reversible(ReverseAction::Compensate {
                kind: "facility.closed".into(),
                payload: json!({ "id": "f-1" }),
            }),
        );

        assert!(log.undo().await.is_some());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].reversible);
    }

    #[tokio::test]
    async fn once_resolves_on_next_event() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let waiter = log.once("operation.created");
        log.emit("operation.created", json!({ "name": "Helene" }));

        let event = waiter.await.unwrap();
        assert_eq!(event.payload["name"], "Helene");
        assert_eq!(log.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn request_correlates_response() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let responder = log.clone();
        let _pong = log.subscribe("ping", move |e| {
            responder.emit(
                "pong",
                json!({ "requestId": "someone-else", "answer": 0 }),
            );
            responder.emit(
                "pong",
                json!({ "requestId": e.payload["requestId"], "answer": 42 }),
            );
            Ok(())
        });

        let reply = log
            .request("ping", json!({}), "pong", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply["answer"], 42);
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_no_earlier_than_deadline() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let started = tokio::time::Instant::now();

        let result = log
            .request("ping", json!({ "requestId": "x" }), "pong", Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(LedgerError::Timeout { ref kind, .. }) if kind == "pong"));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(log.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_fails_waiters() {
        let (log, _, _) = open_log(LedgerConfig::default());
        let waiter = log.once("never");
        log.shutdown();
        log.shutdown();
        assert!(matches!(waiter.await, Err(LedgerError::Closed)));
        assert!(log.is_closed());
    }

    #[test]
    fn request_id_is_attached() {
        let (id, payload) = attach_request_id(json!({ "requestId": "x", "q": 1 }));
        assert_eq!(id, json!("x"));
        assert_eq!(payload["q"], 1);

        let (id, payload) = attach_request_id(json!({ "q": 1 }));
        assert_eq!(payload["requestId"], id);

        let (id, payload) = attach_request_id(json!("raw"));
        assert_eq!(payload, json!({ "requestId": id, "payload": "raw" }));
    }
}
