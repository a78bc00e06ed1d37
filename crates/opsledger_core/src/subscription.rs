//! Subscription registry for observing events.
//!
//! Handlers are registered per kind (or for every kind) and invoked
//! synchronously by the event log, in emission order. The registry
//! itself holds no events; it only maps kinds to handlers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use opsledger_core::EventLog;
//!
//! let log = EventLog::in_memory(Default::default());
//! let sub = log.subscribe(["county.added", "county.removed"], |event| {
//!     println!("{}: {}", event.kind, event.payload);
//!     Ok(())
//! });
//!
//! log.emit("county.added", serde_json::json!({ "county": "Pinellas" }));
//! sub.unsubscribe();
//! ```

use crate::error::{HandlerResult, LedgerError, LedgerResult};
use crate::event::{Event, EventKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Boxes a closure as a [`Handler`].
pub(crate) fn handler<F>(f: F) -> Handler
where
    F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The kinds a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kinds {
    /// Every kind, including local diagnostics.
    Any,
    /// Only the listed kinds.
    Only(Vec<EventKind>),
}

impl From<&str> for Kinds {
    fn from(kind: &str) -> Self {
        Kinds::Only(vec![kind.into()])
    }
}

impl From<String> for Kinds {
    fn from(kind: String) -> Self {
        Kinds::Only(vec![kind.into()])
    }
}

impl From<EventKind> for Kinds {
    fn from(kind: EventKind) -> Self {
        Kinds::Only(vec![kind])
    }
}

impl From<Vec<EventKind>> for Kinds {
    fn from(kinds: Vec<EventKind>) -> Self {
        Kinds::Only(kinds)
    }
}

impl From<Vec<&str>> for Kinds {
    fn from(kinds: Vec<&str>) -> Self {
        Kinds::Only(kinds.into_iter().map(EventKind::from).collect())
    }
}

impl From<&[&str]> for Kinds {
    fn from(kinds: &[&str]) -> Self {
        Kinds::Only(kinds.iter().copied().map(EventKind::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Kinds {
    fn from(kinds: [&str; N]) -> Self {
        Kinds::Only(kinds.into_iter().map(EventKind::from).collect())
    }
}

/// Kind-to-handler map shared by an event log and its handles.
#[derive(Default)]
pub(crate) struct Registry {
    next_id: AtomicU64,
    by_kind: RwLock<HashMap<EventKind, Vec<(u64, Handler)>>>,
    any: RwLock<Vec<(u64, Handler)>>,
    closed: AtomicBool,
}

impl Registry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, id: u64, kinds: &Kinds, handler: Handler) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match kinds {
            Kinds::Any => self.any.write().push((id, handler)),
            Kinds::Only(list) => {
                let mut by_kind = self.by_kind.write();
                for kind in list {
                    let entry = by_kind.entry(kind.clone()).or_default();
                    if !entry.iter().any(|(existing, _)| *existing == id) {
                        entry.push((id, Arc::clone(&handler)));
                    }
                }
            }
        }
    }

    fn remove(&self, id: u64, kinds: &Kinds) {
        match kinds {
            Kinds::Any => self.any.write().retain(|(existing, _)| *existing != id),
            Kinds::Only(list) => {
                let mut by_kind = self.by_kind.write();
                for kind in list {
                    if let Some(entry) = by_kind.get_mut(kind.as_str()) {
                        entry.retain(|(existing, _)| *existing != id);
                        if entry.is_empty() {
                            by_kind.remove(kind.as_str());
                        }
                    }
                }
            }
        }
    }

    /// Registers `handler` and returns its handle.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        kinds: Kinds,
        handler: Handler,
    ) -> SubscriptionHandle {
        let id = self.allocate_id();
        self.insert(id, &kinds, handler);
        SubscriptionHandle::new(id, kinds, Arc::downgrade(self))
    }

    /// Registers a one-shot waiter for the next `kind` event matching
    /// `predicate`.
    pub(crate) fn once<P>(self: &Arc<Self>, kind: EventKind, predicate: P) -> Once
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.allocate_id();
        let kinds = Kinds::from(kind);
        let registry = Arc::downgrade(self);
        let own_kinds = kinds.clone();

        let waiter = handler(move |event| {
            if !predicate(event) {
                return Ok(());
            }
            if let Some(tx) = slot.lock().take() {
                // The waiter may have been dropped already; nothing to do then.
                let _ = tx.send(event.clone());
                if let Some(registry) = registry.upgrade() {
                    registry.remove(id, &own_kinds);
                }
            }
            Ok(())
        });

        self.insert(id, &kinds, waiter);
        Once {
            rx,
            handle: SubscriptionHandle::new(id, kinds, Arc::downgrade(self)),
        }
    }

    /// Returns the handlers interested in `kind`, in registration order.
    pub(crate) fn handlers_for(&self, kind: &EventKind) -> Vec<Handler> {
        let mut handlers: Vec<(u64, Handler)> = self
            .by_kind
            .read()
            .get(kind.as_str())
            .map(|list| list.clone())
            .unwrap_or_default();
        handlers.extend(self.any.read().iter().cloned());
        handlers.sort_by_key(|(id, _)| *id);
        handlers.into_iter().map(|(_, handler)| handler).collect()
    }

    /// Returns the number of live subscriptions (a multi-kind subscription
    /// counts once).
    pub(crate) fn subscription_count(&self) -> usize {
        let mut ids: Vec<u64> = self
            .by_kind
            .read()
            .values()
            .flat_map(|list| list.iter().map(|(id, _)| *id))
            .collect();
        ids.extend(self.any.read().iter().map(|(id, _)| *id));
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Drops every handler and refuses new ones. Pending one-shot waiters
    /// resolve with [`LedgerError::Closed`].
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.by_kind.write().clear();
        self.any.write().clear();
    }
}

/// Invokes each handler with `event`, isolating failures.
///
/// Returns the number of handlers that returned an error or panicked.
pub(crate) fn notify(handlers: &[Handler], event: &Event) -> usize {
    let mut failures = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                tracing::warn!(
                    event_id = %event.id,
                    kind = %event.kind,
                    error = %e,
                    "event handler failed"
                );
            }
            Err(_) => {
                failures += 1;
                tracing::warn!(
                    event_id = %event.id,
                    kind = %event.kind,
                    "event handler panicked"
                );
            }
        }
    }
    failures
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle does not unsubscribe; call
/// [`SubscriptionHandle::unsubscribe`] to stop receiving events.
#[must_use = "the subscription stays active until `unsubscribe` is called"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    kinds: Kinds,
    registry: Weak<Registry>,
    active: AtomicBool,
}

impl SubscriptionHandle {
    fn new(id: u64, kinds: Kinds, registry: Weak<Registry>) -> Self {
        Self {
            id,
            kinds,
            registry,
            active: AtomicBool::new(true),
        }
    }

    /// Removes every registration created by the `subscribe` call that
    /// returned this handle. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id, &self.kinds);
        }
    }

    /// Returns true until `unsubscribe` has been called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the kinds this subscription listens to.
    #[must_use]
    pub fn kinds(&self) -> &Kinds {
        &self.kinds
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Future resolving to the next matching event.
///
/// The registration is removed after the first delivery, or when the
/// future is dropped unresolved (for example by a timeout).
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct Once {
    rx: oneshot::Receiver<Event>,
    handle: SubscriptionHandle,
}

impl Future for Once {
    type Output = LedgerResult<Event>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| LedgerError::Closed))
    }
}

impl Drop for Once {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}
