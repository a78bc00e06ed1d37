//! Transport boundary to the remote collaboration endpoint.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use opsledger_core::{Event, EventId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Delivers batches of pending events to the remote endpoint.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, a message bus, a mock for testing).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Delivers `events` and reports which of them the endpoint accepted.
    ///
    /// An `Err` means nothing in the batch was accepted.
    async fn deliver(&self, events: &[Event]) -> SyncResult<DeliveryReport>;
}

/// The events a delivery attempt confirmed.
///
/// Events of the batch that are not listed count as failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Ids the endpoint confirmed.
    pub synced: HashSet<EventId>,
}

impl DeliveryReport {
    /// Confirms every event in `events`.
    pub fn all(events: &[Event]) -> Self {
        Self {
            synced: events.iter().map(|e| e.id).collect(),
        }
    }

    /// Confirms only `ids`.
    pub fn partial(ids: impl IntoIterator<Item = EventId>) -> Self {
        Self {
            synced: ids.into_iter().collect(),
        }
    }

    /// Confirms nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Splits `batch` into (synced, failed) ids, keeping batch order.
    pub fn split(&self, batch: &[Event]) -> (Vec<EventId>, Vec<EventId>) {
        batch
            .iter()
            .map(|e| e.id)
            .partition(|id| self.synced.contains(id))
    }
}

/// A mock transport for testing.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    failure: Mutex<Option<(String, bool)>>,
    rejected: Mutex<HashSet<EventId>>,
    delay: Mutex<Option<Duration>>,
    delivered: Mutex<Vec<Vec<EventId>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    /// Creates a connected transport that accepts everything.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            failure: Mutex::new(None),
            rejected: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
            delivered: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sets the connected state. Disconnected calls fail with `NotConnected`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes every call fail with a transport error until cleared.
    pub fn set_failure(&self, failure: Option<(&str, bool)>) {
        *self.failure.lock() = failure.map(|(m, r)| (m.to_string(), r));
    }

    /// Makes every call take `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Leaves `id` out of every report.
    pub fn reject(&self, id: EventId) {
        self.rejected.lock().insert(id);
    }

    /// Returns the ids of every batch received, in call order.
    pub fn delivered(&self) -> Vec<Vec<EventId>> {
        self.delivered.lock().clone()
    }

    /// Returns the number of calls received.
    pub fn delivery_count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Returns the highest number of calls ever in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn deliver(&self, events: &[Event]) -> SyncResult<DeliveryReport> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.delivered
            .lock()
            .push(events.iter().map(|e| e.id).collect());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        if let Some((message, retryable)) = self.failure.lock().clone() {
            return Err(SyncError::Transport { message, retryable });
        }
        let rejected = self.rejected.lock();
        Ok(DeliveryReport::partial(
            events
                .iter()
                .map(|e| e.id)
                .filter(|id| !rejected.contains(id)),
        ))
    }
}
