//! The sync driver: delivers pending events and reconciles their status.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::state::{CycleOutcome, SyncState, SyncStats};
use crate::transport::SyncTransport;
use opsledger_core::{kinds, Event, EventLog, SubscriptionHandle};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Delivers the event log's pending queue to a [`SyncTransport`].
///
/// At most one cycle runs at a time. A cycle requested while another is
/// delivering is folded into a single "run again" flag, so triggers never
/// pile up. The driver only marks events; removing them is left to the
/// queue's size-bounded eviction.
#[derive(Clone)]
pub struct SyncDriver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    log: EventLog,
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    in_flight: AtomicBool,
    rerun: AtomicBool,
    online: AtomicBool,
    last_success: AtomicBool,
    wake: Notify,
    connectivity: SubscriptionHandle,
}

impl SyncDriver {
    /// Creates a driver for `log` delivering through `transport`.
    ///
    /// The driver starts out online and follows `connectivity.restored` /
    /// `connectivity.lost` events emitted on `log`.
    pub fn new(log: EventLog, transport: Arc<dyn SyncTransport>, config: SyncConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<DriverInner>| {
            let weak = weak.clone();
            let connectivity = log.subscribe(
                [kinds::CONNECTIVITY_RESTORED, kinds::CONNECTIVITY_LOST],
                move |event: &Event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_connectivity(event);
                    }
                    Ok(())
                },
            );
            DriverInner {
                log,
                transport,
                config,
                state: RwLock::new(SyncState::Idle),
                stats: RwLock::new(SyncStats::default()),
                in_flight: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                online: AtomicBool::new(true),
                last_success: AtomicBool::new(true),
                wake: Notify::new(),
                connectivity,
            }
        });
        Self { inner }
    }

    /// Seeds the online flag from `monitor`.
    #[must_use]
    pub fn with_connectivity(self, monitor: &ConnectivityMonitor) -> Self {
        self.inner.online.store(monitor.is_online(), Ordering::SeqCst);
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns the driver configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns false between `connectivity.lost` and `connectivity.restored`.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Wakes a started driver loop for an immediate cycle.
    pub fn trigger(&self) {
        self.inner.wake.notify_one();
    }

    /// Runs one sync cycle, or folds into the one already running.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let inner = &self.inner;
        if !self.is_online() {
            tracing::debug!("offline, skipping sync cycle");
            return CycleOutcome::Offline;
        }

        if inner.in_flight.swap(true, Ordering::AcqRel) {
            inner.rerun.store(true, Ordering::Release);
            // The running cycle may have released between the two swaps.
            if inner.in_flight.swap(true, Ordering::AcqRel) {
                inner.stats.write().coalesced_triggers += 1;
                tracing::debug!("sync cycle already running, coalesced");
                return CycleOutcome::Coalesced;
            }
        }

        loop {
            let flight = FlightGuard(inner);
            inner.rerun.store(false, Ordering::Release);
            let outcome = inner.cycle_once().await;
            drop(flight);

            if !inner.rerun.load(Ordering::Acquire) || !self.is_online() {
                return outcome;
            }
            if inner.in_flight.swap(true, Ordering::AcqRel) {
                return outcome;
            }
            tracing::debug!("running coalesced sync cycle");
        }
    }

    /// Runs a cycle and waits for the resulting queue state to be written.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Ledger`] if the queue could not be persisted.
    pub async fn sync_now(&self) -> SyncResult<CycleOutcome> {
        let outcome = self.run_cycle().await;
        self.inner.log.flush()?;
        Ok(outcome)
    }

    /// Returns how long the loop waits before the next cycle.
    ///
    /// After a fully successful cycle this is the interval. Otherwise the
    /// backoff for the highest `retry_count` among pending events, never
    /// shorter than the interval and never longer than the larger of the
    /// interval and `max_delay`.
    pub fn next_delay(&self) -> Duration {
        let inner = &self.inner;
        let interval = inner.config.interval;
        if inner.last_success.load(Ordering::Acquire) {
            return interval;
        }
        let attempts = inner
            .log
            .max_pending_retries(inner.config.operation_scope.as_deref());
        let retry = &inner.config.retry;
        let cap = retry.max_delay.max(interval);
        retry.delay_for_attempt(attempts).max(interval).min(cap)
    }

    /// Spawns the driver loop on the current tokio runtime.
    ///
    /// Each tick retries degraded persistence, runs a cycle, then sleeps
    /// for [`SyncDriver::next_delay`] or until triggered.
    pub fn start(&self) -> SyncHandle {
        let (stop, mut stop_rx) = watch::channel(false);
        let driver = self.clone();
        let task = tokio::spawn(async move {
            tracing::info!(interval = ?driver.inner.config.interval, "sync driver started");
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                driver.inner.log.retry_persistence();
                let outcome = driver.run_cycle().await;
                let delay = driver.next_delay();
                tracing::debug!(?outcome, next = ?delay, "sync tick finished");

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = driver.inner.wake.notified() => {}
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!("sync driver stopped");
        });
        SyncHandle {
            driver: self.clone(),
            stop,
            task,
        }
    }
}

impl std::fmt::Debug for SyncDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDriver")
            .field("state", &self.state())
            .field("online", &self.is_online())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl DriverInner {
    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn on_connectivity(&self, event: &Event) {
        if event.kind == kinds::CONNECTIVITY_RESTORED {
            if !self.online.swap(true, Ordering::SeqCst) {
                tracing::info!("connectivity restored, triggering sync");
            }
            self.wake.notify_one();
        } else if self.online.swap(false, Ordering::SeqCst) {
            tracing::info!("connectivity lost, pausing sync");
        }
    }

    async fn cycle_once(&self) -> CycleOutcome {
        self.set_state(SyncState::Draining);
        let scope = self.config.operation_scope.as_deref();
        let batch = self.log.pending_batch(scope, self.config.batch_size);
        if batch.is_empty() {
            self.last_success.store(true, Ordering::Release);
            return CycleOutcome::Idle;
        }

        self.set_state(SyncState::Delivering);
        self.log.publish(
            kinds::SYNC_STARTED,
            json!({ "batch_size": batch.len(), "operation_scope": scope }),
        );

        let result = match tokio::time::timeout(
            self.config.delivery_timeout,
            self.transport.deliver(&batch),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        };

        match result {
            Ok(report) => {
                let (synced, failed) = report.split(&batch);
                let marked = self.log.mark_synced(&synced);
                if !failed.is_empty() {
                    self.log.mark_failed(&failed);
                }
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.events_synced += marked as u64;
                    stats.events_failed += failed.len() as u64;
                    stats.last_sync_time = Some(Instant::now());
                    if failed.is_empty() {
                        stats.last_error = None;
                    }
                }
                self.last_success.store(failed.is_empty(), Ordering::Release);
                self.set_state(SyncState::Completed);

                tracing::info!(synced = marked, failed = failed.len(), "batch delivered");
                self.log.publish(
                    kinds::SYNC_COMPLETED,
                    json!({ "synced": marked, "failed": failed.len() }),
                );
                CycleOutcome::Delivered {
                    synced: marked,
                    failed: failed.len(),
                }
            }
            Err(e) => {
                let ids: Vec<_> = batch.iter().map(|event| event.id).collect();
                self.log.mark_failed(&ids);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_failed += 1;
                    stats.events_failed += ids.len() as u64;
                    stats.last_error = Some(e.to_string());
                }
                self.last_success.store(false, Ordering::Release);
                self.set_state(SyncState::Failed);

                tracing::warn!(
                    error = %e,
                    retryable = e.is_retryable(),
                    batch_size = ids.len(),
                    "batch delivery failed"
                );
                self.log.publish(
                    kinds::SYNC_FAILED,
                    json!({
                        "error": e.to_string(),
                        "retryable": e.is_retryable(),
                        "batch_size": ids.len(),
                    }),
                );
                CycleOutcome::Failed { failed: ids.len() }
            }
        }
    }
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        self.connectivity.unsubscribe();
    }
}

/// Releases the single-flight slot, even if the cycle future is dropped.
struct FlightGuard<'a>(&'a DriverInner);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.set_state(SyncState::Idle);
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// Handle to a started driver loop.
#[derive(Debug)]
pub struct SyncHandle {
    driver: SyncDriver,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Requests an immediate cycle.
    pub fn trigger(&self) {
        self.driver.trigger();
    }

    /// Returns the driver behind this loop.
    pub fn driver(&self) -> &SyncDriver {
        &self.driver
    }

    /// Stops the loop and waits for it to exit.
    ///
    /// A cycle in progress is finished first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the loop task panicked or was
    /// aborted.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.stop.send_replace(true);
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "sync loop did not exit cleanly");
            SyncError::Cancelled
        })
    }
}
