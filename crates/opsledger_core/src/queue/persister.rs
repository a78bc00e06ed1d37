//! Write-behind persistence of queue snapshots.
//!
//! Queue mutations hand the persister a full snapshot and return at once.
//! A background thread writes the newest snapshot, skipping any that were
//! superseded while a write was in progress. Failed writes flip the
//! persister into a degraded state; the failed snapshot is kept so a
//! later [`Persister::retry`] (or any newer snapshot) can try again.

use super::store::QueueStore;
use crate::error::{LedgerError, LedgerResult};
use crate::event::Event;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Outcome notifications delivered to the owner of the persister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PersistEvent {
    /// A write failed. `first` is true on the transition into degraded mode.
    Failed {
        /// Error text.
        error: String,
        /// True if the persister was healthy before this failure.
        first: bool,
    },
    /// A write succeeded after one or more failures.
    Restored,
}

type StatusSink = Box<dyn Fn(PersistEvent) + Send + Sync>;

#[derive(Default)]
struct PersistState {
    /// Newest snapshot not yet handed to the store.
    pending: Option<Vec<Event>>,
    /// Last snapshot whose write failed.
    failed: Option<Vec<Event>>,
    /// Generation of the newest submitted snapshot.
    requested: u64,
    /// Generation of the newest snapshot a write was attempted for.
    attempted: u64,
    writing: bool,
    degraded: bool,
    last_error: Option<String>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PersistState>,
    wake: Condvar,
    done: Condvar,
}

pub(crate) struct Persister {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,
}

impl Persister {
    /// Starts the background writer.
    pub(crate) fn spawn(store: QueueStore, sink: StatusSink) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PersistState::default()),
            wake: Condvar::new(),
            done: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("opsledger-persist".into())
            .spawn(move || run(&worker_shared, &store, &sink));

        match worker {
            Ok(handle) => {
                let worker_id = Some(handle.thread().id());
                Self {
                    shared,
                    worker: Mutex::new(Some(handle)),
                    worker_id,
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "cannot start persister thread, running in memory only"
                );
                {
                    let mut state = shared.state.lock();
                    state.degraded = true;
                    state.shutdown = true;
                    state.last_error = Some(e.to_string());
                }
                Self {
                    shared,
                    worker: Mutex::new(None),
                    worker_id: None,
                }
            }
        }
    }

    /// Queues `snapshot` for writing, superseding any unwritten snapshot.
    pub(crate) fn submit(&self, snapshot: Vec<Event>) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.requested += 1;
        state.pending = Some(snapshot);
        state.failed = None;
        self.shared.wake.notify_one();
    }

    /// Re-queues the last failed snapshot if nothing newer is waiting.
    pub(crate) fn retry(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.pending.is_some() {
            return;
        }
        if let Some(snapshot) = state.failed.take() {
            state.requested += 1;
            state.pending = Some(snapshot);
            self.shared.wake.notify_one();
        }
    }

    /// Returns true while writes are failing.
    pub(crate) fn is_degraded(&self) -> bool {
        self.shared.state.lock().degraded
    }

    /// Blocks until every submitted snapshot has been attempted.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceDegraded`] if the newest attempt
    /// failed.
    pub(crate) fn flush(&self) -> LedgerResult<()> {
        let mut state = self.shared.state.lock();
        if self.worker_id == Some(thread::current().id()) {
            return check(&state);
        }
        while !state.shutdown && (state.attempted < state.requested || state.writing) {
            self.shared.done.wait(&mut state);
        }
        check(&state)
    }

    /// Writes whatever is outstanding and stops the background thread.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.wake.notify_all();
        }
        if self.worker_id == Some(thread::current().id()) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("persister thread panicked");
            }
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check(state: &MutexGuard<'_, PersistState>) -> LedgerResult<()> {
    if state.degraded {
        Err(LedgerError::PersistenceDegraded(
            state
                .last_error
                .clone()
                .unwrap_or_else(|| "queue writes are failing".into()),
        ))
    } else {
        Ok(())
    }
}

fn run(shared: &Shared, store: &QueueStore, sink: &StatusSink) {
    let mut state = shared.state.lock();
    loop {
        if let Some(snapshot) = state.pending.take() {
            let generation = state.requested;
            state.writing = true;

            let result = MutexGuard::unlocked(&mut state, || store.save(&snapshot));

            let notice = match result {
                Ok(()) => {
                    let was_degraded = std::mem::replace(&mut state.degraded, false);
                    state.last_error = None;
                    was_degraded.then_some(PersistEvent::Restored)
                }
                Err(e) => {
                    let first = !std::mem::replace(&mut state.degraded, true);
                    let error = e.to_string();
                    state.last_error = Some(error.clone());
                    if state.pending.is_none() {
                        state.failed = Some(snapshot);
                    }
                    Some(PersistEvent::Failed { error, first })
                }
            };

            // Flushers wake only after the owner has seen the outcome.
            if let Some(notice) = notice {
                MutexGuard::unlocked(&mut state, || sink(notice));
            }
            state.writing = false;
            state.attempted = state.attempted.max(generation);
            shared.done.notify_all();
            continue;
        }

        if state.shutdown {
            shared.done.notify_all();
            return;
        }
        shared.wake.wait(&mut state);
    }
}
