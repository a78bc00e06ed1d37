//! Connectivity monitor.
//!
//! Turns reachability reports from the platform into
//! `connectivity.restored` / `connectivity.lost` events on the event log.
//! Only transitions are emitted; repeated reports of the same state are
//! ignored.

use opsledger_core::{kinds, EventLog, FixedNetwork, NetworkProbe, NetworkType};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Observes reachability and reports transitions to an [`EventLog`].
pub struct ConnectivityMonitor {
    log: EventLog,
    online: AtomicBool,
    probe: Arc<dyn NetworkProbe>,
}

impl ConnectivityMonitor {
    /// Creates a monitor starting in `initially_online`.
    ///
    /// `probe` supplies the connection type while online; without one the
    /// type is reported as unknown.
    pub fn new(
        log: EventLog,
        initially_online: bool,
        probe: Option<Arc<dyn NetworkProbe>>,
    ) -> Self {
        Self {
            log,
            online: AtomicBool::new(initially_online),
            probe: probe.unwrap_or_else(|| Arc::new(FixedNetwork(NetworkType::Unknown))),
        }
    }

    /// Records the current reachability.
    ///
    /// Returns true if this was a transition (and an event was emitted).
    pub fn report(&self, online: bool) -> bool {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return false;
        }
        let network_type = self.network_type();
        let kind = if online {
            kinds::CONNECTIVITY_RESTORED
        } else {
            kinds::CONNECTIVITY_LOST
        };
        tracing::info!(online, ?network_type, "connectivity changed");
        self.log.emit(kind, json!({ "network_type": network_type }));
        true
    }

    /// Returns the last reported reachability.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Forwards every value published on `rx` to [`ConnectivityMonitor::report`].
    ///
    /// The task ends when the sender is dropped.
    pub fn watch(self: &Arc<Self>, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let initial = *rx.borrow_and_update();
            monitor.report(initial);
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                monitor.report(online);
            }
            tracing::debug!("connectivity source closed");
        })
    }
}

impl NetworkProbe for ConnectivityMonitor {
    fn network_type(&self) -> NetworkType {
        if self.is_online() {
            self.probe.network_type()
        } else {
            NetworkType::Offline
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}
