//! Clock and identity of the emitting context.
//!
//! Every event is stamped from three injected capabilities:
//! - a [`Clock`] for timestamps,
//! - an [`Identity`] for device, session and actor ids,
//! - a [`NetworkProbe`] for the connection type at emit time.

use opsledger_storage::BlobStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Storage key of the per-install device id.
pub const DEVICE_ID_KEY: &str = "device_id";

/// Actor id used until the application calls [`Identity::set_actor`].
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Source of wall-clock milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to. For tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start` milliseconds.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute reading (may go backwards).
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Connection type reported at emit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NetworkType {
    /// The platform did not say.
    #[default]
    Unknown,
    /// No connectivity.
    Offline,
    /// Wired connection.
    Ethernet,
    /// Wireless LAN.
    Wifi,
    /// Mobile data.
    Cellular,
}

/// Platform capability reporting the current connection type.
pub trait NetworkProbe: Send + Sync {
    /// Returns the connection type right now.
    fn network_type(&self) -> NetworkType;
}

/// A probe that always reports the same value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedNetwork(pub NetworkType);

impl NetworkProbe for FixedNetwork {
    fn network_type(&self) -> NetworkType {
        self.0
    }
}

/// Device, session and actor identity of this process.
#[derive(Debug)]
pub struct Identity {
    device_id: String,
    session_id: String,
    actor_id: RwLock<String>,
    user_agent: String,
    session_started_ms: u64,
}

impl Identity {
    /// Creates an identity for a known device, starting a new session now.
    pub fn new(
        device_id: impl Into<String>,
        user_agent: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            session_id: Uuid::new_v4().to_string(),
            actor_id: RwLock::new(ANONYMOUS_ACTOR.to_string()),
            user_agent: user_agent.into(),
            session_started_ms: clock.now_millis(),
        }
    }

    /// Creates an identity with a device id that is not persisted.
    pub fn ephemeral(user_agent: impl Into<String>, clock: &dyn Clock) -> Self {
        Self::new(Uuid::new_v4().to_string(), user_agent, clock)
    }

    /// Loads the device id from `store`, minting and saving one on first
    /// run so it stays stable for the installation.
    ///
    /// If the store cannot be read or written the identity falls back to an
    /// ephemeral device id and logs a warning.
    pub fn load_or_create(
        store: &dyn BlobStore,
        user_agent: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        let device_id = match store.read(DEVICE_ID_KEY) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
                _ => {
                    tracing::warn!("stored device id is unreadable, minting a new one");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read device id, using an ephemeral one");
                return Self::ephemeral(user_agent, clock);
            }
        };

        let device_id = match device_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                if let Err(e) = store.write(DEVICE_ID_KEY, id.as_bytes()) {
                    tracing::warn!(error = %e, "cannot persist device id");
                }
                id
            }
        };

        Self::new(device_id, user_agent, clock)
    }

    /// Returns the per-install device id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the per-process session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the current actor id.
    #[must_use]
    pub fn actor_id(&self) -> String {
        self.actor_id.read().clone()
    }

    /// Changes the actor stamped on subsequent events (sign-in, hand-over).
    pub fn set_actor(&self, actor_id: impl Into<String>) {
        *self.actor_id.write() = actor_id.into();
    }

    /// Returns the user-agent string.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns when the session started.
    #[must_use]
    pub fn session_started_ms(&self) -> u64 {
        self.session_started_ms
    }

    /// Milliseconds elapsed since the session started.
    #[must_use]
    pub fn session_elapsed_ms(&self, now_millis: u64) -> u64 {
        now_millis.saturating_sub(self.session_started_ms)
    }
}
