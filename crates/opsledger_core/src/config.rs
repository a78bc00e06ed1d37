//! Event log configuration.

/// Configuration for opening an event log.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Hard upper bound on the number of events in the sync queue.
    pub max_queue_size: usize,

    /// Maximum number of reversible events kept for undo.
    pub max_history: usize,

    /// Maximum number of undone events kept for redo.
    pub max_redo: usize,

    /// Number of events retained in the full in-memory log.
    pub max_log_size: usize,

    /// Storage key the queue blob is written under.
    pub queue_key: String,

    /// Delivery attempts after which an event is marked `Failed`
    /// (`None` = retry forever).
    pub max_delivery_attempts: Option<u32>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_history: 50,
            max_redo: 50,
            max_log_size: 10_000,
            queue_key: "event_queue".to_string(),
            max_delivery_attempts: None,
        }
    }
}

impl LedgerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync queue bound. Values below 1 are raised to 1.
    #[must_use]
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size.max(1);
        self
    }

    /// Sets the undo stack bound.
    #[must_use]
    pub const fn max_history(mut self, size: usize) -> Self {
        self.max_history = size;
        self
    }

    /// Sets the redo stack bound.
    #[must_use]
    pub const fn max_redo(mut self, size: usize) -> Self {
        self.max_redo = size;
        self
    }

    /// Sets how many events the full log retains.
    #[must_use]
    pub const fn max_log_size(mut self, size: usize) -> Self {
        self.max_log_size = size;
        self
    }

    /// Sets the storage key for the queue blob.
    #[must_use]
    pub fn queue_key(mut self, key: impl Into<String>) -> Self {
        self.queue_key = key.into();
        self
    }

    /// Abandons events after `attempts` failed deliveries.
    #[must_use]
    pub const fn max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = Some(attempts);
        self
    }
}
