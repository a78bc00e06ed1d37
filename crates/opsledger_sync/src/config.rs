//! Configuration for the sync driver.

use std::time::Duration;

/// Configuration for delivery cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between scheduled cycles while deliveries succeed.
    pub interval: Duration,
    /// Maximum number of events handed to the transport per cycle.
    pub batch_size: usize,
    /// Deadline for a single transport call.
    pub delivery_timeout: Duration,
    /// Restricts delivery to one operation scope (`None` delivers all).
    pub operation_scope: Option<String>,
    /// Backoff applied to the next cycle after failures.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with the default 30 second interval.
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 100,
            delivery_timeout: Duration::from_secs(30),
            operation_scope: None,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the cycle interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the per-call transport deadline.
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Delivers only events of `scope`.
    #[must_use]
    pub fn with_operation_scope(mut self, scope: impl Into<String>) -> Self {
        self.operation_scope = Some(scope.into());
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Capped exponential backoff between failing cycles.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default backoff: 30 s doubling up to 5 min, with jitter.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay after `attempt` failures (0 means none yet).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap time-derived jitter in `[0, 1)`.
/// Cheap spread in `[0, 1)` taken from the wall clock's sub-second part.
fn rand_jitter() -> f64 {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    f64::from(since_epoch.subsec_micros() % 1000) / 1000.0
}
