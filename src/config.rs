//! Engine configuration.
//!
//! Every timing constant the engine relies on lives here so tests and
//! embedders can shorten or lengthen them without touching the flow.

use std::time::Duration;

/// Timing and policy knobs for the pairing and provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Wait after a pre-pairing reset before negotiating again.
    pub settle_interval: Duration,
    /// How long the negotiation waits for the user to enter a PIN.
    pub pin_timeout: Duration,
    /// Interval between status characteristic reads.
    pub poll_interval: Duration,
    /// Maximum number of status reads before giving up.
    pub poll_ceiling: u32,
    /// Suggested wait before retrying after an unexplained native failure.
    pub retry_cooldown: Duration,
    /// How long to scan for a peripheral that is not yet known to the adapter.
    pub discovery_timeout: Duration,
    /// Default protection level used by the method channel when the caller
    /// does not say.
    pub require_authentication: bool,
}

impl EngineConfig {
    /// Default settle interval (5 seconds).
    pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(5);
    /// Default PIN entry timeout (60 seconds).
    pub const DEFAULT_PIN_TIMEOUT: Duration = Duration::from_secs(60);
    /// Default status poll interval (1 second).
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Shortest accepted status poll interval.
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
    /// Default number of status polls (30).
    pub const DEFAULT_POLL_CEILING: u32 = 30;
    /// Default retry cooldown (30 seconds).
    pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(30);
    /// Default discovery scan (5 seconds).
    pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a configuration with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the settle interval.
    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    /// Set the PIN entry timeout.
    pub fn with_pin_timeout(mut self, timeout: Duration) -> Self {
        self.pin_timeout = timeout;
        self
    }

    /// Set the status polling interval and ceiling.
    ///
    /// Intervals below [`EngineConfig::MIN_POLL_INTERVAL`] are raised to it.
    pub fn with_polling(mut self, interval: Duration, ceiling: u32) -> Self {
        self.poll_interval = interval.max(Self::MIN_POLL_INTERVAL);
        self.poll_ceiling = ceiling;
        self
    }

    /// Set the retry cooldown.
    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    /// Set the discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the default authentication requirement.
    pub fn with_require_authentication(mut self, require: bool) -> Self {
        self.require_authentication = require;
        self
    }

    /// Status poll interval, never shorter than [`EngineConfig::MIN_POLL_INTERVAL`].
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(Self::MIN_POLL_INTERVAL)
    }

    /// Total time the status poll loop may run.
    pub fn poll_window(&self) -> Duration {
        self.effective_poll_interval() * self.poll_ceiling
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_interval: Self::DEFAULT_SETTLE_INTERVAL,
            pin_timeout: Self::DEFAULT_PIN_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            poll_ceiling: Self::DEFAULT_POLL_CEILING,
            retry_cooldown: Self::DEFAULT_RETRY_COOLDOWN,
            discovery_timeout: Self::DEFAULT_DISCOVERY_TIMEOUT,
            require_authentication: true,
        }
    }
}
