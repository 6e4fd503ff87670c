//! Watchdog configuration.
//!
//! The timeout itself is supplied to [`Watchdog::start`](crate::Watchdog::start);
//! everything here shapes how the monitor polls, reports and terminates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{WatchdogError, WatchdogResult};

/// Exit status used when the watchdog kills the process on timeout.
///
/// Chosen to stay clear of the statuses ordinary applications and language
/// runtimes use for their own exits.
pub const TIMEOUT_EXIT_CODE: i32 = 87;

/// How the monitor derives its sleep between expiry checks.
///
/// The interval is `timeout / divisor`, clamped to
/// `[min_interval, max_interval]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Fraction of the timeout to sleep between checks.
    pub divisor: u32,
    /// Lower bound, so short timeouts do not busy-spin.
    pub min_interval: Duration,
    /// Upper bound, so long timeouts still notice a suspend promptly.
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            divisor: 4,
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
        }
    }
}

impl PollPolicy {
    /// Poll interval for a given timeout.
    #[must_use]
    pub fn interval_for(&self, timeout: Duration) -> Duration {
        let divisor = self.divisor.max(1);
        (timeout / divisor)
            .max(self.min_interval)
            .min(self.max_interval.max(self.min_interval))
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the divisor is zero, the minimum interval is zero
    /// or the bounds are inverted.
    pub fn validate(&self) -> WatchdogResult<()> {
        if self.divisor == 0 {
            return Err(WatchdogError::invalid_configuration(
                "poll divisor must be greater than 0",
            ));
        }
        if self.min_interval.is_zero() {
            return Err(WatchdogError::invalid_configuration(
                "poll min_interval must be greater than 0",
            ));
        }
        if self.max_interval < self.min_interval {
            return Err(WatchdogError::invalid_configuration(
                "poll max_interval must not be less than min_interval",
            ));
        }
        Ok(())
    }
}

/// How hard the process is ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStrategy {
    /// `_exit(2)`: no atexit handlers, no destructors, no stdio flush.
    #[default]
    Immediate,
    /// Normal process exit, escalated to [`Immediate`](Self::Immediate)
    /// if the process is still alive after `grace`.
    Graceful {
        /// How long the normal exit path may take.
        grace: Duration,
    },
}

/// Watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Poll interval policy.
    pub poll: PollPolicy,
    /// Oversleep beyond the poll interval that is treated as a host suspend
    /// rather than a stall. Zero disables suspend detection.
    pub suspend_threshold: Duration,
    /// Exit status on timeout.
    pub timeout_exit_code: i32,
    /// Termination strategy on timeout.
    pub timeout_exit: ExitStrategy,
    /// Write a JSON stall report to stderr before terminating.
    pub report_to_stderr: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            suspend_threshold: Duration::from_secs(5),
            timeout_exit_code: TIMEOUT_EXIT_CODE,
            timeout_exit: ExitStrategy::Immediate,
            report_to_stderr: true,
        }
    }
}

impl WatchdogConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> WatchdogResult<()> {
        self.poll.validate()?;
        if self.timeout_exit_code == 0 {
            return Err(WatchdogError::invalid_configuration(
                "timeout_exit_code must not be 0",
            ));
        }
        if let ExitStrategy::Graceful { grace } = self.timeout_exit
            && grace.is_zero()
        {
            return Err(WatchdogError::invalid_configuration(
                "graceful exit grace must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> WatchdogConfigBuilder {
        WatchdogConfigBuilder::default()
    }

    /// Check a timeout supplied at start time.
    ///
    /// # Errors
    ///
    /// Returns an error if `timeout_ms` is 0.
    pub fn validate_timeout(timeout_ms: u64) -> WatchdogResult<Duration> {
        if timeout_ms == 0 {
            return Err(WatchdogError::invalid_configuration(
                "timeout_ms must be greater than 0",
            ));
        }
        Ok(Duration::from_millis(timeout_ms))
    }
}

/// Builder for `WatchdogConfig`.
#[derive(Debug, Default)]
pub struct WatchdogConfigBuilder {
    config: WatchdogConfig,
}

impl WatchdogConfigBuilder {
    /// Set the poll policy.
    #[must_use]
    pub fn poll(mut self, poll: PollPolicy) -> Self {
        self.config.poll = poll;
        self
    }

    /// Set the poll divisor.
    #[must_use]
    pub fn poll_divisor(mut self, divisor: u32) -> Self {
        self.config.poll.divisor = divisor;
        self
    }

    /// Set the poll interval bounds.
    #[must_use]
    pub fn poll_bounds(mut self, min_interval: Duration, max_interval: Duration) -> Self {
        self.config.poll.min_interval = min_interval;
        self.config.poll.max_interval = max_interval;
        self
    }

    /// Set the suspend detection threshold.
    #[must_use]
    pub fn suspend_threshold(mut self, threshold: Duration) -> Self {
        self.config.suspend_threshold = threshold;
        self
    }

    /// Set the exit status used on timeout.
    #[must_use]
    pub fn timeout_exit_code(mut self, code: i32) -> Self {
        self.config.timeout_exit_code = code;
        self
    }

    /// Set the termination strategy used on timeout.
    #[must_use]
    pub fn timeout_exit(mut self, strategy: ExitStrategy) -> Self {
        self.config.timeout_exit = strategy;
        self
    }

    /// Enable or disable the stderr stall report.
    #[must_use]
    pub fn report_to_stderr(mut self, enabled: bool) -> Self {
        self.config.report_to_stderr = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> WatchdogResult<WatchdogConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
