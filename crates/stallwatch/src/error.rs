//! Error types for the watchdog.
//!
//! Only the cold paths report errors: configuring and starting the
//! watchdog. `heartbeat()` and expiry checks never fail.

use thiserror::Error;

/// Errors that can occur while configuring or starting the watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogError {
    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The monitor thread could not be spawned.
    #[error("Failed to spawn monitor thread: {0}")]
    MonitorSpawnFailed(String),

    /// The clock could not be read while arming.
    #[error("Clock unavailable while arming: {0}")]
    ClockUnavailable(#[from] ClockError),
}

impl WatchdogError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create a monitor spawn error from the underlying I/O failure.
    #[must_use]
    pub fn monitor_spawn_failed(source: &std::io::Error) -> Self {
        Self::MonitorSpawnFailed(source.to_string())
    }
}

/// Failures reading a [`Clock`](crate::clock::Clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The clock reported a time earlier than its origin.
    #[error("clock went backwards past its origin")]
    WentBackwards,

    /// The elapsed time no longer fits in a 64-bit nanosecond timestamp.
    #[error("timestamp overflowed 64-bit nanoseconds")]
    Overflow,

    /// The clock source is unavailable.
    #[error("clock source unavailable")]
    Unavailable,
}

/// A specialized `Result` type for watchdog operations.
pub type WatchdogResult<T> = std::result::Result<T, WatchdogError>;
