//! Monotonic time sources.
//!
//! Timestamps are nanoseconds since a clock-specific origin, stored as a
//! plain `u64` so the liveness tracker can keep them in a single atomic
//! slot. Wall-clock time is never used.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::ClockError;

/// A monotonic point in time, in nanoseconds since the clock's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Self = Self(0);

    /// Create a timestamp from raw nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Raw nanoseconds since the origin.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, saturating at zero.
    #[must_use]
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Timestamp advanced by `duration`, saturating at `u64::MAX` nanoseconds.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_nanos(duration)))
    }
}

/// Convert a duration to nanoseconds, saturating at `u64::MAX`.
#[must_use]
pub fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// A source of monotonic timestamps.
///
/// `now()` is on the heartbeat hot path: implementations must not block
/// or allocate.
pub trait Clock: Send + Sync + 'static {
    /// Read the current time.
    ///
    /// # Errors
    ///
    /// Returns a [`ClockError`] if the time source cannot produce a valid
    /// monotonic reading.
    fn now(&self) -> Result<Timestamp, ClockError>;
}

/// The operating system's monotonic clock, measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Result<Timestamp, ClockError> {
        let elapsed = Instant::now()
            .checked_duration_since(self.origin)
            .ok_or(ClockError::WentBackwards)?;
        let nanos = u64::try_from(elapsed.as_nanos()).map_err(|_overflow| ClockError::Overflow)?;
        Ok(Timestamp(nanos))
    }
}

/// A manually driven clock for deterministic tests.
///
/// Time only moves when [`advance`](Self::advance) or [`set`](Self::set) is
/// called. [`set_failing`](Self::set_failing) makes every read return
/// [`ClockError::Unavailable`].
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
    failing: AtomicBool,
}

impl ManualClock {
    /// Create a clock at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let delta = duration_to_nanos(duration);
        // fetch_update never fails with an always-Some closure.
        let _previous = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(delta))
            });
    }

    /// Jump to an absolute timestamp.
    pub fn set(&self, timestamp: Timestamp) {
        self.nanos.store(timestamp.as_nanos(), Ordering::Release);
    }

    /// Make subsequent reads fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Current reading, ignoring the failure flag.
    #[must_use]
    pub fn peek(&self) -> Timestamp {
        Timestamp(self.nanos.load(Ordering::Acquire))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<Timestamp, ClockError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(ClockError::Unavailable);
        }
        Ok(self.peek())
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> Result<Timestamp, ClockError> {
        (**self).now()
    }
}
