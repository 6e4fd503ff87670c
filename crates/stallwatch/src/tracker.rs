//! Liveness tracker: arm state and the last-heartbeat timestamp.
//!
//! The tracker is shared between the monitored loop, which calls
//! [`LivenessTracker::heartbeat`], and the monitor thread, which calls
//! [`LivenessTracker::is_expired`]. All state lives in atomics so neither
//! side ever blocks the other.
//!
//! # Publication
//!
//! `arm()` writes the timeout and the initial heartbeat, then publishes
//! them with a `Release` store of the `Armed` state. Readers that observe
//! `Armed` with `Acquire` therefore see both values.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock, Timestamp, duration_to_nanos};
use crate::error::ClockError;

const DISARMED: u8 = 0;
const ARMING: u8 = 1;
const ARMED: u8 = 2;

/// Result of an [`arm`](LivenessTracker::arm) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// The tracker was armed by this call.
    Armed,
    /// The tracker was already armed; nothing changed.
    AlreadyArmed,
}

/// Expiry status at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Not armed; never expires.
    Disarmed,
    /// Armed and within the deadline.
    Alive {
        /// Time left until the deadline.
        remaining: Duration,
    },
    /// The deadline has passed.
    Expired {
        /// Time since the last heartbeat.
        elapsed: Duration,
    },
}

impl Expiry {
    /// Whether this status is [`Expiry::Expired`].
    #[must_use]
    pub fn is_expired(self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

/// Thread-safe store of the watchdog deadline.
#[derive(Debug)]
pub struct LivenessTracker<C: Clock = MonotonicClock> {
    clock: C,
    state: AtomicU8,
    timeout_nanos: AtomicU64,
    last_heartbeat: AtomicU64,
    heartbeat_count: AtomicU64,
}

impl LivenessTracker<MonotonicClock> {
    /// Create a disarmed tracker on the system monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for LivenessTracker<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> LivenessTracker<C> {
    /// Create a disarmed tracker on the given clock.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            state: AtomicU8::new(DISARMED),
            timeout_nanos: AtomicU64::new(0),
            last_heartbeat: AtomicU64::new(0),
            heartbeat_count: AtomicU64::new(0),
        }
    }

    /// The clock this tracker reads.
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Arm the tracker with `timeout`, counting from now.
    ///
    /// Only the first successful call has any effect; later calls return
    /// [`ArmOutcome::AlreadyArmed`] and leave the timeout and heartbeat
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns the clock error if the initial heartbeat cannot be read. The
    /// tracker stays disarmed in that case.
    pub fn arm(&self, timeout: Duration) -> Result<ArmOutcome, ClockError> {
        if self
            .state
            .compare_exchange(DISARMED, ARMING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(ArmOutcome::AlreadyArmed);
        }

        let now = match self.clock.now() {
            Ok(now) => now,
            Err(err) => {
                self.state.store(DISARMED, Ordering::Release);
                return Err(err);
            }
        };

        self.timeout_nanos
            .store(duration_to_nanos(timeout), Ordering::Relaxed);
        self.last_heartbeat.store(now.as_nanos(), Ordering::Relaxed);
        self.state.store(ARMED, Ordering::Release);
        Ok(ArmOutcome::Armed)
    }

    /// Record that the monitored loop is alive.
    ///
    /// Ignored before `arm()`. Never blocks, never allocates, never fails:
    /// a clock read error simply drops this heartbeat.
    pub fn heartbeat(&self) {
        if !self.is_armed() {
            return;
        }
        if let Ok(now) = self.clock.now() {
            self.refresh_at(now);
            self.heartbeat_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Move the last heartbeat forward to `at` without counting it as a
    /// host heartbeat.
    ///
    /// The stored value only ever moves forward.
    pub(crate) fn refresh_at(&self, at: Timestamp) {
        self.last_heartbeat.fetch_max(at.as_nanos(), Ordering::AcqRel);
    }

    /// Undo an `arm()` whose monitor never started.
    pub(crate) fn disarm_unmonitored(&self) {
        self.state.store(DISARMED, Ordering::Release);
    }

    /// Whether `arm()` has completed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    /// True iff armed and at least `timeout` has passed since the last
    /// heartbeat as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiry(now).is_expired()
    }

    /// Expiry status as of `now`.
    ///
    /// A heartbeat that lands after `now` was read counts as zero elapsed
    /// time rather than a negative one.
    #[must_use]
    pub fn expiry(&self, now: Timestamp) -> Expiry {
        if !self.is_armed() {
            return Expiry::Disarmed;
        }
        let last = Timestamp::from_nanos(self.last_heartbeat.load(Ordering::Acquire));
        let timeout = Duration::from_nanos(self.timeout_nanos.load(Ordering::Relaxed));
        let elapsed = now.saturating_since(last);
        if elapsed >= timeout {
            Expiry::Expired { elapsed }
        } else {
            Expiry::Alive {
                remaining: timeout.saturating_sub(elapsed),
            }
        }
    }

    /// The armed timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.is_armed()
            .then(|| Duration::from_nanos(self.timeout_nanos.load(Ordering::Relaxed)))
    }

    /// The most recent heartbeat (the arm time if none has arrived yet).
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<Timestamp> {
        self.is_armed()
            .then(|| Timestamp::from_nanos(self.last_heartbeat.load(Ordering::Acquire)))
    }

    /// Number of heartbeats recorded since arming.
    #[must_use]
    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeat_count.load(Ordering::Relaxed)
    }
}

/// Cheap, clonable endpoint for the monitored loop.
///
/// Hand this to whatever scheduler drives the loop instead of sharing the
/// whole [`Watchdog`](crate::Watchdog).
#[derive(Debug)]
pub struct HeartbeatHandle<C: Clock = MonotonicClock> {
    tracker: Arc<LivenessTracker<C>>,
}

impl<C: Clock> HeartbeatHandle<C> {
    pub(crate) fn new(tracker: Arc<LivenessTracker<C>>) -> Self {
        Self { tracker }
    }

    /// Record a heartbeat.
    pub fn beat(&self) {
        self.tracker.heartbeat();
    }

    /// Whether the watchdog behind this handle is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.tracker.is_armed()
    }
}

impl<C: Clock> Clone for HeartbeatHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tracker: Arc::clone(&self.tracker),
        }
    }
}
