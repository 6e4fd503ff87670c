//! The watchdog context object.
//!
//! A [`Watchdog`] owns the liveness tracker, the monitor thread and the
//! termination capability for one monitored process. Create it once in the
//! host's initialization code and pass it (or a [`HeartbeatHandle`]) to
//! whatever needs it; there is no ambient global.
//!
//! # Single instance
//!
//! `start()` is guarded by a flag: the first successful call arms the
//! tracker and spawns the monitor, every later call is a no-op. A process
//! should hold exactly one started `Watchdog`.
//!
//! # No cancellation
//!
//! There is no `stop()`. Dropping a started `Watchdog` leaves its monitor
//! running; monitoring ends when the process does.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock, Timestamp};
use crate::config::WatchdogConfig;
use crate::diagnostics::{EventSink, WatchdogEvent};
use crate::error::{WatchdogError, WatchdogResult};
use crate::monitor::{self, MonitorPhase, Shared};
use crate::terminate::{ProcessTerminator, Terminator};
use crate::tracker::{Expiry, HeartbeatHandle, LivenessTracker};

/// Result of [`Watchdog::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// This call armed the watchdog and spawned the monitor.
    Started,
    /// The watchdog was already started; nothing changed.
    AlreadyStarted,
}

/// Process liveness watchdog.
///
/// # Example
///
/// ```rust
/// use stallwatch::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let recorder = Arc::new(RecordingTerminator::new());
/// let watchdog = Watchdog::builder()
///     .terminator(recorder.clone())
///     .build()
///     .expect("valid config");
///
/// watchdog.start(10_000).expect("started");
/// watchdog.heartbeat();
/// assert!(watchdog.is_armed());
/// assert_eq!(watchdog.timeout(), Some(Duration::from_secs(10)));
/// ```
pub struct Watchdog<C: Clock = MonotonicClock> {
    shared: Arc<Shared<C>>,
    started: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog<MonotonicClock> {
    /// Create a watchdog on the system monotonic clock that terminates the
    /// process on expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WatchdogConfig) -> WatchdogResult<Self> {
        Self::builder().config(config).build()
    }

    /// Create a watchdog builder.
    #[must_use]
    pub fn builder() -> WatchdogBuilder<MonotonicClock> {
        WatchdogBuilder::default()
    }
}

impl<C: Clock> Watchdog<C> {
    /// Arm the watchdog with `timeout_ms` and spawn the monitor thread.
    ///
    /// Returns without waiting for the monitor. Calls after the first
    /// successful one return [`StartOutcome::AlreadyStarted`] and change
    /// nothing, whatever timeout they pass.
    ///
    /// # Errors
    ///
    /// - [`WatchdogError::InvalidConfiguration`] if `timeout_ms` is 0
    /// - [`WatchdogError::ClockUnavailable`] if the clock cannot be read
    /// - [`WatchdogError::MonitorSpawnFailed`] if the OS refuses a thread
    ///
    /// On error the watchdog stays unstarted and `start` may be retried.
    pub fn start(&self, timeout_ms: u64) -> WatchdogResult<StartOutcome> {
        if self.started.load(Ordering::Acquire) {
            return Ok(StartOutcome::AlreadyStarted);
        }
        let timeout = WatchdogConfig::validate_timeout(timeout_ms)?;
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(StartOutcome::AlreadyStarted);
        }

        if let Err(err) = self.shared.tracker.arm(timeout) {
            self.started.store(false, Ordering::Release);
            return Err(err.into());
        }

        let poll_interval = self.shared.config.poll.interval_for(timeout);
        match monitor::spawn(Arc::clone(&self.shared), poll_interval) {
            Ok(handle) => {
                *self.monitor.lock() = Some(handle);
            }
            Err(err) => {
                self.shared.tracker.disarm_unmonitored();
                self.started.store(false, Ordering::Release);
                tracing::error!(error = %err, "Failed to spawn watchdog monitor thread");
                return Err(WatchdogError::monitor_spawn_failed(&err));
            }
        }

        Ok(StartOutcome::Started)
    }

    /// Record that the monitored loop is alive.
    ///
    /// Lock-free and allocation-free. Ignored before `start()`.
    pub fn heartbeat(&self) {
        self.shared.tracker.heartbeat();
    }

    /// A clonable heartbeat endpoint for the monitored loop.
    #[must_use]
    pub fn handle(&self) -> HeartbeatHandle<C> {
        HeartbeatHandle::new(Arc::clone(&self.shared.tracker))
    }

    /// Register a callback for watchdog events.
    ///
    /// Callbacks run on the monitor thread; see
    /// [`EventCallback`](crate::diagnostics::EventCallback).
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&WatchdogEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(callback);
    }

    /// Whether `start()` has succeeded.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether the tracker is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.shared.tracker.is_armed()
    }

    /// The armed timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.tracker.timeout()
    }

    /// The most recent heartbeat.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<Timestamp> {
        self.shared.tracker.last_heartbeat()
    }

    /// Number of heartbeats since arming.
    #[must_use]
    pub fn heartbeat_count(&self) -> u64 {
        self.shared.tracker.heartbeat_count()
    }

    /// Expiry status right now, or `None` if the clock cannot be read.
    #[must_use]
    pub fn expiry(&self) -> Option<Expiry> {
        let now = self.shared.tracker.clock().now().ok()?;
        Some(self.shared.tracker.expiry(now))
    }

    /// Current monitor phase.
    #[must_use]
    pub fn phase(&self) -> MonitorPhase {
        self.shared.phase.get()
    }

    /// Whether the monitor thread has exited (only after firing with a
    /// terminator that returns).
    #[must_use]
    pub fn is_monitor_finished(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(JoinHandle::is_finished)
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.shared.config
    }

    /// The clock in use.
    #[must_use]
    pub fn clock(&self) -> &C {
        self.shared.tracker.clock()
    }
}

impl<C: Clock> std::fmt::Debug for Watchdog<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("started", &self.is_started())
            .field("timeout", &self.timeout())
            .field("phase", &self.phase())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Builder for [`Watchdog`].
pub struct WatchdogBuilder<C: Clock = MonotonicClock> {
    config: WatchdogConfig,
    clock: C,
    terminator: Arc<dyn Terminator>,
    events: EventSink,
}

impl Default for WatchdogBuilder<MonotonicClock> {
    fn default() -> Self {
        Self {
            config: WatchdogConfig::default(),
            clock: MonotonicClock::new(),
            terminator: Arc::new(ProcessTerminator),
            events: EventSink::new(),
        }
    }
}

impl<C: Clock> WatchdogBuilder<C> {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: WatchdogConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different clock.
    #[must_use]
    pub fn clock<C2: Clock>(self, clock: C2) -> WatchdogBuilder<C2> {
        WatchdogBuilder {
            config: self.config,
            clock,
            terminator: self.terminator,
            events: self.events,
        }
    }

    /// Use a different termination capability.
    #[must_use]
    pub fn terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    /// Register an event callback before the watchdog exists.
    #[must_use]
    pub fn on_event<F>(self, callback: F) -> Self
    where
        F: Fn(&WatchdogEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback);
        self
    }

    /// Build the watchdog.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> WatchdogResult<Watchdog<C>> {
        self.config.validate()?;
        Ok(Watchdog {
            shared: Arc::new(Shared::new(
                LivenessTracker::with_clock(self.clock),
                self.events,
                self.terminator,
                self.config,
            )),
            started: AtomicBool::new(false),
            monitor: Mutex::new(None),
        })
    }
}

impl<C: Clock> std::fmt::Debug for WatchdogBuilder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogBuilder")
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::terminate::RecordingTerminator;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn quiet_config() -> WatchdogResult<WatchdogConfig> {
        WatchdogConfig::builder()
            .poll_bounds(Duration::from_millis(5), Duration::from_millis(20))
            .report_to_stderr(false)
            .build()
    }

    #[test]
    fn test_unstarted_watchdog() -> TestResult {
        let watchdog = Watchdog::builder()
            .config(quiet_config()?)
            .terminator(Arc::new(RecordingTerminator::new()))
            .build()?;

        assert!(!watchdog.is_started());
        assert!(!watchdog.is_armed());
        assert_eq!(watchdog.phase(), MonitorPhase::Idle);
        assert_eq!(watchdog.expiry(), Some(Expiry::Disarmed));
        assert!(!watchdog.is_monitor_finished());

        watchdog.heartbeat();
        assert_eq!(watchdog.heartbeat_count(), 0);
        Ok(())
    }

    #[test]
    fn test_zero_timeout_rejected_and_retry_allowed() -> TestResult {
        let watchdog = Watchdog::builder()
            .config(quiet_config()?)
            .terminator(Arc::new(RecordingTerminator::new()))
            .build()?;

        let result = watchdog.start(0);
        assert!(matches!(result, Err(WatchdogError::InvalidConfiguration(_))));
        assert!(!watchdog.is_started());

        assert_eq!(watchdog.start(60_000)?, StartOutcome::Started);
        assert!(watchdog.is_started());
        Ok(())
    }

    #[test]
    fn test_clock_failure_at_start_is_reported() -> TestResult {
        let clock = Arc::new(ManualClock::new());
        clock.set_failing(true);
        let watchdog = Watchdog::builder()
            .config(quiet_config()?)
            .clock(Arc::clone(&clock))
            .terminator(Arc::new(RecordingTerminator::new()))
            .build()?;

        let result = watchdog.start(1000);
        assert!(matches!(result, Err(WatchdogError::ClockUnavailable(_))));
        assert!(!watchdog.is_started());
        assert!(!watchdog.is_armed());

        clock.set_failing(false);
        assert_eq!(watchdog.start(1000)?, StartOutcome::Started);
        Ok(())
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = WatchdogConfig {
            timeout_exit_code: 0,
            ..WatchdogConfig::default()
        };
        assert!(Watchdog::new(config).is_err());
    }
}
