//! The monitor thread.
//!
//! ```text
//! ┌──────┐  start()  ┌─────────┐  poll elapsed  ┌──────────┐  expired  ┌────────┐
//! │ Idle │──────────►│ Waiting │───────────────►│ Checking │──────────►│ Firing │
//! └──────┘           └─────────┘◄───────────────└──────────┘           └────────┘
//!                                   alive / clock error / suspend        terminal
//! ```
//!
//! The thread sleeps with the OS timer, never by yielding to the monitored
//! code, so a wedged application loop cannot starve it. It has no stop
//! signal: it runs until it fires or the process exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::{Clock, Timestamp};
use crate::config::WatchdogConfig;
use crate::diagnostics::{EventSink, StallReport, WatchdogEvent};
use crate::error::ClockError;
use crate::terminate::{TerminationReason, TerminationRequest, Terminator};
use crate::tracker::{Expiry, LivenessTracker};

/// Monitor thread lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MonitorPhase {
    /// Not started.
    #[default]
    Idle = 0,
    /// Sleeping until the next check.
    Waiting = 1,
    /// Reading the clock and the tracker.
    Checking = 2,
    /// Expired; termination has been requested (terminal).
    Firing = 3,
}

impl MonitorPhase {
    /// Convert from raw u8 value.
    #[must_use]
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Waiting),
            2 => Some(Self::Checking),
            3 => Some(Self::Firing),
            _ => None,
        }
    }

    /// Convert to raw u8 value.
    #[must_use]
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    /// Whether no further transitions can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Firing)
    }

    /// Get the phase as a string slice.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Waiting => "Waiting",
            Self::Checking => "Checking",
            Self::Firing => "Firing",
        }
    }
}

impl std::fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for the current [`MonitorPhase`].
#[derive(Debug, Default)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn get(&self) -> MonitorPhase {
        MonitorPhase::from_raw(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Move to `next` unless already terminal.
    pub(crate) fn set(&self, next: MonitorPhase) {
        // Never fails: the closure only declines once terminal.
        let _previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (raw != MonitorPhase::Firing.to_raw()).then_some(next.to_raw())
            });
    }
}

/// Outcome of one monitor check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Heartbeat within the deadline (or not armed).
    Alive,
    /// The clock could not be read; treated as alive.
    ClockFailed(ClockError),
    /// The monitor overslept; a heartbeat was synthesized.
    Resumed { gap: Duration },
    /// Deadline passed.
    Expired { elapsed: Duration, timeout: Duration },
}

/// The decision half of the monitor loop, free of sleeping and side
/// effects other than the synthetic heartbeat on resume.
#[derive(Debug)]
pub(crate) struct Checker {
    poll_interval: Duration,
    suspend_threshold: Duration,
    last_wake: Option<Timestamp>,
}

impl Checker {
    pub(crate) fn new(poll_interval: Duration, suspend_threshold: Duration) -> Self {
        Self {
            poll_interval,
            suspend_threshold,
            last_wake: None,
        }
    }

    /// Seed the oversleep detector with the arm time.
    pub(crate) fn with_start(mut self, start: Option<Timestamp>) -> Self {
        self.last_wake = start;
        self
    }

    pub(crate) fn check<C: Clock>(&mut self, tracker: &LivenessTracker<C>) -> Verdict {
        let now = match tracker.clock().now() {
            Ok(now) => now,
            Err(error) => {
                self.last_wake = None;
                return Verdict::ClockFailed(error);
            }
        };

        let previous = self.last_wake.replace(now);
        if let Some(previous) = previous
            && self.overslept(now.saturating_since(previous))
        {
            tracker.refresh_at(now);
            return Verdict::Resumed {
                gap: now.saturating_since(previous),
            };
        }

        match tracker.expiry(now) {
            Expiry::Expired { elapsed } => Verdict::Expired {
                elapsed,
                timeout: tracker.timeout().unwrap_or(elapsed),
            },
            Expiry::Alive { .. } | Expiry::Disarmed => Verdict::Alive,
        }
    }

    fn overslept(&self, gap: Duration) -> bool {
        !self.suspend_threshold.is_zero()
            && gap > self.poll_interval.saturating_add(self.suspend_threshold)
    }
}

/// Longest the monitor waits on event delivery before terminating anyway.
const EVENT_DELIVERY_BOUND: Duration = Duration::from_millis(250);

/// Everything the monitor thread shares with its [`Watchdog`](crate::Watchdog).
pub(crate) struct Shared<C: Clock> {
    pub(crate) tracker: Arc<LivenessTracker<C>>,
    pub(crate) events: EventSink,
    pub(crate) terminator: Arc<dyn Terminator>,
    pub(crate) config: WatchdogConfig,
    pub(crate) phase: PhaseCell,
    pub(crate) terminated: AtomicBool,
}

impl<C: Clock> Shared<C> {
    pub(crate) fn new(
        tracker: LivenessTracker<C>,
        events: EventSink,
        terminator: Arc<dyn Terminator>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            tracker: Arc::new(tracker),
            events,
            terminator,
            config,
            phase: PhaseCell::default(),
            terminated: AtomicBool::new(false),
        }
    }

    /// Hand `request` to the terminator unless an earlier call already did.
    fn terminate_once(&self, request: &TerminationRequest) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            self.terminator.terminate(request);
        }
    }
}

impl<C: Clock> std::fmt::Debug for Shared<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("phase", &self.phase.get())
            .field("armed", &self.tracker.is_armed())
            .field("terminated", &self.terminated.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Spawn the monitor thread.
pub(crate) fn spawn<C: Clock>(
    shared: Arc<Shared<C>>,
    poll_interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stallwatch-monitor".into())
        .spawn(move || run(&shared, poll_interval))
}

fn run<C: Clock>(shared: &Arc<Shared<C>>, poll_interval: Duration) {
    let mut checker = Checker::new(poll_interval, shared.config.suspend_threshold)
        .with_start(shared.tracker.last_heartbeat());
    tracing::debug!(
        poll_interval_ms = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Monitor thread running"
    );
    if let Some(timeout) = shared.tracker.timeout() {
        shared.events.emit(&WatchdogEvent::Armed {
            timeout,
            poll_interval,
        });
    }

    loop {
        shared.phase.set(MonitorPhase::Waiting);
        std::thread::sleep(poll_interval);
        shared.phase.set(MonitorPhase::Checking);

        match checker.check(&shared.tracker) {
            Verdict::Alive => {}
            Verdict::ClockFailed(error) => {
                shared.events.emit(&WatchdogEvent::ClockAnomaly { error });
            }
            Verdict::Resumed { gap } => {
                shared.events.emit(&WatchdogEvent::SuspendDetected { gap });
            }
            Verdict::Expired { elapsed, timeout } => {
                fire(shared, elapsed, timeout);
                return;
            }
        }
    }
}

fn fire<C: Clock>(shared: &Arc<Shared<C>>, elapsed: Duration, timeout: Duration) {
    shared.phase.set(MonitorPhase::Firing);
    let exit_code = shared.config.timeout_exit_code;
    let request = TerminationRequest {
        reason: TerminationReason::Timeout { elapsed, timeout },
        exit_code,
        strategy: shared.config.timeout_exit,
    };

    // The report is written to fd 2 directly and cannot block on host code.
    if shared.config.report_to_stderr {
        StallReport::new(elapsed, timeout, exit_code).write_to_stderr();
    }

    // Subscribers and callbacks may be wedged by the same stall: termination
    // happens within EVENT_DELIVERY_BOUND whether or not delivery returns.
    let deadline = {
        let shared = Arc::clone(shared);
        std::thread::Builder::new()
            .name("stallwatch-fire-deadline".into())
            .spawn(move || {
                std::thread::sleep(EVENT_DELIVERY_BOUND);
                shared.terminate_once(&request);
            })
    };
    if let Err(err) = deadline {
        shared.terminate_once(&request);
        tracing::error!(error = %err, "Failed to spawn fire deadline thread, skipped event delivery");
        return;
    }

    shared.events.emit(&WatchdogEvent::Expired {
        elapsed,
        timeout,
        exit_code,
    });
    shared.terminate_once(&request);
}
