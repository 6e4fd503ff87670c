//! Process termination.
//!
//! Two entry points end the process: the monitor thread on expiry, through
//! a [`Terminator`], and the host's own [`exit`] call. Neither consults the
//! watchdog state.
//!
//! # Escalation ladder
//!
//! 1. [`ExitStrategy::Graceful`]: `std::process::exit`, which flushes stdio
//!    and runs atexit handlers. A detached escalation thread is started
//!    first; if the process is still alive after `grace` it takes step 2.
//! 2. [`ExitStrategy::Immediate`]: `_exit(2)` on unix. No handlers, no
//!    destructors, nothing the stalled code can intercept. Other platforms
//!    use `std::process::exit` here and `abort` from the escalation thread.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::ExitStrategy;

/// Grace period for [`exit`] before it escalates.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(500);

/// Why the process is being terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// No heartbeat within the timeout.
    Timeout {
        /// Time since the last heartbeat.
        elapsed: Duration,
        /// Configured timeout.
        timeout: Duration,
    },
    /// The host asked for it.
    Requested,
}

/// A request to end the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationRequest {
    /// Why.
    pub reason: TerminationReason,
    /// Exit status.
    pub exit_code: i32,
    /// How hard.
    pub strategy: ExitStrategy,
}

/// Capability to end the process.
///
/// The monitor calls this exactly once, from the monitor thread, and stops
/// afterwards. Real implementations never return; test doubles do.
pub trait Terminator: Send + Sync + 'static {
    /// End the process as requested.
    fn terminate(&self, request: &TerminationRequest);
}

impl<F> Terminator for F
where
    F: Fn(&TerminationRequest) + Send + Sync + 'static,
{
    fn terminate(&self, request: &TerminationRequest) {
        self(request);
    }
}

/// Terminates the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, request: &TerminationRequest) {
        terminate_process(request.exit_code, request.strategy)
    }
}

/// Terminate the process immediately with `code` (0 when `None`).
///
/// Independent of any watchdog: it works whether or not one was started,
/// from any thread, even while a monitor is sleeping.
pub fn exit(code: impl Into<Option<i32>>) -> ! {
    let code = code.into().unwrap_or(0);
    tracing::debug!(exit_code = code, "Exit requested");
    terminate_process(
        code,
        ExitStrategy::Graceful {
            grace: DEFAULT_EXIT_GRACE,
        },
    )
}

/// End the process with `code` using `strategy`.
pub fn terminate_process(code: i32, strategy: ExitStrategy) -> ! {
    match strategy {
        ExitStrategy::Immediate => exit_immediately(code),
        ExitStrategy::Graceful { grace } => {
            if spawn_escalation(code, grace).is_err() {
                exit_immediately(code);
            }
            exit_normally(code)
        }
    }
}

fn spawn_escalation(code: i32, grace: Duration) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("stallwatch-exit-escalation".into())
        .spawn(move || {
            std::thread::sleep(grace);
            escalate(code)
        })
        .map(drop)
}

#[expect(clippy::exit, reason = "normal process exit is the first rung of the ladder")]
fn exit_normally(code: i32) -> ! {
    std::process::exit(code)
}

#[cfg(unix)]
#[expect(
    unsafe_code,
    reason = "std has no exit that skips atexit handlers and stdio flushing"
)]
fn exit_immediately(code: i32) -> ! {
    // SAFETY: `_exit` takes a plain integer status, reads no memory owned by
    // Rust and never returns.
    unsafe { libc::_exit(code) }
}

#[cfg(not(unix))]
#[expect(clippy::exit, reason = "no lower-level exit primitive on this platform")]
fn exit_immediately(code: i32) -> ! {
    std::process::exit(code)
}

#[cfg(unix)]
fn escalate(code: i32) -> ! {
    exit_immediately(code)
}

#[cfg(not(unix))]
fn escalate(_code: i32) -> ! {
    std::process::abort()
}

/// A [`Terminator`] that records requests instead of exiting.
///
/// For tests, and for hosts that want to run the watchdog in a dry-run
/// mode.
#[derive(Debug, Default)]
pub struct RecordingTerminator {
    requests: Mutex<Vec<(TerminationRequest, Instant)>>,
    signal: Condvar,
}

impl RecordingTerminator {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded requests, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<TerminationRequest> {
        self.requests.lock().iter().map(|(request, _)| *request).collect()
    }

    /// Number of recorded requests.
    #[must_use]
    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    /// When the first request arrived.
    #[must_use]
    pub fn first_at(&self) -> Option<Instant> {
        self.requests.lock().first().map(|(_, at)| *at)
    }

    /// Block until a request arrives or `timeout` passes.
    ///
    /// Returns the first request, if any.
    #[must_use]
    pub fn wait_for_request(&self, timeout: Duration) -> Option<TerminationRequest> {
        let deadline = Instant::now().checked_add(timeout);
        let mut requests = self.requests.lock();
        while requests.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.signal.wait_until(&mut requests, deadline).timed_out() {
                        break;
                    }
                }
                None => self.signal.wait(&mut requests),
            }
        }
        requests.first().map(|(request, _)| *request)
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, request: &TerminationRequest) {
        self.requests.lock().push((*request, Instant::now()));
        self.signal.notify_all();
    }
}
