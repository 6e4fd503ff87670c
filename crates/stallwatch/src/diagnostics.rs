//! Diagnostic events and the stall report.
//!
//! Every event is logged through `tracing` and handed to any callbacks the
//! host registered. When the watchdog fires, a one-line JSON
//! [`StallReport`] is also written to stderr so the cause of death survives
//! even without a subscriber.

use parking_lot::RwLock;
use serde::Serialize;
#[cfg(not(unix))]
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClockError;

/// Something the watchdog wants the host to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// The watchdog was armed and its monitor started.
    Armed {
        /// Configured timeout.
        timeout: Duration,
        /// Monitor sleep between checks.
        poll_interval: Duration,
    },
    /// The clock could not be read; this poll cycle was skipped.
    ClockAnomaly {
        /// What went wrong.
        error: ClockError,
    },
    /// The monitor overslept far beyond its poll interval; a heartbeat was
    /// synthesized instead of firing.
    SuspendDetected {
        /// Time between the two monitor wake-ups.
        gap: Duration,
    },
    /// No heartbeat within the timeout; the process is being terminated.
    Expired {
        /// Time since the last heartbeat.
        elapsed: Duration,
        /// Configured timeout.
        timeout: Duration,
        /// Exit status about to be used.
        exit_code: i32,
    },
}

/// Callback invoked for each [`WatchdogEvent`].
///
/// Every event, [`WatchdogEvent::Armed`] included, is delivered on the
/// monitor thread. Callbacks must not block: a callback that hangs on
/// [`WatchdogEvent::Expired`] delays termination by at most 250 ms, but one
/// that hangs on any other event stops monitoring.
pub type EventCallback = Arc<dyn Fn(&WatchdogEvent) + Send + Sync>;

/// Fan-out of events to `tracing` and registered callbacks.
#[derive(Default)]
pub struct EventSink {
    callbacks: RwLock<Vec<EventCallback>>,
}

impl EventSink {
    /// Create a sink with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&WatchdogEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Log `event` and deliver it to every callback.
    pub fn emit(&self, event: &WatchdogEvent) {
        match event {
            WatchdogEvent::Armed {
                timeout,
                poll_interval,
            } => {
                tracing::info!(
                    timeout_ms = millis(*timeout),
                    poll_interval_ms = millis(*poll_interval),
                    "Watchdog armed"
                );
            }
            WatchdogEvent::ClockAnomaly { error } => {
                tracing::warn!(error = %error, "Clock read failed, skipping expiry check");
            }
            WatchdogEvent::SuspendDetected { gap } => {
                tracing::warn!(
                    gap_ms = millis(*gap),
                    "Monitor overslept, assuming host suspend and refreshing heartbeat"
                );
            }
            WatchdogEvent::Expired {
                elapsed,
                timeout,
                exit_code,
            } => {
                tracing::error!(
                    elapsed_ms = millis(*elapsed),
                    timeout_ms = millis(*timeout),
                    exit_code = exit_code,
                    "Main loop unresponsive, terminating process"
                );
            }
        }

        // Clone out so a callback that subscribes does not deadlock.
        let callbacks: Vec<EventCallback> = self.callbacks.read().clone();
        for callback in &callbacks {
            // A panicking callback must not take the monitor thread down.
            let delivered =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)));
            if delivered.is_err() {
                tracing::error!("Watchdog event callback panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// The JSON line written to stderr when the watchdog fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StallReport {
    /// Always `"Error"`, so log shippers treat the line as an error record.
    pub name: &'static str,
    /// Human readable summary.
    pub message: String,
    /// Time since the last heartbeat, in milliseconds.
    pub elapsed_ms: u64,
    /// Configured timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Exit status about to be used.
    pub exit_code: i32,
}

impl StallReport {
    /// Build a report.
    #[must_use]
    pub fn new(elapsed: Duration, timeout: Duration, exit_code: i32) -> Self {
        let elapsed_ms = millis(elapsed);
        Self {
            name: "Error",
            message: format!(
                "Event loop unresponsive for {elapsed_ms} ms, will terminate with code {exit_code}"
            ),
            elapsed_ms,
            timeout_ms: millis(timeout),
            exit_code,
        }
    }

    /// Render as a single JSON line without the trailing newline.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_err| self.message.clone())
    }

    /// Write the report to stderr.
    ///
    /// On unix this writes straight to file descriptor 2, bypassing the
    /// `Stderr` lock a stalled thread may be holding. Write errors are
    /// ignored: there is nowhere left to report them.
    pub fn write_to_stderr(&self) {
        let mut line = self.to_json_line();
        line.push('\n');
        write_stderr_raw(line.as_bytes());
    }
}

#[cfg(unix)]
fn write_stderr_raw(mut bytes: &[u8]) {
    use std::os::fd::AsFd;

    let stderr = std::io::stderr();
    let fd = stderr.as_fd();
    while !bytes.is_empty() {
        match nix::unistd::write(fd, bytes) {
            Ok(0) => return,
            Ok(written) => bytes = bytes.get(written..).unwrap_or_default(),
            Err(nix::errno::Errno::EINTR) => {}
            Err(_err) => return,
        }
    }
}

#[cfg(not(unix))]
fn write_stderr_raw(bytes: &[u8]) {
    let mut stderr = std::io::stderr();
    if stderr.write_all(bytes).is_err() {
        return;
    }
    if stderr.flush().is_err() {
        tracing::trace!("stderr flush failed after stall report");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
