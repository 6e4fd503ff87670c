//! # stallwatch
//!
//! Process liveness watchdog: terminates the process when its main loop
//! stops making progress.
//!
//! A single-threaded event loop that hangs (a blocking call, an infinite
//! loop, a deadlock) cannot detect its own hang. `stallwatch` runs a
//! dedicated monitor thread that expects regular heartbeats from the loop
//! and kills the process once they stop for longer than a timeout.
//!
//! ## Guarantees
//!
//! - **`heartbeat()` never blocks**: one atomic `fetch_max`, no locks, no
//!   allocation, no error path
//! - **The monitor cannot be starved** by the loop it watches: it sleeps on
//!   its own OS thread
//! - **Fail-safe on clock errors**: a failed clock read skips that check
//!   and is reported, it never kills the process
//! - **Termination is final** and bypasses graceful shutdown: on unix the
//!   timeout path ends in `_exit(2)`
//!
//! ## Architecture
//!
//! - [`tracker`] - arm state and last-heartbeat timestamp
//! - [`monitor`] - the monitor thread and its phase machine
//! - [`terminate`] - process termination and the host `exit()` primitive
//! - [`watchdog`] - the context object tying them together
//! - [`diagnostics`] - events, callbacks and the stderr stall report
//! - [`clock`] - monotonic time sources
//! - [`config`] - poll policy, exit code, exit strategy
//! - `pump` (feature `tokio`) - heartbeat task for tokio hosts
//!
//! ## Host contract
//!
//! After [`Watchdog::start`], the host must call [`Watchdog::heartbeat`]
//! (or [`HeartbeatHandle::beat`]) from the monitored loop on an interval
//! well below the timeout, ideally ten times shorter. Silence is a hang.
//! On timeout the process exits with [`TIMEOUT_EXIT_CODE`] (87) unless
//! configured otherwise.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stallwatch::prelude::*;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), WatchdogError> {
//!     let watchdog = Watchdog::new(WatchdogConfig::default())?;
//!     watchdog.start(1_000)?;
//!
//!     loop {
//!         // ... one iteration of the application's main loop ...
//!         watchdog.heartbeat();
//!         std::thread::sleep(Duration::from_millis(100));
//!     }
//! }
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod monitor;
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub mod pump;
pub mod terminate;
pub mod tracker;
pub mod watchdog;

pub mod prelude;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::{ExitStrategy, PollPolicy, TIMEOUT_EXIT_CODE, WatchdogConfig};
pub use diagnostics::{StallReport, WatchdogEvent};
pub use error::{ClockError, WatchdogError, WatchdogResult};
pub use monitor::MonitorPhase;
pub use terminate::{
    ProcessTerminator, RecordingTerminator, TerminationReason, TerminationRequest, Terminator,
    exit,
};
pub use tracker::{Expiry, HeartbeatHandle, LivenessTracker};
pub use watchdog::{StartOutcome, Watchdog, WatchdogBuilder};
