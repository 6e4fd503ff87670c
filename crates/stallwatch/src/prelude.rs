//! Prelude for stallwatch.
//!
//! This module re-exports the most commonly used types for convenient importing.
//!
//! # Example
//!
//! ```rust
//! use stallwatch::prelude::*;
//! use std::sync::Arc;
//!
//! let watchdog = Watchdog::builder()
//!     .terminator(Arc::new(RecordingTerminator::new()))
//!     .build()
//!     .expect("valid config");
//! let handle = watchdog.handle();
//!
//! watchdog.start(5_000).expect("started");
//! handle.beat();
//! ```

pub use crate::clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use crate::config::{
    ExitStrategy, PollPolicy, TIMEOUT_EXIT_CODE, WatchdogConfig, WatchdogConfigBuilder,
};
pub use crate::diagnostics::{EventCallback, StallReport, WatchdogEvent};
pub use crate::error::{ClockError, WatchdogError, WatchdogResult};
pub use crate::monitor::MonitorPhase;
pub use crate::terminate::{
    ProcessTerminator, RecordingTerminator, TerminationReason, TerminationRequest, Terminator,
    exit,
};
pub use crate::tracker::{ArmOutcome, Expiry, HeartbeatHandle, LivenessTracker};
pub use crate::watchdog::{StartOutcome, Watchdog, WatchdogBuilder};
