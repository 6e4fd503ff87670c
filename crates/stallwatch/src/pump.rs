//! Heartbeat pump for tokio hosts.
//!
//! The pump is a task on the *monitored* runtime that calls
//! [`HeartbeatHandle::beat`] on a fixed interval. If the runtime stalls,
//! the pump stalls with it and the monitor thread notices. Never run the
//! pump on a separate runtime or thread: it would keep beating while the
//! loop it vouches for is stuck.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::tracker::HeartbeatHandle;

const MIN_PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// A pump interval an order of magnitude below `timeout`.
#[must_use]
pub fn recommended_interval(timeout: Duration) -> Duration {
    (timeout / 10).max(MIN_PUMP_INTERVAL)
}

/// Spawn the pump on the current tokio runtime.
///
/// The first beat happens immediately. Abort the returned task to stop
/// pumping, which the watchdog will then treat as a stall.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn_heartbeat_pump<C: Clock>(
    handle: HeartbeatHandle<C>,
    interval: Duration,
) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            handle.beat();
        }
    })
}
