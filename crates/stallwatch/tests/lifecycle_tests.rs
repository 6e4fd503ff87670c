//! Lifecycle tests for the watchdog and its monitor thread.
//!
//! These run the real monitor thread against a [`RecordingTerminator`], so
//! firing is observed without ending the test process.

use crossbeam::channel::{Receiver, unbounded};
use stallwatch::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const FIRE_SLACK: Duration = Duration::from_millis(400);

fn quiet_config(poll_divisor: u32) -> WatchdogResult<WatchdogConfig> {
    WatchdogConfig::builder()
        .poll_divisor(poll_divisor)
        .report_to_stderr(false)
        .build()
}

fn recorded_watchdog(
    config: WatchdogConfig,
) -> WatchdogResult<(Watchdog, Arc<RecordingTerminator>)> {
    let recorder = Arc::new(RecordingTerminator::new());
    let watchdog = Watchdog::builder()
        .config(config)
        .terminator(recorder.clone())
        .build()?;
    Ok((watchdog, recorder))
}

fn event_channel<C: Clock>(watchdog: &Watchdog<C>) -> Receiver<WatchdogEvent> {
    let (tx, rx) = unbounded();
    watchdog.subscribe(move |event| {
        let _sent = tx.send(event.clone());
    });
    rx
}

mod liveness {
    use super::*;

    #[test]
    fn test_regular_heartbeats_keep_process_alive() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;
        assert_eq!(watchdog.start(200)?, StartOutcome::Started);

        let until = Instant::now() + Duration::from_millis(1000);
        while Instant::now() < until {
            watchdog.heartbeat();
            thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(recorder.count(), 0);
        assert_ne!(watchdog.phase(), MonitorPhase::Firing);
        Ok(())
    }

    #[test]
    fn test_heartbeats_through_handle_keep_process_alive() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;
        let handle = watchdog.handle();
        watchdog.start(200)?;

        let pumper = thread::spawn(move || {
            for _ in 0..40 {
                handle.beat();
                thread::sleep(Duration::from_millis(20));
            }
        });
        assert!(pumper.join().is_ok(), "heartbeat thread should not panic");

        assert_eq!(recorder.count(), 0);
        assert!(watchdog.heartbeat_count() >= 40);
        Ok(())
    }
}

mod expiry {
    use super::*;

    #[test]
    fn test_silence_fires_within_timeout_plus_poll() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;
        let started = Instant::now();
        watchdog.start(200)?;

        let request = recorder
            .wait_for_request(Duration::from_secs(5))
            .ok_or("watchdog did not fire")?;
        let fired_at = recorder.first_at().ok_or("missing fire time")?;
        let delay = fired_at.duration_since(started);

        assert!(delay >= Duration::from_millis(200), "fired early: {delay:?}");
        assert!(
            delay <= Duration::from_millis(250) + FIRE_SLACK,
            "fired late: {delay:?}"
        );
        assert_eq!(request.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(request.strategy, ExitStrategy::Immediate);
        match request.reason {
            TerminationReason::Timeout { elapsed, timeout } => {
                assert_eq!(timeout, Duration::from_millis(200));
                assert!(elapsed >= timeout);
            }
            TerminationReason::Requested => return Err("wrong termination reason".into()),
        }
        Ok(())
    }

    #[test]
    fn test_fires_after_heartbeats_stop() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;
        watchdog.start(200)?;

        for _ in 0..10 {
            watchdog.heartbeat();
            thread::sleep(Duration::from_millis(30));
        }
        let last_beat = Instant::now();
        watchdog.heartbeat();
        assert_eq!(recorder.count(), 0);

        recorder
            .wait_for_request(Duration::from_secs(5))
            .ok_or("watchdog did not fire")?;
        let fired_at = recorder.first_at().ok_or("missing fire time")?;
        let delay = fired_at.duration_since(last_beat);
        assert!(delay >= Duration::from_millis(200), "fired early: {delay:?}");
        assert!(delay <= Duration::from_millis(250) + FIRE_SLACK);
        Ok(())
    }

    #[test]
    fn test_fires_exactly_once_and_monitor_exits() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;
        watchdog.start(50)?;

        recorder
            .wait_for_request(Duration::from_secs(5))
            .ok_or("watchdog did not fire")?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while !watchdog.is_monitor_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(watchdog.is_monitor_finished());

        // Heartbeats after firing change nothing.
        watchdog.heartbeat();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(recorder.count(), 1);
        assert_eq!(watchdog.phase(), MonitorPhase::Firing);
        Ok(())
    }

    #[test]
    fn test_custom_exit_code_and_strategy() -> TestResult {
        let config = WatchdogConfig::builder()
            .timeout_exit_code(3)
            .timeout_exit(ExitStrategy::Graceful {
                grace: Duration::from_millis(100),
            })
            .report_to_stderr(false)
            .build()?;
        let (watchdog, recorder) = recorded_watchdog(config)?;
        watchdog.start(30)?;

        let request = recorder
            .wait_for_request(Duration::from_secs(5))
            .ok_or("watchdog did not fire")?;
        assert_eq!(request.exit_code, 3);
        assert_eq!(
            request.strategy,
            ExitStrategy::Graceful {
                grace: Duration::from_millis(100)
            }
        );
        Ok(())
    }
}

mod start_guard {
    use super::*;

    #[test]
    fn test_second_start_is_noop() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;

        assert_eq!(watchdog.start(60_000)?, StartOutcome::Started);
        let armed_at = watchdog.last_heartbeat();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(watchdog.start(50)?, StartOutcome::AlreadyStarted);
        assert_eq!(watchdog.start(0)?, StartOutcome::AlreadyStarted);

        assert_eq!(watchdog.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(watchdog.last_heartbeat(), armed_at);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(recorder.count(), 0);
        Ok(())
    }

    #[test]
    fn test_heartbeat_before_start_has_no_effect() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;

        for _ in 0..100 {
            watchdog.heartbeat();
        }
        assert!(!watchdog.is_armed());
        assert_eq!(watchdog.heartbeat_count(), 0);
        assert_eq!(watchdog.phase(), MonitorPhase::Idle);

        watchdog.start(60_000)?;
        assert_eq!(watchdog.heartbeat_count(), 0);
        assert_eq!(recorder.count(), 0);
        Ok(())
    }

    #[test]
    fn test_dropping_watchdog_does_not_disarm() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;
        watchdog.start(50)?;
        drop(watchdog);

        let request = recorder.wait_for_request(Duration::from_secs(5));
        assert!(request.is_some());
        Ok(())
    }
}

mod diagnostics {
    use super::*;

    #[test]
    fn test_armed_and_expired_events() -> TestResult {
        let (watchdog, recorder) = recorded_watchdog(quiet_config(4)?)?;
        let events = event_channel(&watchdog);
        watchdog.start(100)?;

        let armed = events.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(
            armed,
            WatchdogEvent::Armed {
                timeout: Duration::from_millis(100),
                poll_interval: Duration::from_millis(25),
            }
        );

        let expired = events.recv_timeout(Duration::from_secs(5))?;
        assert!(matches!(
            expired,
            WatchdogEvent::Expired {
                exit_code: TIMEOUT_EXIT_CODE,
                ..
            }
        ));
        assert!(recorder.wait_for_request(Duration::from_secs(5)).is_some());
        Ok(())
    }

    #[test]
    fn test_blocked_callback_does_not_delay_termination_indefinitely() -> TestResult {
        let recorder = Arc::new(RecordingTerminator::new());
        let watchdog = Watchdog::builder()
            .config(quiet_config(4)?)
            .terminator(recorder.clone())
            .on_event(|event| {
                if matches!(event, WatchdogEvent::Expired { .. }) {
                    // Wedged by the same stall the watchdog detected.
                    thread::sleep(Duration::from_secs(3600));
                }
            })
            .build()?;
        let started = Instant::now();
        watchdog.start(100)?;

        let request = recorder
            .wait_for_request(Duration::from_secs(3))
            .ok_or("watchdog never terminated")?;
        assert_eq!(request.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(watchdog.phase(), MonitorPhase::Firing);

        let fired_at = recorder.first_at().ok_or("missing fire time")?;
        let delay = fired_at.duration_since(started);
        assert!(delay >= Duration::from_millis(100), "fired early: {delay:?}");
        assert!(delay <= Duration::from_secs(2), "fired late: {delay:?}");
        Ok(())
    }

    #[test]
    fn test_armed_event_runs_on_monitor_thread() -> TestResult {
        let (watchdog, _recorder) = recorded_watchdog(quiet_config(4)?)?;
        let (tx, rx) = unbounded();
        watchdog.subscribe(move |event| {
            if matches!(event, WatchdogEvent::Armed { .. }) {
                let name = thread::current().name().map(str::to_owned);
                let _sent = tx.send(name);
            }
        });
        watchdog.start(60_000)?;

        let name = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(name.as_deref(), Some("stallwatch-monitor"));
        Ok(())
    }

    #[test]
    fn test_clock_failure_never_fires() -> TestResult {
        let clock = Arc::new(ManualClock::new());
        let recorder = Arc::new(RecordingTerminator::new());
        let watchdog = Watchdog::builder()
            .config(quiet_config(4)?)
            .clock(Arc::clone(&clock))
            .terminator(recorder.clone())
            .build()?;
        let events = event_channel(&watchdog);

        watchdog.start(40)?;
        clock.set_failing(true);
        clock.advance(Duration::from_secs(3600));

        let mut anomalies = 0;
        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            if let Ok(WatchdogEvent::ClockAnomaly { error }) =
                events.recv_timeout(Duration::from_millis(50))
            {
                assert_eq!(error, ClockError::Unavailable);
                anomalies += 1;
            }
        }

        assert!(anomalies > 0, "clock anomaly was not reported");
        assert_eq!(recorder.count(), 0);

        // Once the clock recovers the stall is real.
        clock.set_failing(false);
        clock.advance(Duration::from_secs(1));
        assert!(recorder.wait_for_request(Duration::from_secs(5)).is_some());
        Ok(())
    }

    #[test]
    fn test_suspend_gets_a_fresh_timeout() -> TestResult {
        let clock = Arc::new(ManualClock::new());
        let recorder = Arc::new(RecordingTerminator::new());
        let config = WatchdogConfig::builder()
            .suspend_threshold(Duration::from_secs(5))
            .report_to_stderr(false)
            .build()?;
        let watchdog = Watchdog::builder()
            .config(config)
            .clock(Arc::clone(&clock))
            .terminator(recorder.clone())
            .build()?;
        let events = event_channel(&watchdog);

        watchdog.start(60_000)?;
        let _armed = events.recv_timeout(Duration::from_secs(5))?;

        // Jump the clock past both the suspend threshold and the timeout.
        clock.advance(Duration::from_secs(120));

        let event = events.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(
            event,
            WatchdogEvent::SuspendDetected {
                gap: Duration::from_secs(120)
            }
        );
        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.count(), 0);
        assert_eq!(watchdog.last_heartbeat(), Some(clock.peek()));
        assert_eq!(watchdog.heartbeat_count(), 0);
        Ok(())
    }
}
