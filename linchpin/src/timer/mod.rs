// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words setitimer SIGALRM

//! Monotonic one-shot and periodic timers delivering callbacks on a
//! dedicated scheduler-class thread.
//!
//! Each [`Timer`] owns one long-lived service thread, spawned at
//! construction and parked on the timer's embedded [`Condition`] while the
//! timer is `Idle`. Arming computes an absolute monotonic deadline; the
//! thread sleeps to it, invokes the callback **outside** the lock (user code
//! may re-enter the timer, e.g. to call [`Timer::stop`]), and performs the
//! state transition inside it. Periodic deadlines advance from the previous
//! deadline, not from "now", so the period does not drift by callback
//! latency.
//!
//! # The stop handshake
//!
//! `stop` on an armed callback-kind timer moves `Arm → Disarm` and then
//! waits on the Condition until the service thread reports `Idle`, bounded
//! by `window = max(1 s, 2 × interval)`. Because the *same thread* runs
//! callbacks and performs the `Idle` transition, a completed `stop`
//! guarantees no callback is in flight and none will start until the next
//! [`Timer::start`] - even if `stop` raced a fire on another core. Dropping
//! the timer joins the service thread, so teardown cannot free state out
//! from under a live callback.
//!
//! # Signal-kind timers
//!
//! A timer built with [`Timer::with_signal`] delivers a signal to the
//! process on each fire instead of running a callback. The
//! [`alarm`](crate::timer::alarm) module layers the `setitimer`-style
//! `SIGALRM` singleton on top of this.

// Attach sources.
pub mod alarm;

use crate::sched::Policy;
use crate::sync::{Condition, SyncError, WaitOutcome};
use crate::tick::{Deadline, Sticks, Ticks, duration_to_ticks, frequency, ticks_to_duration};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Timer states. `Disarm` exists only during the stop handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TimerState {
    /// Not armed; the service thread is parked.
    Idle,
    /// Armed; fires at the programmed deadline.
    Arm,
    /// Stop requested; waiting for the service thread to reach `Idle`.
    Disarm,
}

/// Timer configuration and operation failures.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TimerError {
    /// Exactly one of callback and signal must be supplied.
    #[error("a timer needs exactly one of a callback or a signal")]
    #[diagnostic(code(linchpin::timer::invalid_config))]
    InvalidConfig,

    /// A zero interval would disarm, not arm; use [`Timer::stop`].
    #[error("timer interval must be nonzero")]
    #[diagnostic(code(linchpin::timer::invalid_interval))]
    InvalidInterval,

    /// The stop handshake window expired with a callback still in flight.
    /// Logged, and recoverable: the timer is disarmed and a later `start`
    /// is legal.
    #[error("timer stop handshake timed out")]
    #[diagnostic(code(linchpin::timer::stop_timed_out))]
    TimedOut,

    /// The service thread could not be spawned.
    #[error("timer service thread spawn failed")]
    #[diagnostic(code(linchpin::timer::spawn))]
    Spawn(#[source] std::io::Error),

    /// The underlying lock was poisoned.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// The window `stop` waits for an in-flight callback: at least one second,
/// and at least two intervals. The margin covers the service thread's wakeup
/// latency, which can exceed the timer resolution on a loaded host.
#[must_use]
pub fn window(interval: Ticks) -> Ticks {
    interval.saturating_mul(2).max(frequency() as Ticks)
}

type Callback = Box<dyn FnMut() -> i64 + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Callback,
    Signal,
}

struct Shared {
    state: TimerState,
    periodic: bool,
    /// Interval of the current (or last) schedule.
    ticks: Ticks,
    /// Next fire, on the monotonic clock. `None` while unprogrammed.
    deadline: Option<Instant>,
    /// Taken by the service thread for the duration of an invocation.
    callback: Option<Callback>,
    signum: Option<i32>,
    /// Last value returned by the callback.
    value: i64,
    /// Last delivery error (raw errno), observable by the owner because the
    /// callback path has no return channel for it.
    error: i32,
    shutdown: bool,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state)
            .field("periodic", &self.periodic)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

/// A one-shot or periodic timer. See the [module docs](self).
#[derive(Debug)]
pub struct Timer {
    core: Arc<Condition<Shared>>,
    thread: Option<std::thread::JoinHandle<()>>,
    kind: Kind,
}

impl Timer {
    /// A periodic callback timer.
    ///
    /// # Errors
    ///
    /// See [`TimerError`].
    pub fn periodic(callback: impl FnMut() -> i64 + Send + 'static) -> Result<Self, TimerError> {
        Self::new_generic(true, Some(Box::new(callback)), None)
    }

    /// A one-shot callback timer.
    ///
    /// # Errors
    ///
    /// See [`TimerError`].
    pub fn oneshot(callback: impl FnMut() -> i64 + Send + 'static) -> Result<Self, TimerError> {
        Self::new_generic(false, Some(Box::new(callback)), None)
    }

    /// A timer that delivers `signum` to the process on each fire.
    ///
    /// # Errors
    ///
    /// See [`TimerError`].
    pub fn with_signal(periodic: bool, signum: i32) -> Result<Self, TimerError> {
        if signum <= 0 {
            return Err(TimerError::InvalidConfig);
        }
        Self::new_generic(periodic, None, Some(signum))
    }

    fn new_generic(
        periodic: bool,
        callback: Option<Callback>,
        signum: Option<i32>,
    ) -> Result<Self, TimerError> {
        let kind = match (&callback, signum) {
            (Some(_), None) => Kind::Callback,
            (None, Some(_)) => Kind::Signal,
            _ => return Err(TimerError::InvalidConfig),
        };

        let core = Arc::new(Condition::new(Shared {
            state: TimerState::Idle,
            periodic,
            ticks: 0,
            deadline: None,
            callback,
            signum,
            value: 0,
            error: 0,
            shutdown: false,
        }));

        static SEQUENCE: AtomicU64 = AtomicU64::new(0);
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let service = Arc::clone(&core);
        let thread = std::thread::Builder::new()
            .name(format!("linchpin-timer-{sequence}"))
            .spawn(move || run(&service))
            .map_err(TimerError::Spawn)?;

        Ok(Self {
            core,
            thread: Some(thread),
            kind,
        })
    }

    /// Arms the timer: the first fire happens `ticks` from now, and for a
    /// periodic timer every `ticks` thereafter. Re-arming an armed timer
    /// reprograms it.
    ///
    /// Returns the ticks that remained on the previous schedule (zero when
    /// the timer was idle), mirroring the kernel timer-set convention.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidInterval`] when `ticks` is zero.
    pub fn start(&self, ticks: Ticks) -> Result<Sticks, TimerError> {
        if ticks == 0 {
            return Err(TimerError::InvalidInterval);
        }
        let mut guard = self.core.lock()?;
        let remaining = remaining_ticks(guard.deadline);
        guard.ticks = ticks;
        guard.error = 0;
        guard.state = TimerState::Arm;
        guard.deadline = Some(Instant::now() + ticks_to_duration(ticks));
        tracing::debug!(ticks, "timer: ARM");
        self.core.signal();
        drop(guard);
        Ok(remaining)
    }

    /// Disarms the timer. For a callback-kind timer this blocks until any
    /// in-flight callback has returned (see the [module docs](self)); when
    /// `stop` returns `Ok`, no further callback will run before the next
    /// [`Timer::start`].
    ///
    /// Returns the ticks that remained on the schedule.
    ///
    /// # Errors
    ///
    /// [`TimerError::TimedOut`] when the handshake window expired; the timer
    /// is still disarmed and restartable.
    pub fn stop(&self) -> Result<Sticks, TimerError> {
        let mut guard = self.core.lock()?;
        let mut timed_out = false;

        if self.kind == Kind::Callback && guard.state == TimerState::Arm {
            let deadline = Deadline::after(window(guard.ticks));
            guard.state = TimerState::Disarm;
            tracing::debug!("timer: DISARM");
            self.core.signal();
            while guard.state != TimerState::Idle {
                let (reheld, outcome) = self.core.wait_until(guard, deadline)?;
                guard = reheld;
                if outcome == WaitOutcome::TimedOut && guard.state != TimerState::Idle {
                    tracing::warn!("timer: stop handshake window expired");
                    timed_out = true;
                    break;
                }
            }
        }

        let remaining = remaining_ticks(guard.deadline);
        guard.deadline = None;
        if !timed_out {
            // Signal-kind timers have no handshake; callback-kind ones are
            // already Idle here. On a handshake timeout the state is left
            // Disarm for the service thread to retire.
            guard.state = TimerState::Idle;
        }
        self.core.signal();
        drop(guard);

        if timed_out {
            Err(TimerError::TimedOut)
        } else {
            Ok(remaining)
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> TimerState {
        self.core.lock().map_or(TimerState::Idle, |guard| guard.state)
    }

    /// The last value returned by the callback.
    #[must_use]
    pub fn value(&self) -> i64 { self.core.lock().map_or(0, |guard| guard.value) }

    /// The last delivery error (raw errno), zero when none.
    #[must_use]
    pub fn error(&self) -> i32 { self.core.lock().map_or(0, |guard| guard.error) }
}

impl Drop for Timer {
    /// Disarms, then joins the service thread, so no callback can outlive
    /// the timer.
    fn drop(&mut self) {
        if let Ok(mut guard) = self.core.lock() {
            guard.shutdown = true;
            guard.deadline = None;
            self.core.signal();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn remaining_ticks(deadline: Option<Instant>) -> Sticks {
    match deadline {
        None => 0,
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            duration_to_ticks(left).min(Sticks::MAX as Ticks) as Sticks
        }
    }
}

/// The service thread: sleeps to the deadline, fires outside the lock,
/// transitions inside it.
fn run(condition: &Arc<Condition<Shared>>) {
    let _ = Policy::timer().apply_to_current();

    let Ok(mut guard) = condition.lock() else {
        return;
    };
    loop {
        if guard.shutdown {
            return;
        }
        match (guard.state, guard.deadline) {
            (TimerState::Disarm, _) => {
                // Stop raced an imminent fire; no callback is in flight, so
                // complete the handshake here.
                guard.deadline = None;
                guard.state = TimerState::Idle;
                tracing::debug!("timer: IDLE");
                condition.signal();
            }
            (TimerState::Idle, _) | (TimerState::Arm, None) => {
                guard = match condition.wait(guard) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
            (TimerState::Arm, Some(deadline)) => {
                let now = Instant::now();
                if now < deadline {
                    guard = match condition.wait_for(guard, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(_) => return,
                    };
                    continue;
                }

                // Fire. Advance a periodic deadline from the previous
                // deadline so the period does not drift.
                let periodic = guard.periodic;
                if periodic {
                    guard.deadline = Some(deadline + ticks_to_duration(guard.ticks));
                } else {
                    guard.deadline = None;
                }
                let mut callback = guard.callback.take();
                let signum = guard.signum;
                drop(guard);

                let mut value = None;
                let mut error = 0;
                if let Some(callback) = callback.as_mut() {
                    value = Some(callback());
                } else if let Some(signum) = signum {
                    if let Err(raised) = signal_hook::low_level::raise(signum) {
                        error = raised.raw_os_error().unwrap_or(0);
                        tracing::error!(signum, error, "timer: raise");
                    }
                }

                guard = match condition.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                if callback.is_some() {
                    guard.callback = callback;
                }
                if let Some(value) = value {
                    guard.value = value;
                }
                if error != 0 {
                    guard.error = error;
                }
                if periodic {
                    if guard.state == TimerState::Disarm {
                        guard.deadline = None;
                        guard.state = TimerState::Idle;
                        tracing::debug!("timer: IDLE");
                        condition.signal();
                    }
                } else if guard.state != TimerState::Idle {
                    guard.deadline = None;
                    guard.state = TimerState::Idle;
                    condition.signal();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::units_to_ticks;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_needs_exactly_one_delivery_mechanism() {
        assert!(matches!(
            Timer::with_signal(false, 0),
            Err(TimerError::InvalidConfig)
        ));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let timer = Timer::oneshot(|| 0).unwrap();
        assert!(matches!(timer.start(0), Err(TimerError::InvalidInterval)));
    }

    #[test]
    fn test_oneshot_fires_exactly_once() {
        let fires = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&fires);
        let timer = Timer::oneshot(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

        timer.start(units_to_ticks(10, 1_000)).unwrap(); // 10 ms
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn test_periodic_fires_repeatedly_until_stopped() {
        let fires = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&fires);
        let timer = Timer::periodic(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

        timer.start(units_to_ticks(5, 1_000)).unwrap(); // 5 ms
        std::thread::sleep(Duration::from_millis(100));
        timer.stop().unwrap();
        let at_stop = fires.load(Ordering::SeqCst);
        assert!(at_stop >= 2, "only {at_stop} fires in 100 ms");

        // A completed stop means no further callback begins.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fires.load(Ordering::SeqCst), at_stop);
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn test_restart_after_stop() {
        let fires = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&fires);
        let timer = Timer::periodic(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

        timer.start(units_to_ticks(5, 1_000)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        timer.stop().unwrap();
        let first_round = fires.load(Ordering::SeqCst);

        timer.start(units_to_ticks(5, 1_000)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        timer.stop().unwrap();
        assert!(fires.load(Ordering::SeqCst) > first_round);
    }

    #[test]
    fn test_start_reports_the_previous_remaining() {
        let timer = Timer::oneshot(|| 0).unwrap();
        let first = timer.start(units_to_ticks(10, 1)).unwrap(); // 10 s out
        assert_eq!(first, 0); // Was idle.
        let second = timer.start(units_to_ticks(10, 1)).unwrap();
        assert!(second > 0, "rearm must report the old schedule's remainder");
        timer.stop().unwrap();
    }

    #[test]
    fn test_stop_on_idle_timer_is_benign() {
        let timer = Timer::periodic(|| 0).unwrap();
        assert_eq!(timer.stop().unwrap(), 0);
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn test_window_floor_is_one_second() {
        assert_eq!(window(0), frequency() as Ticks);
        assert_eq!(window(1_000_000), frequency() as Ticks);
        assert_eq!(
            window(2_000_000_000),
            4_000_000_000
        );
    }

    #[test]
    fn test_callback_value_is_observable() {
        let timer = Timer::oneshot(|| 17).unwrap();
        timer.start(units_to_ticks(5, 1_000)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(timer.value(), 17);
    }
}
