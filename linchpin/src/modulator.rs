// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A software pulse-width modulator.
//!
//! A 10 kHz periodic [`Timer`] drives an on/off cycle engine: each callback
//! either counts down the current half-cycle or flips the output through the
//! caller-supplied [`PwmSink`]. Duty is an integer in `0..=255`; the on/off
//! cycle lengths are reduced by their common prime factors so that
//! `on + off` divides 255, which shortens the period at coarse duties and
//! reduces visible flicker.
//!
//! # Glitch-free duty updates
//!
//! [`Modulator::set`] stages the new cycle lengths as *pending* under the
//! embedded [`Condition`] and, while the carrier is running, blocks until
//! the engine consumes them - which it does only at a cycle boundary, never
//! mid-phase. A `set` that has returned therefore guarantees the output
//! reflects the new duty from the next boundary onward.
//!
//! The engine's own state (current cycle lengths, countdown, output level,
//! the sink) lives inside the timer callback; only the pending values, their
//! flag, and mirrors for observation cross threads, and those only under the
//! Condition.
//!
//! [`Condition`]: crate::sync::Condition

use crate::sync::{Condition, SyncError};
use crate::tick::{Sticks, Ticks, frequency};
use crate::timer::{Timer, TimerError, TimerState};
use std::sync::Arc;

/// Fully off.
pub const DUTY_MIN: u8 = 0;

/// Fully on.
pub const DUTY_MAX: u8 = 255;

/// The carrier rate: callbacks per second (one every 100 µs).
#[must_use]
pub const fn carrier_frequency() -> Sticks { 10_000 }

/// Ticks per carrier cycle.
#[must_use]
pub const fn carrier_period() -> Ticks { (frequency() / carrier_frequency()) as Ticks }

/// The output line the modulator drives. Implementations translate a bit
/// into whatever the actuator needs (a GPIO line, a test recorder). The sink
/// is owned by the modulator once handed over and is driven from the timer's
/// service thread.
pub trait PwmSink: Send {
    /// Drives the line high (`true`) or low (`false`).
    ///
    /// # Errors
    ///
    /// Any error is recorded on the modulator (the callback path has no
    /// return channel) and does not stop the carrier.
    fn put(&mut self, bit: bool) -> std::io::Result<()>;
}

impl<F> PwmSink for F
where
    F: FnMut(bool) -> std::io::Result<()> + Send,
{
    fn put(&mut self, bit: bool) -> std::io::Result<()> { self(bit) }
}

/// Modulator failures.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ModulatorError {
    /// The embedded timer failed.
    #[error(transparent)]
    Timer(#[from] TimerError),

    /// The underlying lock was poisoned.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Divides the common prime factors out of `on` and `off`, once per prime.
///
/// Because `on + off == 255 == 3 * 5 * 17`, the only primes that can divide
/// both are 3, 5, and 17; a single division per prime fully reduces the
/// pair, and the reduced sum always divides 255. Returns whether anything
/// was reduced.
pub fn factor(on: &mut u8, off: &mut u8) -> bool {
    const PRIMES: [u8; 6] = [2, 3, 5, 7, 11, 13];
    let mut reduced = false;
    for prime in PRIMES {
        if prime > *on || prime > *off {
            break;
        }
        if *on % prime == 0 && *off % prime == 0 {
            *on /= prime;
            *off /= prime;
            reduced = true;
        }
    }
    reduced
}

/// A 0..=100 diagnostic score of how visibly a duty's on/off pattern
/// flickers: zero for the continuous extremes, larger as the phases grow
/// long and lopsided.
#[must_use]
pub fn flicker(on: u8, off: u8) -> u32 {
    if on == 0 || off == 0 {
        return 0;
    }
    let difference = u32::from(on.abs_diff(off));
    let sum = u32::from(on) + u32::from(off);
    (difference + sum) * 100 / (2 * u32::from(DUTY_MAX))
}

#[derive(Debug)]
struct Pending {
    duty: u8,
    /// Staged cycle lengths, consumed by the engine at a boundary.
    ton: u8,
    toff: u8,
    set: bool,
    /// Cycle lengths currently in effect (engine mirrors).
    on: u8,
    off: u8,
    /// Last sink error (raw errno), zero when none.
    error: i32,
}

/// A software PWM around a [`PwmSink`]. See the [module docs](self).
#[derive(Debug)]
pub struct Modulator {
    shared: Arc<Condition<Pending>>,
    timer: Timer,
}

impl Modulator {
    /// Builds the modulator around `sink`, staged at `duty`. The carrier is
    /// not running until [`Modulator::start`].
    ///
    /// # Errors
    ///
    /// See [`ModulatorError`].
    pub fn new(sink: impl PwmSink + 'static, duty: u8) -> Result<Self, ModulatorError> {
        let shared = Arc::new(Condition::new(Pending {
            duty: DUTY_MIN,
            ton: DUTY_MIN,
            toff: DUTY_MAX,
            set: false,
            on: DUTY_MIN,
            off: DUTY_MAX,
            error: 0,
        }));

        let timer = Timer::periodic(engine(Arc::clone(&shared), sink))?;
        let modulator = Self { shared, timer };
        modulator.set(duty)?;
        Ok(modulator)
    }

    /// Stages a new duty. While the carrier is running this blocks until the
    /// engine has taken the new cycle lengths at a boundary; once `set`
    /// returns, the next half-cycle uses them.
    ///
    /// # Errors
    ///
    /// See [`ModulatorError`].
    pub fn set(&self, duty: u8) -> Result<(), ModulatorError> {
        let mut on = duty;
        let mut off = DUTY_MAX - duty;
        if on != 0 && off != 0 {
            factor(&mut on, &mut off);
        }

        let mut guard = self.shared.lock()?;
        guard.duty = duty;
        guard.ton = on;
        guard.toff = off;
        guard.set = true;

        if self.timer.state() == TimerState::Arm {
            while guard.set {
                guard = self.shared.wait(guard)?;
            }
        }
        tracing::debug!(
            duty,
            on = guard.on,
            off = guard.off,
            flicker = flicker(on, off),
            "modulator: set"
        );
        Ok(())
    }

    /// Starts the carrier.
    ///
    /// # Errors
    ///
    /// See [`TimerError`].
    pub fn start(&self) -> Result<(), ModulatorError> {
        let _remaining = self.timer.start(carrier_period())?;
        Ok(())
    }

    /// Stops the carrier, blocking until any in-flight callback returns.
    /// The output is left at whatever level it last held.
    ///
    /// # Errors
    ///
    /// See [`TimerError`].
    pub fn stop(&self) -> Result<(), ModulatorError> {
        let _remaining = self.timer.stop()?;
        Ok(())
    }

    /// The carrier state (the embedded timer's state).
    #[must_use]
    pub fn state(&self) -> TimerState { self.timer.state() }

    /// The most recently requested duty.
    #[must_use]
    pub fn duty(&self) -> u8 { self.shared.lock().map_or(DUTY_MIN, |guard| guard.duty) }

    /// The cycle lengths currently in effect.
    #[must_use]
    pub fn cycle_lengths(&self) -> (u8, u8) {
        self.shared
            .lock()
            .map_or((DUTY_MIN, DUTY_MAX), |guard| (guard.on, guard.off))
    }

    /// The last sink error (raw errno), zero when none.
    #[must_use]
    pub fn error(&self) -> i32 { self.shared.lock().map_or(0, |guard| guard.error) }
}

/// Builds the cycle engine run by the timer callback. All of the carrier
/// state is local to the closure; only pending exchange touches the shared
/// Condition.
fn engine(
    shared: Arc<Condition<Pending>>,
    mut sink: impl PwmSink + 'static,
) -> impl FnMut() -> i64 + Send + 'static {
    let mut on: u16 = u16::from(DUTY_MIN);
    let mut off: u16 = u16::from(DUTY_MAX);
    let mut cycle: u16 = 0;
    let mut output = false;

    move || {
        // Finish the current half-cycle first.
        if cycle > 0 {
            cycle -= 1;
            return i64::from(cycle);
        }

        // Consume a pending duty at the boundary. The off state starts a
        // fresh period; the `off == 0` case admits updates while the output
        // is held continuously high, where no off state ever comes.
        if !output || off == 0 {
            if let Ok(mut pending) = shared.lock() {
                if pending.set {
                    on = u16::from(pending.ton);
                    off = u16::from(pending.toff);
                    pending.on = pending.ton;
                    pending.off = pending.toff;
                    pending.set = false;
                    shared.signal();
                }
            }
        }

        // Flip the line, or hold it for the continuous extremes.
        if output {
            if off > 0 {
                if let Err(error) = sink.put(false) {
                    record_error(&shared, &error);
                }
                cycle = off;
                output = false;
            } else {
                cycle = on; // 100% duty: stay high.
            }
        } else if on > 0 {
            if let Err(error) = sink.put(true) {
                record_error(&shared, &error);
            }
            cycle = on;
            output = true;
        } else {
            cycle = off; // 0% duty: stay low.
        }

        i64::from(cycle)
    }
}

fn record_error(shared: &Condition<Pending>, error: &std::io::Error) {
    tracing::error!(%error, "modulator: sink");
    if let Ok(mut pending) = shared.lock() {
        pending.error = error.raw_os_error().unwrap_or(0);
    }
}
