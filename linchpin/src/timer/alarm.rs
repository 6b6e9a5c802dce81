// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words setitimer SIGALRM

//! A `setitimer`-style process-wide alarm.
//!
//! Lazily constructs one signal-kind [`Timer`] delivering `SIGALRM` to the
//! process and arms or disarms it, mimicking the classic `setitimer(2)`
//! interface while running off the monotonic clock. The singleton's
//! periodicity is fixed by whichever of [`oneshot`] and [`periodic`] runs
//! first in the process.
//!
//! The default disposition of `SIGALRM` terminates the process: install a
//! handler (for example with `signal-hook`) before arming.

use super::{Timer, TimerError};
use crate::tick::{Sticks, Ticks};
use std::sync::{Mutex, OnceLock, PoisonError};

fn with_singleton(periodic: bool, ticks: Ticks) -> Result<Sticks, TimerError> {
    static SINGLETON: OnceLock<Mutex<Option<Timer>>> = OnceLock::new();
    let slot = SINGLETON.get_or_init(|| Mutex::new(None));
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(Timer::with_signal(periodic, libc::SIGALRM)?);
    }
    let timer = slot.as_ref().expect("alarm: singleton initialized above");
    if ticks > 0 {
        timer.start(ticks)
    } else {
        timer.stop()
    }
}

/// Arms the alarm singleton to deliver one `SIGALRM` after `ticks`; zero
/// disarms it. Returns the previous schedule's remaining ticks.
///
/// # Errors
///
/// See [`TimerError`].
pub fn oneshot(ticks: Ticks) -> Result<Sticks, TimerError> { with_singleton(false, ticks) }

/// Arms the alarm singleton to deliver `SIGALRM` every `ticks`; zero disarms
/// it. Returns the previous schedule's remaining ticks.
///
/// # Errors
///
/// See [`TimerError`].
pub fn periodic(ticks: Ticks) -> Result<Sticks, TimerError> { with_singleton(true, ticks) }
