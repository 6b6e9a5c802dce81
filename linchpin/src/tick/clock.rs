// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Clock readings in ticks, and a bounded interruptible sleep.

use super::{Ticks, duration_to_ticks, ticks_to_duration};
use rustix::time::{ClockId, clock_gettime};
use std::time::Duration;

fn gettime(clock: ClockId) -> Ticks {
    let ts = clock_gettime(clock);
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

/// Monotonic clock reading in ticks. Unaffected by wall-clock adjustments;
/// use for measuring intervals.
#[must_use]
pub fn elapsed() -> Ticks { gettime(ClockId::Monotonic) }

/// Realtime (wall) clock reading in ticks since the POSIX epoch. This is the
/// clock against which [`Deadline`] values are interpreted.
///
/// [`Deadline`]: super::Deadline
#[must_use]
pub fn clocktime() -> Ticks { gettime(ClockId::Realtime) }

/// Sleeps for `ticks`. Returns the unslept remainder: zero when the full
/// interval elapsed, nonzero only when `interruptible` is set and a signal
/// arrived first. When `interruptible` is false the sleep is resumed after
/// every interruption.
pub fn delay(ticks: Ticks, interruptible: bool) -> Ticks {
    use rustix::thread::NanosleepRelativeResult;
    use rustix::time::Timespec;

    let mut remaining = ticks_to_duration(ticks);
    loop {
        if remaining.is_zero() {
            return 0;
        }
        let request = Timespec {
            tv_sec: remaining.as_secs() as i64,
            tv_nsec: i64::from(remaining.subsec_nanos()),
        };
        match rustix::thread::nanosleep(&request) {
            NanosleepRelativeResult::Ok => return 0,
            NanosleepRelativeResult::Interrupted(left) => {
                let left = Duration::new(left.tv_sec.max(0) as u64, left.tv_nsec as u32);
                if interruptible {
                    return duration_to_ticks(left);
                }
                remaining = left;
            }
            NanosleepRelativeResult::Err(errno) => {
                tracing::error!(%errno, "delay: nanosleep");
                return duration_to_ticks(remaining);
            }
        }
    }
}
