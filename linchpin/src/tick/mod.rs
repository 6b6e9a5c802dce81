// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Integer time. Every duration and clock reading in this crate is a count of
//! **ticks** at a single process-wide frequency, conventionally one gigahertz
//! (so a tick is a nanosecond). Feature rates elsewhere in the crate (the
//! condition clock, the modulator's 10 kHz carrier) are integer divisors of
//! this frequency, which keeps all of the arithmetic in integers.
//!
//! [`Ticks`] is unsigned and used for durations and clock readings; [`Sticks`]
//! is the signed flavor used where an API needs a sentinel (negative) or a
//! remainder that can be error-signaled.

// Attach sources.
pub mod clock;
pub mod deadline;

// Re-export.
pub use clock::*;
pub use deadline::*;

use std::time::Duration;

/// Unsigned tick count: a duration or an absolute clock reading.
pub type Ticks = u64;

/// Signed tick count: remainders and sentinel-bearing results.
pub type Sticks = i64;

/// Ticks per second. One gigahertz: a tick is a nanosecond.
pub const FREQUENCY: Sticks = 1_000_000_000;

/// The number of ticks in one second.
#[must_use]
pub const fn frequency() -> Sticks { FREQUENCY }

/// Whole seconds in a tick count.
#[must_use]
pub const fn ticks_to_whole_seconds(ticks: Ticks) -> u64 { ticks / (FREQUENCY as u64) }

/// The sub-second fraction of a tick count, expressed in `unit`ths of a
/// second (e.g. `unit = 1_000_000_000` yields nanoseconds).
#[must_use]
pub const fn ticks_to_fractional_seconds(ticks: Ticks, unit: Sticks) -> u64 {
    ((ticks % (FREQUENCY as u64)) as u128 * unit as u128 / FREQUENCY as u128) as u64
}

/// Converts a count of `unit`ths of a second into ticks.
///
/// `unit` is a frequency in Hertz: `units_to_ticks(250, 1_000)` is 250
/// milliseconds of ticks.
#[must_use]
pub const fn units_to_ticks(units: u64, unit: Sticks) -> Ticks {
    if unit <= FREQUENCY {
        units * (FREQUENCY / unit) as u64
    } else {
        units / (unit / FREQUENCY) as u64
    }
}

/// Converts ticks into a count of `unit`ths of a second, truncating.
#[must_use]
pub const fn ticks_to_units(ticks: Ticks, unit: Sticks) -> u64 {
    if unit <= FREQUENCY {
        ticks / (FREQUENCY / unit) as u64
    } else {
        ticks * (unit / FREQUENCY) as u64
    }
}

/// Ticks from whole seconds plus a fraction expressed in `unit`ths.
#[must_use]
pub const fn seconds_to_ticks(seconds: u64, fraction: u64, unit: Sticks) -> Ticks {
    seconds * (FREQUENCY as u64) + units_to_ticks(fraction, unit)
}

/// A tick count as a [`Duration`].
#[must_use]
pub const fn ticks_to_duration(ticks: Ticks) -> Duration { Duration::from_nanos(ticks) }

/// A [`Duration`] as a tick count, saturating at [`Ticks::MAX`].
#[must_use]
pub fn duration_to_ticks(duration: Duration) -> Ticks {
    u64::try_from(duration.as_nanos()).unwrap_or(Ticks::MAX)
}
