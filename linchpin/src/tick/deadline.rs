// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Absolute wall-clock deadlines for the blocking waits.
//!
//! Every blocking operation in the crate has a `_until` variant taking a
//! [`Deadline`]: an absolute [`clocktime`] reading, or [`Deadline::Infinity`]
//! to wait unconditionally. Expiry is reported as a distinct timed-out
//! outcome, never as an error.

use super::{Ticks, clocktime, ticks_to_duration};
use std::time::Duration;

/// An absolute realtime deadline, or no deadline at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Wait unconditionally.
    Infinity,
    /// Wait until this [`clocktime`] reading is reached.
    At(Ticks),
}

impl Deadline {
    /// A deadline `ticks` from now.
    #[must_use]
    pub fn after(ticks: Ticks) -> Self { Self::At(clocktime().saturating_add(ticks)) }

    /// Time left until the deadline. `None` means no deadline; a zero
    /// [`Duration`] means the deadline has passed.
    #[must_use]
    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Infinity => None,
            Self::At(at) => Some(ticks_to_duration(at.saturating_sub(clocktime()))),
        }
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(self) -> bool {
        match self {
            Self::Infinity => false,
            Self::At(at) => clocktime() >= at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::units_to_ticks;

    #[test]
    fn test_infinity_never_expires() {
        assert!(!Deadline::Infinity.expired());
        assert_eq!(Deadline::Infinity.remaining(), None);
    }

    #[test]
    fn test_after_is_in_the_future() {
        let deadline = Deadline::after(units_to_ticks(60, 1)); // one minute
        assert!(!deadline.expired());
        let remaining = deadline.remaining().unwrap();
        assert!(remaining > Duration::from_secs(50));
        assert!(remaining <= Duration::from_secs(60));
    }

    #[test]
    fn test_past_deadline_is_expired() {
        let deadline = Deadline::At(clocktime().saturating_sub(1));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }
}
