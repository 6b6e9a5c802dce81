// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Scheduling policy for the dedicated service threads.
//!
//! Timer callback threads run round-robin at an elevated fixed priority to
//! keep callback latency (and therefore PWM jitter) low. Elevation needs
//! privilege; when the process lacks it, the request degrades to the
//! inherited policy and the crate warns **once** rather than spamming every
//! thread spawn.

use std::sync::Once;

/// The elevated fixed priority used by the timer and thread presets, clamped
/// at application time to the range the kernel reports for the policy.
pub const ELEVATED_PRIORITY: i32 = 49;

/// The scheduling class to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Scheduler {
    /// Keep the inherited policy; `priority` is ignored.
    Inherit,
    /// `SCHED_FIFO`: fixed priority, run-to-block.
    Fifo,
    /// `SCHED_RR`: fixed priority with round-robin time slicing.
    RoundRobin,
}

/// A scheduling class plus a fixed priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub scheduler: Scheduler,
    pub priority: i32,
}

impl Policy {
    /// The inherited (non-elevated) policy.
    #[must_use]
    pub const fn inherit() -> Self {
        Self {
            scheduler: Scheduler::Inherit,
            priority: 0,
        }
    }

    /// The policy for timer callback threads: round-robin, elevated.
    #[must_use]
    pub const fn timer() -> Self {
        Self {
            scheduler: Scheduler::RoundRobin,
            priority: ELEVATED_PRIORITY,
        }
    }

    /// The default policy for [`Thread`](crate::thread::Thread)s: elevated
    /// round-robin when the process is privileged (effective uid 0, which
    /// can actually get it), inherited otherwise.
    #[must_use]
    pub fn thread_default() -> Self {
        if rustix::process::geteuid().is_root() {
            Self {
                scheduler: Scheduler::RoundRobin,
                priority: ELEVATED_PRIORITY,
            }
        } else {
            Self::inherit()
        }
    }

    /// Applies the policy to the calling thread, clamping the priority to
    /// the legal range for the class.
    ///
    /// `EPERM` is a degradation, not a failure: the thread keeps its
    /// inherited policy, a warning is logged once per process, and `Ok` is
    /// returned. Anything else from the kernel is returned as the raw errno.
    pub fn apply_to_current(self) -> Result<(), i32> {
        let policy = match self.scheduler {
            Scheduler::Inherit => return Ok(()),
            Scheduler::Fifo => libc::SCHED_FIFO,
            Scheduler::RoundRobin => libc::SCHED_RR,
        };

        // Safety: both calls take only scalar arguments.
        let floor = unsafe { libc::sched_get_priority_min(policy) };
        let ceiling = unsafe { libc::sched_get_priority_max(policy) };
        if floor < 0 || ceiling < 0 {
            return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0));
        }
        let parameters = libc::sched_param {
            sched_priority: self.priority.clamp(floor, ceiling),
        };

        // Safety: parameters outlives the call; pthread_self is the calling
        // thread by definition.
        let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &parameters) };
        match rc {
            0 => Ok(()),
            libc::EPERM => {
                static DEGRADED: Once = Once::new();
                DEGRADED.call_once(|| {
                    tracing::warn!(
                        scheduler = %self.scheduler,
                        priority = parameters.sched_priority,
                        "scheduling elevation denied; continuing at inherited policy"
                    );
                });
                Ok(())
            }
            errno => {
                tracing::error!(errno, "pthread_setschedparam");
                Err(errno)
            }
        }
    }
}
