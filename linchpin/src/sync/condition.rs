// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A condition variable bound to the one mutex it will ever be used with.
//!
//! Waits take an absolute wall-clock [`Deadline`] (or [`Deadline::Infinity`])
//! and return with the mutex re-held. Signaling is always a broadcast,
//! followed by a scheduler yield so woken threads get a prompt chance to
//! re-evaluate their predicates. Deadline expiry is a distinct
//! [`WaitOutcome::TimedOut`], not an error.

use super::{Mutex, MutexGuard, SyncError};
use crate::tick::Deadline;
use std::sync::Condvar;
use std::time::Duration;

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a broadcast (or spuriously; re-check the predicate).
    Signaled,
    /// The deadline passed before a broadcast arrived.
    TimedOut,
}

/// State of type `T` guarded by a mutex, with a condition variable for
/// waiting on changes to it. See the [module docs](super).
#[derive(Debug, Default)]
pub struct Condition<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Condition<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            mutex: Mutex::new(value),
            condvar: Condvar::new(),
        }
    }

    /// Acquires the embedded mutex.
    ///
    /// # Errors
    ///
    /// [`SyncError::Poisoned`] when a previous holder panicked.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>, SyncError> { self.mutex.lock() }

    /// Releases the mutex, waits for a broadcast, and reacquires it.
    ///
    /// Wakes may be spurious; callers loop on their predicate.
    ///
    /// # Errors
    ///
    /// [`SyncError::Poisoned`] when the lock was poisoned during the wait.
    pub fn wait<'a>(&'a self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>, SyncError> {
        self.condvar
            .wait(guard.inner)
            .map(|inner| MutexGuard { inner })
            .map_err(|_| SyncError::Poisoned)
    }

    /// Like [`Condition::wait`], bounded by an absolute wall-clock deadline.
    ///
    /// Returns the re-held guard and how the wait ended. A deadline already
    /// in the past times out without blocking.
    ///
    /// # Errors
    ///
    /// [`SyncError::Poisoned`] when the lock was poisoned during the wait.
    pub fn wait_until<'a>(
        &'a self,
        guard: MutexGuard<'a, T>,
        deadline: Deadline,
    ) -> Result<(MutexGuard<'a, T>, WaitOutcome), SyncError> {
        match deadline.remaining() {
            None => self.wait(guard).map(|guard| (guard, WaitOutcome::Signaled)),
            Some(remaining) => self.wait_for(guard, remaining),
        }
    }

    /// Like [`Condition::wait`], bounded by a relative duration. Used where
    /// the bound tracks the monotonic clock rather than a wall-clock
    /// deadline.
    ///
    /// # Errors
    ///
    /// [`SyncError::Poisoned`] when the lock was poisoned during the wait.
    pub fn wait_for<'a>(
        &'a self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> Result<(MutexGuard<'a, T>, WaitOutcome), SyncError> {
        let (inner, result) = self
            .condvar
            .wait_timeout(guard.inner, timeout)
            .map_err(|_| SyncError::Poisoned)?;
        let outcome = if result.timed_out() {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Signaled
        };
        Ok((MutexGuard { inner }, outcome))
    }

    /// Broadcasts to every waiter, then yields the processor so the woken
    /// threads get a prompt chance to re-evaluate their predicates.
    pub fn signal(&self) {
        self.condvar.notify_all();
        rustix::thread::sched_yield();
    }
}

impl<T> Drop for Condition<T> {
    /// Releases any straggling waiters before the condition variable goes
    /// away: broadcast, then yield, then destroy.
    fn drop(&mut self) {
        self.condvar.notify_all();
        rustix::thread::sched_yield();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::units_to_ticks;
    use std::sync::Arc;

    #[test]
    fn test_wait_until_past_deadline_times_out() {
        let condition = Condition::new(0u32);
        let guard = condition.lock().unwrap();
        let (guard, outcome) = condition
            .wait_until(guard, Deadline::At(0))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(*guard, 0); // The mutex is re-held on return.
    }

    #[test]
    fn test_signal_wakes_a_waiter() {
        let condition = Arc::new(Condition::new(false));
        let waiter = Arc::clone(&condition);
        let handle = std::thread::spawn(move || {
            let mut guard = waiter.lock().unwrap();
            while !*guard {
                guard = waiter.wait(guard).unwrap();
            }
            true
        });

        std::thread::sleep(Duration::from_millis(10));
        {
            let mut guard = condition.lock().unwrap();
            *guard = true;
        }
        condition.signal();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_broadcast_wakes_every_waiter() {
        let condition = Arc::new(Condition::new(false));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let waiter = Arc::clone(&condition);
                std::thread::spawn(move || {
                    let mut guard = waiter.lock().unwrap();
                    while !*guard {
                        guard = waiter.wait(guard).unwrap();
                    }
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(10));
        {
            let mut guard = condition.lock().unwrap();
            *guard = true;
        }
        condition.signal();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_bounded_wait_observes_the_deadline() {
        let condition = Condition::new(());
        let mut guard = condition.lock().unwrap();
        let deadline = Deadline::after(units_to_ticks(20, 1_000)); // 20 ms
        let started = crate::tick::elapsed();
        loop {
            let (reheld, outcome) = condition.wait_until(guard, deadline).unwrap();
            guard = reheld;
            if outcome == WaitOutcome::TimedOut {
                break;
            }
        }
        let waited = crate::tick::elapsed() - started;
        assert!(waited >= units_to_ticks(15, 1_000)); // Allow clock skew slop.
    }
}
