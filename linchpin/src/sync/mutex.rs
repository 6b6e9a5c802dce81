// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A mutex wrapper with guard-scoped acquisition and a distinct,
//! never-logged contention code for `try_lock`.

use std::ops::{Deref, DerefMut};
use std::sync;

/// Failures from the locking layer.
///
/// `Busy` is an expected outcome of [`Mutex::try_lock`] and is deliberately
/// never logged; `Poisoned` means a previous holder panicked.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SyncError {
    /// A previous holder of the lock panicked.
    #[error("lock holder panicked")]
    #[diagnostic(
        code(linchpin::sync::poisoned),
        help("A thread panicked while holding this lock; the guarded state may be torn.")
    )]
    Poisoned,

    /// The lock is held by another thread (try-lock only).
    #[error("lock is busy")]
    #[diagnostic(code(linchpin::sync::busy))]
    Busy,
}

/// Mutual exclusion around a `T`. See the [module docs](super).
#[derive(Debug, Default)]
pub struct Mutex<T> {
    inner: sync::Mutex<T>,
}

/// Scoped proof of exclusive access to the guarded `T`. The lock is released
/// when the guard drops, on every exit path.
#[derive(Debug)]
pub struct MutexGuard<'a, T> {
    pub(super) inner: sync::MutexGuard<'a, T>,
}

impl<T> Mutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: sync::Mutex::new(value),
        }
    }

    /// Blocks until the lock is acquired.
    ///
    /// # Errors
    ///
    /// [`SyncError::Poisoned`] when a previous holder panicked.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>, SyncError> {
        self.inner
            .lock()
            .map(|inner| MutexGuard { inner })
            .map_err(|_| SyncError::Poisoned)
    }

    /// Acquires the lock only if it is immediately available.
    ///
    /// # Errors
    ///
    /// [`SyncError::Busy`] on contention (never logged);
    /// [`SyncError::Poisoned`] when a previous holder panicked.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, SyncError> {
        match self.inner.try_lock() {
            Ok(inner) => Ok(MutexGuard { inner }),
            Err(sync::TryLockError::WouldBlock) => Err(SyncError::Busy),
            Err(sync::TryLockError::Poisoned(_)) => Err(SyncError::Poisoned),
        }
    }

    /// Consumes the mutex, returning the guarded value.
    pub fn into_inner(self) -> Result<T, SyncError> {
        self.inner.into_inner().map_err(|_| SyncError::Poisoned)
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T { &self.inner }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T { &mut self.inner }
}
