// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR SIGUSR pthread ESRCH

//! Threads with an explicit lifecycle, synchronized notification, and an
//! interruptible-syscall kick.
//!
//! A [`Thread`] wraps an OS thread in a state machine guarded by an embedded
//! [`Condition`]; every transition is broadcast, so any number of observers
//! can wait for `Running`, `Exiting`, and so on. The lifecycle is:
//!
//! ```text
//! Initialized ── start() ──▶ Started ──▶ Running ──▶ Exiting ── join() ──▶ Joined
//!      ▲                       │ (proxy entry)       (task returned)         │
//!      │                       ▼                                             │
//!      │                    Failed ◀── spawn failure       start() ◀─────────┘
//! ```
//!
//! # Notification
//!
//! [`ThreadCore::notify`] bumps a **saturating** counter under the Condition,
//! broadcasts, and then *kicks* the thread: a no-op-handler signal
//! (`SIGUSR1` by default) delivered with `pthread_kill`, whose sole purpose
//! is to turn a blocking syscall into `EINTR` so the thread becomes runnable
//! and can call [`notifications`]. Threads blocked in a poll loop instead of
//! a syscall can hang a [`ThreadWaker`] (for example a [`mio::Waker`]) on
//! their core and be kicked through that.
//!
//! The counter saturates rather than wrapping: a burst of notifies coalesces
//! but is never lost to wraparound.
//!
//! # The current thread
//!
//! The proxy entry installs a thread-local handle, so [`current`] resolves
//! the running [`ThreadCore`] from anywhere in the task. The process's main
//! thread is represented by a lazily-registered pseudo-thread (state
//! `Running`, kick disabled), so [`current`] always returns a usable handle.

use crate::sched::Policy;
use crate::sync::{Condition, SyncError, WaitOutcome};
use crate::tick::Deadline;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError};

/// The default kick signal.
pub const NOTIFY_DEFAULT: i32 = libc::SIGUSR1;

/// Thread lifecycle states. Every transition is broadcast on the thread's
/// embedded [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Lifecycle {
    /// Shell exists but has no task yet (never observable through this API;
    /// kept for state-dump parity).
    Allocated,
    /// Ready to start.
    Initialized,
    /// `start` succeeded; the OS thread exists but has not entered the task.
    Started,
    /// The proxy has entered the task.
    Running,
    /// The task returned; the OS thread awaits joining.
    Exiting,
    /// Joined; the exit value is available.
    Joined,
    /// Finalized (dropped in a joinable state).
    Finalized,
    /// Spawn failed; `start` may be retried.
    Failed,
    /// State could not be read (lock poisoned).
    Unknown,
}

/// A kick target for threads that block in a poll loop rather than a
/// syscall. [`mio::Waker`] implements this.
pub trait ThreadWaker: Send + Sync {
    /// Makes the blocked thread runnable. Must be async-signal-safe to call
    /// from any thread.
    fn wake(&self) -> std::io::Result<()>;
}

impl ThreadWaker for mio::Waker {
    fn wake(&self) -> std::io::Result<()> { mio::Waker::wake(self) }
}

#[derive(Debug)]
struct SharedState {
    state: Lifecycle,
    notifications: u32,
}

/// The shared half of a [`Thread`]: the state machine, the notification
/// counter, and the kick plumbing. Obtainable for the calling thread via
/// [`current`].
pub struct ThreadCore {
    condition: Condition<SharedState>,
    /// Kick signal number; 0 disables the signal kick.
    kick: AtomicI32,
    pthread: std::sync::Mutex<Option<libc::pthread_t>>,
    waker: std::sync::Mutex<Option<Box<dyn ThreadWaker>>>,
}

impl std::fmt::Debug for ThreadCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCore")
            .field("state", &self.state())
            .field("kick", &self.kick.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ThreadCore {
    fn new(state: Lifecycle, kick: i32) -> Self {
        Self {
            condition: Condition::new(SharedState {
                state,
                notifications: 0,
            }),
            kick: AtomicI32::new(kick),
            pthread: std::sync::Mutex::new(None),
            waker: std::sync::Mutex::new(None),
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.condition
            .lock()
            .map_or(Lifecycle::Unknown, |guard| guard.state)
    }

    /// Delivers a notification: bumps the saturating counter, broadcasts,
    /// and kicks the thread (signal and/or waker).
    ///
    /// # Errors
    ///
    /// [`ThreadError::InvalidState`] unless the thread is `Started` or
    /// `Running`.
    pub fn notify(&self) -> Result<(), ThreadError> {
        let mut guard = self.condition.lock()?;
        match guard.state {
            Lifecycle::Started | Lifecycle::Running => {}
            other => return Err(ThreadError::InvalidState(other)),
        }
        if guard.notifications == u32::MAX {
            tracing::debug!("thread: notification counter saturated");
        } else {
            guard.notifications += 1;
            tracing::debug!(notifications = guard.notifications, "thread: notified");
        }
        self.condition.signal();
        drop(guard);

        let kick = self.kick.load(Ordering::Relaxed);
        if kick != 0 {
            let target = *self.pthread.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(target) = target {
                // Safety: pthread_kill with a bad id returns ESRCH, it does
                // not fault; the id was stored by the proxy entry.
                let rc = unsafe { libc::pthread_kill(target, kick) };
                if rc != 0 && rc != libc::ESRCH {
                    tracing::warn!(rc, kick, "thread: pthread_kill");
                }
            }
        }
        if let Some(waker) = self
            .waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if let Err(error) = waker.wake() {
                tracing::warn!(%error, "thread: waker");
            }
        }
        Ok(())
    }

    /// Atomically reads and zeroes the notification counter, broadcasting
    /// the change. Called by the running thread on itself, typically after a
    /// blocking call returned `EINTR`.
    #[must_use]
    pub fn take_notifications(&self) -> u32 {
        let Ok(mut guard) = self.condition.lock() else {
            return 0;
        };
        let notifications = guard.notifications;
        guard.notifications = 0;
        if notifications > 0 {
            tracing::debug!(notifications, "thread: notifications consumed");
        }
        self.condition.signal();
        notifications
    }

    /// Hangs a waker on this thread for the kick path. Poll-loop tasks call
    /// this with the waker of the poll they block on.
    pub fn set_waker(&self, waker: Box<dyn ThreadWaker>) {
        *self.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(waker);
    }

    /// Removes the kick waker.
    pub fn clear_waker(&self) {
        *self.waker.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Waits until the state leaves `from`, bounded by `deadline`.
    pub(crate) fn wait_while(
        &self,
        from: &[Lifecycle],
        deadline: Deadline,
    ) -> Result<Lifecycle, ThreadError> {
        let mut guard = self.condition.lock()?;
        while from.contains(&guard.state) {
            let (reheld, outcome) = self.condition.wait_until(guard, deadline)?;
            guard = reheld;
            if outcome == WaitOutcome::TimedOut && from.contains(&guard.state) {
                return Err(ThreadError::TimedOut);
            }
        }
        Ok(guard.state)
    }
}

/// Thread operation failures. `TimedOut` is an expected outcome of the
/// deadline-bounded waits, distinct from the error cases.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ThreadError {
    /// The operation is not legal in the thread's current state.
    #[error("operation illegal in thread state {0}")]
    #[diagnostic(code(linchpin::thread::invalid_state))]
    InvalidState(Lifecycle),

    /// A thread may not join itself.
    #[error("a thread cannot join itself")]
    #[diagnostic(code(linchpin::thread::join_self))]
    JoinSelf,

    /// The join deadline expired while the thread was still running.
    #[error("join deadline expired")]
    #[diagnostic(code(linchpin::thread::timed_out))]
    TimedOut,

    /// The task panicked; there is no exit value.
    #[error("thread task panicked")]
    #[diagnostic(code(linchpin::thread::panicked))]
    Panicked,

    /// The OS refused to create the thread.
    #[error("thread spawn failed")]
    #[diagnostic(
        code(linchpin::thread::spawn),
        help("Check the per-user thread limit (`ulimit -u`).")
    )]
    Spawn(#[source] std::io::Error),

    /// Installing the kick-signal handler failed.
    #[error("kick handler installation failed")]
    #[diagnostic(code(linchpin::thread::kick_handler))]
    KickHandler(#[source] std::io::Error),

    /// The underlying lock was poisoned.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadCore>>> = const { RefCell::new(None) };
}

/// The process-wide pseudo-thread representing threads this module did not
/// spawn (the main thread above all). Registered lazily, state `Running`,
/// kick disabled.
fn process_core() -> &'static Arc<ThreadCore> {
    static MAIN: OnceLock<Arc<ThreadCore>> = OnceLock::new();
    MAIN.get_or_init(|| {
        let core = ThreadCore::new(Lifecycle::Running, 0);
        // Safety: pthread_self has no preconditions.
        *core.pthread.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(unsafe { libc::pthread_self() });
        tracing::debug!("thread: process pseudo-thread registered");
        Arc::new(core)
    })
}

/// The [`ThreadCore`] of the calling thread: the one installed by the proxy
/// entry for managed threads, the process pseudo-thread otherwise.
#[must_use]
pub fn current() -> Arc<ThreadCore> {
    CURRENT.with(|current| current.borrow().clone()).unwrap_or_else(|| Arc::clone(process_core()))
}

/// [`ThreadCore::take_notifications`] on the calling thread.
#[must_use]
pub fn notifications() -> u32 { current().take_notifications() }

/// Yields the processor.
pub fn yield_now() { rustix::thread::sched_yield(); }

/// Installs the do-nothing kick handler for `signum`, once per process per
/// signal. The handler's only effect is that delivery interrupts blocking
/// syscalls with `EINTR`.
fn install_kick_handler(signum: i32) -> std::io::Result<()> {
    static INSTALLED: OnceLock<std::sync::Mutex<HashSet<i32>>> = OnceLock::new();
    let installed = INSTALLED.get_or_init(|| std::sync::Mutex::new(HashSet::new()));
    let mut installed = installed.lock().unwrap_or_else(PoisonError::into_inner);
    if installed.contains(&signum) {
        return Ok(());
    }
    signal_hook::flag::register(signum, Arc::new(AtomicBool::new(false)))?;
    installed.insert(signum);
    Ok(())
}

type Task<T> = Box<dyn FnMut() -> T + Send>;

/// A lifecycle-managed thread yielding a `T`. See the [module docs](self).
pub struct Thread<T> {
    core: Arc<ThreadCore>,
    task: Arc<std::sync::Mutex<Task<T>>>,
    value: Arc<std::sync::Mutex<Option<T>>>,
    handle: Option<std::thread::JoinHandle<()>>,
    policy: Policy,
    name: String,
}

impl<T> std::fmt::Debug for Thread<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

/// Sets `Exiting` when the proxy unwinds, panic included.
struct ExitGuard(Arc<ThreadCore>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.0.condition.lock() {
            guard.state = Lifecycle::Exiting;
            tracing::debug!("thread: EXITING");
            self.0.condition.signal();
        }
    }
}

impl<T: Clone + Send + 'static> Thread<T> {
    /// A thread around `task`, using the privilege-appropriate default
    /// scheduling policy and the default kick signal.
    #[must_use]
    pub fn new(task: impl FnMut() -> T + Send + 'static) -> Self {
        Self::with_policy(task, Policy::thread_default())
    }

    /// A thread around `task` with an explicit scheduling policy.
    #[must_use]
    pub fn with_policy(task: impl FnMut() -> T + Send + 'static, policy: Policy) -> Self {
        static SEQUENCE: AtomicU64 = AtomicU64::new(0);
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            core: Arc::new(ThreadCore::new(Lifecycle::Initialized, NOTIFY_DEFAULT)),
            task: Arc::new(std::sync::Mutex::new(Box::new(task))),
            value: Arc::new(std::sync::Mutex::new(None)),
            handle: None,
            policy,
            name: format!("linchpin-thread-{sequence}"),
        }
    }

    /// Changes the kick signal; 0 disables the signal kick entirely. Takes
    /// effect at the next [`Thread::start`].
    pub fn set_notify(&mut self, signum: i32) { self.core.kick.store(signum, Ordering::Relaxed); }

    /// The shared core, for handing to observers and notifiers.
    #[must_use]
    pub fn core(&self) -> Arc<ThreadCore> { Arc::clone(&self.core) }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> Lifecycle { self.core.state() }

    /// Spawns the OS thread on the proxy entry. Legal in `Initialized`,
    /// `Joined`, and `Failed`; a restart re-invokes the same task.
    ///
    /// # Errors
    ///
    /// [`ThreadError::InvalidState`] in any other state;
    /// [`ThreadError::KickHandler`] / [`ThreadError::Spawn`] on OS failures
    /// (the latter leaves the thread `Failed`, and `start` may be retried).
    pub fn start(&mut self) -> Result<(), ThreadError> {
        let mut guard = self.core.condition.lock()?;
        match guard.state {
            Lifecycle::Initialized | Lifecycle::Joined | Lifecycle::Failed => {}
            other => return Err(ThreadError::InvalidState(other)),
        }

        let kick = self.core.kick.load(Ordering::Relaxed);
        if kick != 0 {
            install_kick_handler(kick).map_err(ThreadError::KickHandler)?;
        }

        guard.notifications = 0;
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let core = Arc::clone(&self.core);
        let task = Arc::clone(&self.task);
        let value = Arc::clone(&self.value);
        let policy = self.policy;
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || proxy(&core, &task, &value, policy));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                guard.state = Lifecycle::Started;
                tracing::debug!(name = %self.name, "thread: STARTED");
                self.core.condition.signal();
                Ok(())
            }
            Err(error) => {
                guard.state = Lifecycle::Failed;
                tracing::error!(name = %self.name, %error, "thread: START FAILED");
                self.core.condition.signal();
                Err(ThreadError::Spawn(error))
            }
        }
    }

    /// [`ThreadCore::notify`] on this thread.
    ///
    /// # Errors
    ///
    /// See [`ThreadCore::notify`].
    pub fn notify(&self) -> Result<(), ThreadError> { self.core.notify() }

    /// Waits for the task to return (bounded by `deadline`), joins the OS
    /// thread, and yields the exit value. Joining an already-`Joined` thread
    /// returns the stored value again.
    ///
    /// # Errors
    ///
    /// [`ThreadError::JoinSelf`] from inside the task;
    /// [`ThreadError::TimedOut`] when the deadline passes first;
    /// [`ThreadError::Panicked`] when the task panicked.
    pub fn join_until(&mut self, deadline: Deadline) -> Result<T, ThreadError> {
        if let Some(handle) = &self.handle {
            if handle.thread().id() == std::thread::current().id() {
                return Err(ThreadError::JoinSelf);
            }
        }

        match self.core.wait_while(
            &[Lifecycle::Started, Lifecycle::Running],
            deadline,
        )? {
            Lifecycle::Exiting => {}
            Lifecycle::Joined => return self.stored_value(),
            other => return Err(ThreadError::InvalidState(other)),
        }

        let Some(handle) = self.handle.take() else {
            return Err(ThreadError::InvalidState(Lifecycle::Unknown));
        };
        let joined = handle.join();

        let mut guard = self.core.condition.lock()?;
        guard.state = Lifecycle::Joined;
        tracing::debug!(name = %self.name, "thread: JOINED");
        self.core.condition.signal();
        drop(guard);

        match joined {
            Ok(()) => self.stored_value(),
            Err(_) => Err(ThreadError::Panicked),
        }
    }

    /// [`Thread::join_until`] with no deadline.
    ///
    /// # Errors
    ///
    /// See [`Thread::join_until`].
    pub fn join(&mut self) -> Result<T, ThreadError> { self.join_until(Deadline::Infinity) }

    fn stored_value(&self) -> Result<T, ThreadError> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ThreadError::Panicked)
    }
}

fn proxy<T>(
    core: &Arc<ThreadCore>,
    task: &Arc<std::sync::Mutex<Task<T>>>,
    value: &Arc<std::sync::Mutex<Option<T>>>,
    policy: Policy,
) {
    // Safety: pthread_self has no preconditions.
    let me = unsafe { libc::pthread_self() };
    *core.pthread.lock().unwrap_or_else(PoisonError::into_inner) = Some(me);
    CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(core)));
    let _ = policy.apply_to_current();

    match core.condition.lock() {
        Ok(mut guard) => {
            guard.state = Lifecycle::Running;
            tracing::debug!("thread: RUNNING");
            core.condition.signal();
        }
        Err(_) => return,
    }

    // The Exiting transition must run however the task leaves, panic
    // included.
    let _exit = ExitGuard(Arc::clone(core));
    let result = {
        let mut task = task.lock().unwrap_or_else(PoisonError::into_inner);
        task()
    };
    *value.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
}

impl<T> Drop for Thread<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Never joined: detach rather than block in drop.
            tracing::warn!(name = %self.name, "thread: dropped without join; detaching");
            return;
        }
        if let Ok(mut guard) = self.core.condition.lock() {
            if matches!(
                guard.state,
                Lifecycle::Initialized | Lifecycle::Joined | Lifecycle::Failed
            ) {
                guard.state = Lifecycle::Finalized;
                self.core.condition.signal();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::units_to_ticks;
    use std::time::Duration;

    #[test]
    fn test_lifecycle_reaches_joined_with_value() {
        let mut thread = Thread::new(|| 42);
        assert_eq!(thread.state(), Lifecycle::Initialized);
        thread.start().unwrap();
        assert_eq!(thread.join().unwrap(), 42);
        assert_eq!(thread.state(), Lifecycle::Joined);
        // A second join returns the stored value.
        assert_eq!(thread.join().unwrap(), 42);
    }

    #[test]
    fn test_start_is_illegal_while_running() {
        let mut thread = Thread::new(|| {
            std::thread::sleep(Duration::from_millis(50));
            0
        });
        thread.start().unwrap();
        assert!(matches!(
            thread.start(),
            Err(ThreadError::InvalidState(_))
        ));
        thread.join().unwrap();
    }

    #[test]
    fn test_restart_after_join_reruns_the_task() {
        let mut runs = 0;
        let mut thread = Thread::new(move || {
            runs += 1;
            runs
        });
        thread.start().unwrap();
        assert_eq!(thread.join().unwrap(), 1);
        thread.start().unwrap();
        assert_eq!(thread.join().unwrap(), 2);
    }

    #[test]
    fn test_join_until_times_out_distinctly() {
        let mut thread = Thread::new(|| {
            std::thread::sleep(Duration::from_millis(200));
            0
        });
        thread.start().unwrap();
        let deadline = Deadline::after(units_to_ticks(10, 1_000)); // 10 ms
        assert!(matches!(
            thread.join_until(deadline),
            Err(ThreadError::TimedOut)
        ));
        // Still joinable afterwards.
        assert_eq!(thread.join().unwrap(), 0);
    }

    #[test]
    fn test_notifications_saturate_and_coalesce() {
        let core = Arc::new(ThreadCore::new(Lifecycle::Running, 0));
        {
            let mut guard = core.condition.lock().unwrap();
            guard.notifications = u32::MAX;
        }
        core.notify().unwrap();
        assert_eq!(core.take_notifications(), u32::MAX); // Saturated, not wrapped.
        assert_eq!(core.take_notifications(), 0);
    }

    #[test]
    fn test_notify_rejects_unstarted_threads() {
        let thread = Thread::new(|| 0);
        assert!(matches!(
            thread.notify(),
            Err(ThreadError::InvalidState(Lifecycle::Initialized))
        ));
    }

    #[test]
    fn test_current_resolves_the_running_thread() {
        let mut thread = Thread::new(|| {
            // Inside the task, current() is this thread's core, counting
            // notifications delivered to it.
            let core = current();
            let mut total = 0u32;
            while total == 0 {
                total += core.take_notifications();
                std::thread::sleep(Duration::from_millis(1));
            }
            total
        });
        thread.start().unwrap();
        while thread.state() != Lifecycle::Running {
            std::thread::sleep(Duration::from_millis(1));
        }
        thread.notify().unwrap();
        assert!(thread.join().unwrap() >= 1);
    }

    #[test]
    fn test_unmanaged_threads_share_the_process_core() {
        let core = current();
        assert_eq!(core.state(), Lifecycle::Running);
        let _ = notifications();
    }

    #[test]
    fn test_panicking_task_reports_panicked() {
        let mut thread: Thread<i32> = Thread::new(|| panic!("deliberate"));
        thread.start().unwrap();
        assert!(matches!(thread.join(), Err(ThreadError::Panicked)));
    }
}
