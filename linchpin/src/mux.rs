// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words pselect EPOLLPRI eventfd

//! A readiness multiplexer over four descriptor sets, with cooperative
//! signal delivery inside the wait.
//!
//! Descriptors register into any of four **distinct** capabilities: `read`,
//! `write`, `accept` (listening sockets awaiting connections), and `urgent`
//! (out-of-band data, `EPOLLPRI`). One [`Mux::wait`] harvests readiness from
//! the kernel ([`mio::Poll`], epoll underneath) and banks it into per-set
//! queues; the count `wait` returns is exactly the number of descriptors the
//! `ready_*` accessors will then yield before reporting exhaustion. Within a
//! set, delivery round-robins across descriptors from one `wait` to the
//! next, so a busy low-numbered descriptor cannot starve the others.
//!
//! Readiness is harvested edge-style: drain what you read from a ready
//! descriptor, or re-arm it by design, before the next `wait`.
//!
//! # Signals
//!
//! [`Mux::register_signal`] routes a signal into the wait: it is delivered
//! while the multiplexer sleeps, surfaces as [`MuxError::Interrupted`] when
//! nothing else is ready, and is recorded either way for
//! [`Mux::caught`]. This is the poll-loop analogue of `pselect`'s
//! atomically-applied signal mask, and composes with the
//! [thread kick](crate::thread): register the kick signal and a notified
//! thread's `wait` returns promptly.

use crate::tick::{Sticks, Ticks, ticks_to_duration};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use signal_hook_mio::v1_0::Signals;
use smallvec::SmallVec;
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

const EVENTS_CAPACITY: usize = 1024;
const TOKEN_SIGNALS: Token = Token(usize::MAX - 1);

/// Multiplexer failures. `Interrupted` is an expected outcome: a registered
/// signal (or a kick) arrived while waiting.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum MuxError {
    /// The wait was interrupted by a signal before any descriptor became
    /// ready. Consult [`Mux::caught`] and the thread's notification
    /// counter, then wait again.
    #[error("wait interrupted by a signal")]
    #[diagnostic(code(linchpin::mux::interrupted))]
    Interrupted,

    /// The kernel polling layer failed.
    #[error("multiplexer i/o failure")]
    #[diagnostic(code(linchpin::mux::io))]
    Io(#[from] std::io::Error),
}

/// Which capabilities a descriptor is registered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Sets {
    read: bool,
    write: bool,
    accept: bool,
    urgent: bool,
}

impl Sets {
    fn any(self) -> bool { self.read || self.write || self.accept || self.urgent }

    fn interest(self) -> Option<Interest> {
        let mut interest: Option<Interest> = None;
        let mut merge = |add: Interest| {
            interest = Some(match interest {
                Some(existing) => existing | add,
                None => add,
            });
        };
        if self.read || self.accept {
            merge(Interest::READABLE);
        }
        if self.write {
            merge(Interest::WRITABLE);
        }
        if self.urgent {
            merge(Interest::PRIORITY);
        }
        interest
    }
}

/// One capability's banked readiness plus its fairness cursor.
#[derive(Debug, Default)]
struct ReadySet {
    queue: VecDeque<RawFd>,
    cursor: RawFd,
}

impl ReadySet {
    /// Sorts, dedups, and rotates the freshly-harvested queue so delivery
    /// resumes just past the last descriptor handed out.
    fn bank(&mut self) -> usize {
        let mut fds: Vec<RawFd> = self.queue.drain(..).collect();
        fds.sort_unstable();
        fds.dedup();
        let pivot = fds.partition_point(|&fd| fd <= self.cursor);
        let (low, high) = fds.split_at(pivot);
        self.queue.extend(high);
        self.queue.extend(low);
        self.queue.len()
    }

    fn next(&mut self) -> Option<RawFd> {
        let fd = self.queue.pop_front()?;
        self.cursor = fd;
        Some(fd)
    }

    fn purge(&mut self, fd: RawFd) { self.queue.retain(|&queued| queued != fd); }
}

/// A readiness multiplexer. See the [module docs](self).
pub struct Mux {
    poll: Poll,
    events: Events,
    registrations: BTreeMap<RawFd, Sets>,
    read: ReadySet,
    write: ReadySet,
    accept: ReadySet,
    urgent: ReadySet,
    signals: Option<Signals>,
    registered_signals: Vec<i32>,
    caught: SmallVec<[i32; 8]>,
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("registered", &self.registrations.len())
            .field("signals", &self.registered_signals)
            .finish_non_exhaustive()
    }
}

impl Mux {
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel polling object cannot be created.
    pub fn new() -> Result<Self, MuxError> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            registrations: BTreeMap::new(),
            read: ReadySet::default(),
            write: ReadySet::default(),
            accept: ReadySet::default(),
            urgent: ReadySet::default(),
            signals: None,
            registered_signals: Vec::new(),
            caught: SmallVec::new(),
        })
    }

    fn update(&mut self, fd: RawFd, mutate: impl FnOnce(&mut Sets)) -> Result<(), MuxError> {
        let mut sets = self.registrations.get(&fd).copied().unwrap_or_default();
        let was_registered = sets.any();
        mutate(&mut sets);

        match (was_registered, sets.interest()) {
            (false, Some(interest)) => {
                self.poll
                    .registry()
                    .register(&mut SourceFd(&fd), Token(fd as usize), interest)?;
                self.registrations.insert(fd, sets);
            }
            (true, Some(interest)) => {
                self.poll
                    .registry()
                    .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)?;
                self.registrations.insert(fd, sets);
            }
            (true, None) => {
                self.poll.registry().deregister(&mut SourceFd(&fd))?;
                self.registrations.remove(&fd);
            }
            (false, None) => {}
        }

        if !sets.read {
            self.read.purge(fd);
        }
        if !sets.write {
            self.write.purge(fd);
        }
        if !sets.accept {
            self.accept.purge(fd);
        }
        if !sets.urgent {
            self.urgent.purge(fd);
        }
        Ok(())
    }

    /// Registers `fd` for read readiness.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the registration.
    pub fn register_read(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.read = true)
    }

    /// Registers `fd` for write readiness.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the registration.
    pub fn register_write(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.write = true)
    }

    /// Registers a listening `fd` for accept readiness. Accept is its own
    /// capability: its descriptors surface through [`Mux::ready_accept`]
    /// only.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the registration.
    pub fn register_accept(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.accept = true)
    }

    /// Registers `fd` for urgent (out-of-band) readiness.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the registration.
    pub fn register_urgent(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.urgent = true)
    }

    /// Withdraws `fd` from the read set.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the change.
    pub fn unregister_read(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.read = false)
    }

    /// Withdraws `fd` from the write set.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the change.
    pub fn unregister_write(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.write = false)
    }

    /// Withdraws `fd` from the accept set.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the change.
    pub fn unregister_accept(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.accept = false)
    }

    /// Withdraws `fd` from the urgent set.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the kernel rejects the change.
    pub fn unregister_urgent(&mut self, fd: RawFd) -> Result<(), MuxError> {
        self.update(fd, |sets| sets.urgent = false)
    }

    /// Routes `signum` into the wait. See the [module docs](self).
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when the signal cannot be hooked.
    pub fn register_signal(&mut self, signum: i32) -> Result<(), MuxError> {
        match &mut self.signals {
            None => {
                let mut signals = Signals::new([signum])?;
                self.poll
                    .registry()
                    .register(&mut signals, TOKEN_SIGNALS, Interest::READABLE)?;
                self.signals = Some(signals);
            }
            Some(signals) => {
                signals.add_signal(signum)?;
            }
        }
        if !self.registered_signals.contains(&signum) {
            self.registered_signals.push(signum);
        }
        Ok(())
    }

    /// Stops routing `signum` into the wait. Returns whether it had been
    /// registered.
    pub fn unregister_signal(&mut self, signum: i32) -> bool {
        let position = self.registered_signals.iter().position(|&s| s == signum);
        match position {
            Some(index) => {
                self.registered_signals.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Waits for readiness. Negative `timeout` waits indefinitely, zero
    /// polls, positive bounds the wait in ticks.
    ///
    /// Returns the number of ready descriptors banked across the four sets -
    /// exactly the number of `ready_*` pops now available - or zero on
    /// timeout.
    ///
    /// # Errors
    ///
    /// [`MuxError::Interrupted`] when a signal arrived (registered or kick)
    /// and no descriptor was ready; any banked readiness is preferred over
    /// the interrupt and reported normally.
    pub fn wait(&mut self, timeout: Sticks) -> Result<usize, MuxError> {
        self.caught.clear();
        let timeout = if timeout < 0 {
            None
        } else {
            Some(ticks_to_duration(timeout as Ticks))
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                return Err(MuxError::Interrupted);
            }
            Err(error) => return Err(MuxError::Io(error)),
        }

        let mut harvested: SmallVec<[(usize, bool, bool, bool); 32]> = SmallVec::new();
        for event in self.events.iter() {
            harvested.push((
                event.token().0,
                event.is_readable(),
                event.is_writable(),
                event.is_priority(),
            ));
        }

        for (token, readable, writable, priority) in harvested {
            if Token(token) == TOKEN_SIGNALS {
                if let Some(signals) = &mut self.signals {
                    for signum in signals.pending() {
                        if self.registered_signals.contains(&signum) {
                            self.caught.push(signum);
                        }
                    }
                }
                continue;
            }
            let fd = token as RawFd;
            let Some(sets) = self.registrations.get(&fd).copied() else {
                continue;
            };
            if readable && sets.read {
                self.read.queue.push_back(fd);
            }
            if readable && sets.accept {
                self.accept.queue.push_back(fd);
            }
            if writable && sets.write {
                self.write.queue.push_back(fd);
            }
            if priority && sets.urgent {
                self.urgent.queue.push_back(fd);
            }
        }

        let total = self.read.bank() + self.write.bank() + self.accept.bank() + self.urgent.bank();
        if total == 0 && !self.caught.is_empty() {
            return Err(MuxError::Interrupted);
        }
        Ok(total)
    }

    /// The next read-ready descriptor from the last wait, or `None` when
    /// exhausted.
    pub fn ready_read(&mut self) -> Option<RawFd> { self.read.next() }

    /// The next write-ready descriptor from the last wait, or `None` when
    /// exhausted.
    pub fn ready_write(&mut self) -> Option<RawFd> { self.write.next() }

    /// The next accept-ready descriptor from the last wait, or `None` when
    /// exhausted.
    pub fn ready_accept(&mut self) -> Option<RawFd> { self.accept.next() }

    /// The next urgent-ready descriptor from the last wait, or `None` when
    /// exhausted.
    pub fn ready_urgent(&mut self) -> Option<RawFd> { self.urgent.next() }

    /// The signals caught by the last wait.
    #[must_use]
    pub fn caught(&self) -> &[i32] { &self.caught }

    /// Unregisters `fd` from every set and closes it. The multiplexer takes
    /// over the final reference to the descriptor.
    ///
    /// # Errors
    ///
    /// [`MuxError::Io`] when deregistration fails; the descriptor is closed
    /// regardless.
    pub fn close(&mut self, fd: RawFd) -> Result<(), MuxError> {
        let result = self.update(fd, |sets| *sets = Sets::default());
        // Safety: by contract the caller hands ownership of fd to close().
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
        result
    }

    /// The number of descriptors currently registered in any set.
    #[must_use]
    pub fn registered(&self) -> usize { self.registrations.len() }
}
