// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words pselect setitimer SIGALRM

//! # linchpin
//!
//! User-space Linux systems primitives for **time-driven concurrent
//! control**: the toolbox an embedded-Linux application reaches for between
//! the kernel and its business logic.
//!
//! The crate is a stack; each layer only leans on the ones below it:
//!
//! | Layer | Module | Responsibility |
//! | :---- | :----- | :------------- |
//! | Time | [`tick`] | Integer ticks at a process-wide 1 GHz, clocks, deadlines, delay |
//! | Storage | [`ring`], [`pool`], [`well`], [`buffer`], [`mem`] | Intrusive rings, object pool, page-aligned well, size-class buffers |
//! | Exclusion | [`sync`] | Guard-scoped mutex; one-mutex-per-condition, broadcast-only signaling |
//! | Threads | [`thread`], [`sched`] | Lifecycle state machine, saturating notification, syscall kick, scheduling policy |
//! | Timers | [`timer`] | Dedicated-thread callbacks, race-free stop handshake, `setitimer`-style alarm |
//! | Control | [`modulator`], [`controller`] | Software PWM, fixed-point PID |
//! | I/O | [`mux`], [`fdmap`] | Readiness multiplexing with signal routing, fd-keyed state |
//!
//! # The canonical loop
//!
//! The pieces compose into a controller-in-the-loop application:
//!
//! ```text
//! sensor fd ──▶ Mux::wait ──▶ read ──▶ controller::control ──▶ Modulator::set
//!                                                                   │
//! actuator ◀── PwmSink ◀── Timer callback (10 kHz carrier) ◀────────┘
//! ```
//!
//! The sensor's descriptor registers with the [`mux`]; each readiness wakeup
//! produces one sample, one [`controller::control`] step, and (when the
//! output moved) one glitch-free [`modulator::Modulator::set`].
//!
//! # Design rules
//!
//! - **Integer time everywhere.** Ticks are nanoseconds; every feature rate
//!   is an integer divisor of the tick frequency. The control and allocator
//!   paths never touch floating point.
//! - **Broadcast, then re-check.** Conditions wake every waiter; waiters
//!   loop on predicates. Every state machine transition broadcasts.
//! - **Callbacks run outside locks.** Timer and modulator callbacks drop
//!   the owning lock before entering user code, so user code may re-enter
//!   the API (notably `stop`) without deadlocking.
//! - **Distinct non-error outcomes.** Timed-out, interrupted, and busy are
//!   not failures and are never logged as such; they are separate variants
//!   the caller can match on.
//! - **Errors carry diagnostics.** Failures are `thiserror` enums with
//!   `miette` codes and help text, logged with `tracing` at their origin.

// Attach sources.
pub mod buffer;
pub mod controller;
pub mod fdmap;
pub mod logging;
pub mod mem;
pub mod modulator;
pub mod mux;
pub mod pool;
pub mod ring;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod tick;
pub mod timer;
pub mod well;

// Re-export the working set at the crate root.
pub use buffer::{Buffer, BufferError, BufferPool};
pub use controller::{Gain, Parameters, State, control};
pub use fdmap::{FdMap, FdMapError};
pub use modulator::{Modulator, ModulatorError, PwmSink};
pub use mux::{Mux, MuxError};
pub use pool::Pool;
pub use ring::{Arena, AuditError, NodeId};
pub use sched::{Policy, Scheduler};
pub use sync::{Condition, Mutex, MutexGuard, SyncError, WaitOutcome};
pub use thread::{Lifecycle, Thread, ThreadCore, ThreadError, ThreadWaker};
pub use tick::{Deadline, Sticks, Ticks};
pub use timer::{Timer, TimerError, TimerState};
pub use well::{Well, WellError};
