// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A size-class buffer allocator.
//!
//! Requests are hashed to the smallest power-of-two class (8 through 4096
//! bytes) whose payload fits; larger requests go to an exact-sized overflow
//! allocation. Each issued [`Buffer`] remembers its class and, on drop,
//! returns its block to that class's free list - never to another class, and
//! never to the heap while the pool lives (overflow blocks excepted).
//!
//! [`BufferPool`] is a cheap-to-clone handle; clones share one internally
//! synchronized pool. A process-global default sits behind [`global()`] /
//! [`install()`], and the free-standing [`alloc()`] goes through it. Pools
//! support [`prealloc`](BufferPool::prealloc) staging, a
//! [`nomalloc`](BufferPool::set_nomalloc) mode that turns class misses into
//! errors instead of heap traffic, a debug mode that traces every
//! allocate/release, and a [`log`](BufferPool::log) dump of per-class
//! counts.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// The power-of-two payload sizes, smallest to largest.
pub const CLASSES: [usize; 10] = [8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096];

/// Buffer allocation failures.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum BufferError {
    /// The class free list was empty and `nomalloc` forbids falling through
    /// to the heap.
    #[error("buffer pool exhausted for {bytes}-byte request")]
    #[diagnostic(
        code(linchpin::buffer::exhausted),
        help("Stage blocks with prealloc() or clear nomalloc to allow heap fallthrough.")
    )]
    Exhausted { bytes: usize },
}

/// Where an issued block goes back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    /// Index into [`CLASSES`]; the block is pooled.
    Sized(usize),
    /// Exact-sized heap block; released to the heap on drop.
    Overflow,
    /// The zero-size request; nothing to return.
    Empty,
}

/// Returns the index of the smallest class whose payload holds `size`, or
/// `None` when `size` exceeds the largest class (the overflow case).
#[must_use]
pub fn class_of(size: usize) -> Option<usize> {
    CLASSES.iter().position(|&payload| size <= payload)
}

#[derive(Debug, Default)]
struct ClassCounts {
    free: usize,
    issued: usize,
}

#[derive(Debug)]
struct PoolInner {
    free: [Vec<Box<[u8]>>; CLASSES.len()],
    counts: [ClassCounts; CLASSES.len()],
    overflow_issued: usize,
    nomalloc: bool,
    debug: bool,
}

/// A handle to a size-class buffer pool. Clones share the pool. See the
/// [module docs](self).
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl Default for BufferPool {
    fn default() -> Self { Self::new() }
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                free: std::array::from_fn(|_| Vec::new()),
                counts: std::array::from_fn(|_| ClassCounts::default()),
                overflow_issued: 0,
                nomalloc: false,
                debug: false,
            })),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a buffer of `size` bytes from this pool.
    ///
    /// A zero-size request yields an empty buffer; that is not an error.
    ///
    /// # Errors
    ///
    /// [`BufferError::Exhausted`] when `nomalloc` is set and no staged block
    /// can satisfy the request.
    pub fn alloc(&self, size: usize) -> Result<Buffer, BufferError> {
        if size == 0 {
            return Ok(Buffer {
                data: Vec::new().into_boxed_slice(),
                len: 0,
                class: Class::Empty,
                pool: self.clone(),
            });
        }

        let hashed = class_of(size);
        let mut inner = self.locked();
        let (data, class) = match hashed {
            Some(index) => match inner.free[index].pop() {
                Some(block) => {
                    inner.counts[index].free -= 1;
                    (block, Class::Sized(index))
                }
                None if inner.nomalloc => return Err(BufferError::Exhausted { bytes: size }),
                None => (
                    vec![0u8; CLASSES[index]].into_boxed_slice(),
                    Class::Sized(index),
                ),
            },
            None if inner.nomalloc => return Err(BufferError::Exhausted { bytes: size }),
            None => (vec![0u8; size].into_boxed_slice(), Class::Overflow),
        };
        match class {
            Class::Sized(index) => inner.counts[index].issued += 1,
            Class::Overflow => inner.overflow_issued += 1,
            Class::Empty => {}
        }
        if inner.debug {
            tracing::debug!(size, ?class, "buffer: alloc");
        }
        drop(inner);

        Ok(Buffer {
            data,
            len: size,
            class,
            pool: self.clone(),
        })
    }

    fn release(&self, data: Box<[u8]>, class: Class) {
        let mut inner = self.locked();
        if inner.debug {
            tracing::debug!(?class, "buffer: free");
        }
        match class {
            Class::Sized(index) => {
                inner.free[index].push(data);
                inner.counts[index].free += 1;
                inner.counts[index].issued -= 1;
            }
            Class::Overflow => {
                inner.overflow_issued -= 1;
                // Exact-sized block: back to the heap.
            }
            Class::Empty => {}
        }
    }

    /// Stages `count` blocks on the free list of class `index`.
    ///
    /// # Panics
    ///
    /// When `index` is not a valid [`CLASSES`] index.
    pub fn prealloc(&self, index: usize, count: usize) {
        let payload = CLASSES[index];
        let mut inner = self.locked();
        for _ in 0..count {
            inner.free[index].push(vec![0u8; payload].into_boxed_slice());
        }
        inner.counts[index].free += count;
    }

    /// When set, class misses and overflow requests fail with
    /// [`BufferError::Exhausted`] instead of reaching the heap.
    pub fn set_nomalloc(&self, nomalloc: bool) { self.locked().nomalloc = nomalloc; }

    /// When set, every allocate and release is traced at debug level.
    pub fn set_debug(&self, debug: bool) { self.locked().debug = debug; }

    /// Emits per-class free and issued counts through `tracing`.
    pub fn log(&self) {
        let inner = self.locked();
        for (index, payload) in CLASSES.iter().enumerate() {
            tracing::info!(
                payload,
                free = inner.counts[index].free,
                issued = inner.counts[index].issued,
                "buffer: class"
            );
        }
        tracing::info!(issued = inner.overflow_issued, "buffer: overflow");
    }

    /// (free, issued) counts for class `index`.
    #[must_use]
    pub fn counts(&self, index: usize) -> (usize, usize) {
        let inner = self.locked();
        (inner.counts[index].free, inner.counts[index].issued)
    }
}

/// A block issued by a [`BufferPool`]. Dereferences to the requested `size`
/// bytes; the underlying block may be larger (its class payload). Dropping
/// the buffer returns the block to its class.
pub struct Buffer {
    data: Box<[u8]>,
    len: usize,
    class: Class,
    pool: BufferPool,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl Buffer {
    /// The requested length.
    #[must_use]
    pub fn len(&self) -> usize { self.len }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// The underlying block size (the class payload, or the exact request
    /// for overflow allocations).
    #[must_use]
    pub fn capacity(&self) -> usize { self.data.len() }
}

impl Deref for Buffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] { &self.data[..self.len] }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] { &mut self.data[..self.len] }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.release(data, self.class);
    }
}

fn global_slot() -> &'static RwLock<BufferPool> {
    static GLOBAL: OnceLock<RwLock<BufferPool>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(BufferPool::new()))
}

/// The process-global default pool.
#[must_use]
pub fn global() -> BufferPool {
    global_slot()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Substitutes a caller-supplied pool as the process-global default.
/// Buffers already issued keep returning to the pool that issued them.
pub fn install(pool: BufferPool) {
    *global_slot()
        .write()
        .unwrap_or_else(PoisonError::into_inner) = pool;
}

/// Allocates from the process-global default pool.
///
/// # Errors
///
/// See [`BufferPool::alloc`].
pub fn alloc(size: usize) -> Result<Buffer, BufferError> { global().alloc(size) }
