// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A fixed-capacity slot allocator backed by one contiguous page-aligned
//! arena.
//!
//! A well is carved into `slots` equally-sized slots at construction, each
//! aligned to a caller-chosen power of two (never less than a cache line, so
//! objects in adjacent slots do not false-share). Slot bookkeeping threads
//! one [ring](crate::ring) node per slot between a free ring and an in-use
//! ring, so allocation and release are O(1) with zero per-operation heap
//! traffic.
//!
//! Allocation returns `None` on exhaustion. Release validates that the
//! pointer lies inside the arena on a slot boundary and rejects it with
//! [`WellError::InvalidPointer`] otherwise.
//!
//! The well is **not** internally synchronized; callers that share one must
//! provide their own mutual exclusion.

use crate::mem;
use crate::ring::{Arena, NodeId};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

/// Well construction and release failures.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum WellError {
    /// Slot size, slot count, or alignment was unusable.
    #[error("invalid well geometry: {reason}")]
    #[diagnostic(code(linchpin::well::invalid_geometry))]
    InvalidGeometry { reason: &'static str },

    /// The backing arena could not be allocated.
    #[error("well arena allocation of {bytes} bytes failed")]
    #[diagnostic(
        code(linchpin::well::out_of_memory),
        help("The well allocates its whole arena up front - reduce the slot count or size.")
    )]
    OutOfMemory { bytes: usize },

    /// The released pointer is not an in-use slot of this well.
    #[error("pointer does not address an in-use slot of this well")]
    #[diagnostic(code(linchpin::well::invalid_pointer))]
    InvalidPointer,
}

/// A page-aligned, fixed-capacity slot allocator. See the [module
/// docs](self).
#[derive(Debug)]
pub struct Well {
    base: NonNull<u8>,
    layout: Layout,
    slot_size: usize,
    capacity: usize,
    links: Arena<usize>,
    free: NodeId,
    used: NodeId,
    /// Per-slot: the ring node carrying this slot's index, and whether the
    /// slot is currently issued.
    slots: Vec<(NodeId, bool)>,
}

// Safety: the well exclusively owns the arena it points into; nothing else
// aliases it, and all access is through &mut self.
unsafe impl Send for Well {}

impl Well {
    /// Builds a well of `slots` slots of `slot_size` bytes, each aligned to
    /// `alignment` (a power of two; values below the cache line size are
    /// raised to it). The arena itself is page-aligned.
    pub fn new(slot_size: usize, slots: usize, alignment: usize) -> Result<Self, WellError> {
        if slot_size == 0 || slots == 0 {
            return Err(WellError::InvalidGeometry {
                reason: "slot size and slot count must be nonzero",
            });
        }
        if !mem::is_power_of_two(alignment) {
            return Err(WellError::InvalidGeometry {
                reason: "alignment must be a power of two",
            });
        }

        let alignment = alignment.max(mem::cache_line_size());
        let aligned_slot = mem::round_up(slot_size, alignment);
        let bytes = aligned_slot
            .checked_mul(slots)
            .ok_or(WellError::InvalidGeometry {
                reason: "arena size overflows",
            })?;
        let layout = Layout::from_size_align(bytes, mem::page_size())
            .map_err(|_| WellError::InvalidGeometry {
                reason: "arena layout is unrepresentable",
            })?;

        // Safety: layout has nonzero size (checked above).
        let raw = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(WellError::OutOfMemory { bytes })?;

        let mut links = Arena::with_capacity(slots + 2);
        let free = links.ring();
        let used = links.ring();
        let mut slot_nodes = Vec::with_capacity(slots);
        for index in 0..slots {
            let node = links.node(index);
            links.enqueue(free, node);
            slot_nodes.push((node, false));
        }

        Ok(Self {
            base,
            layout,
            slot_size: aligned_slot,
            capacity: slots,
            links,
            free,
            used,
            slots: slot_nodes,
        })
    }

    /// Issues a free slot, or `None` when the well is dry.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let node = self.links.dequeue(self.free)?;
        let index = *self.links.data(node).expect("well: slot node without index");
        self.links.enqueue(self.used, node);
        self.slots[index].1 = true;
        // Safety: index < capacity, so the offset stays inside the arena.
        let p = unsafe { self.base.as_ptr().add(index * self.slot_size) };
        NonNull::new(p)
    }

    /// Returns a slot to the well.
    ///
    /// # Errors
    ///
    /// [`WellError::InvalidPointer`] when `pointer` is outside the arena, not
    /// on a slot boundary, or not currently issued.
    pub fn free(&mut self, pointer: NonNull<u8>) -> Result<(), WellError> {
        let offset = (pointer.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        if offset >= self.capacity * self.slot_size || offset % self.slot_size != 0 {
            return Err(WellError::InvalidPointer);
        }
        let index = offset / self.slot_size;
        let (node, in_use) = self.slots[index];
        if !in_use {
            return Err(WellError::InvalidPointer);
        }
        self.links.remove(node);
        self.links.enqueue(self.free, node);
        self.slots[index].1 = false;
        Ok(())
    }

    /// The fixed number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    /// The byte stride between slots (slot size rounded up to the alignment).
    #[must_use]
    pub fn slot_size(&self) -> usize { self.slot_size }

    /// Slots currently available.
    #[must_use]
    pub fn available(&self) -> usize { self.links.len(self.free) }

    /// Slots currently issued.
    #[must_use]
    pub fn in_use(&self) -> usize { self.links.len(self.used) }
}

impl Drop for Well {
    fn drop(&mut self) {
        // Safety: base was produced by alloc_zeroed with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}
