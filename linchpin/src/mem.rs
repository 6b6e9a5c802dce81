// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Memory geometry glue: page size, cache-line size, and power-of-two
//! rounding. The [`Well`] and [`Buffer`] allocators size and align their
//! arenas with these.
//!
//! [`Well`]: crate::well::Well
//! [`Buffer`]: crate::buffer::Buffer

use std::sync::OnceLock;

/// Used when the cache line size cannot be discovered at runtime. 64 bytes is
/// correct for every mainstream x86-64 and AArch64 part.
pub const CACHE_LINE_FALLBACK: usize = 64;

/// Size of a virtual memory page in bytes.
#[must_use]
pub fn page_size() -> usize { rustix::param::page_size() }

/// Size of a level-1 data cache line in bytes, probed once and cached.
///
/// Falls back to [`CACHE_LINE_FALLBACK`] when the kernel does not export the
/// value (common on minimal container images).
#[must_use]
pub fn cache_line_size() -> usize {
    static CACHE_LINE: OnceLock<usize> = OnceLock::new();
    *CACHE_LINE.get_or_init(|| {
        // Safety: sysconf takes no pointers and has no preconditions.
        let probed = unsafe { libc::sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE) };
        if probed > 0 {
            (probed as usize).next_power_of_two()
        } else {
            CACHE_LINE_FALLBACK
        }
    })
}

#[must_use]
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

/// Rounds `value` up to the next multiple of `alignment`, which must be a
/// power of two.
#[must_use]
pub const fn round_up(value: usize, alignment: usize) -> usize {
    debug_assert!(is_power_of_two(alignment));
    (value + alignment - 1) & !(alignment - 1)
}
