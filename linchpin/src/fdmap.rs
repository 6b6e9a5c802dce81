// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A dense map keyed by file descriptor.
//!
//! Event loops driven by the [`Mux`](crate::mux::Mux) need per-descriptor
//! state with O(1) lookup; since descriptors are small dense integers
//! bounded by the process descriptor limit, a flat slot table beats a hash
//! map. [`FdMap::new`] sizes the table from `RLIMIT_NOFILE`.

use std::os::fd::RawFd;

/// Fd-keyed failures.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum FdMapError {
    /// The descriptor is negative or at/above the map's capacity.
    #[error("descriptor {fd} is outside the map's range of {capacity}")]
    #[diagnostic(code(linchpin::fdmap::out_of_range))]
    OutOfRange { fd: RawFd, capacity: usize },
}

/// A dense `RawFd -> T` map. See the [module docs](self).
#[derive(Debug)]
pub struct FdMap<T> {
    slots: Vec<Option<T>>,
    occupied: usize,
}

/// The soft process descriptor limit, or a conservative fallback when the
/// kernel will not say.
#[must_use]
pub fn descriptor_limit() -> usize {
    let limit = rustix::process::getrlimit(rustix::process::Resource::Nofile);
    limit
        .current
        .and_then(|current| usize::try_from(current).ok())
        .unwrap_or(1024)
}

impl<T> FdMap<T> {
    /// A map covering every descriptor the process can currently open.
    #[must_use]
    pub fn new() -> Self { Self::with_capacity(descriptor_limit()) }

    /// A map covering descriptors `0..capacity`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, occupied: 0 }
    }

    fn index(&self, fd: RawFd) -> Result<usize, FdMapError> {
        usize::try_from(fd)
            .ok()
            .filter(|&index| index < self.slots.len())
            .ok_or(FdMapError::OutOfRange {
                fd,
                capacity: self.slots.len(),
            })
    }

    /// Associates `value` with `fd`, returning the previous association.
    ///
    /// # Errors
    ///
    /// [`FdMapError::OutOfRange`] when `fd` does not fit the map.
    pub fn insert(&mut self, fd: RawFd, value: T) -> Result<Option<T>, FdMapError> {
        let index = self.index(fd)?;
        let previous = self.slots[index].replace(value);
        if previous.is_none() {
            self.occupied += 1;
        }
        Ok(previous)
    }

    #[must_use]
    pub fn get(&self, fd: RawFd) -> Option<&T> {
        self.index(fd).ok().and_then(|index| self.slots[index].as_ref())
    }

    #[must_use]
    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut T> {
        self.index(fd)
            .ok()
            .and_then(|index| self.slots[index].as_mut())
    }

    /// Removes and returns the association for `fd`.
    pub fn remove(&mut self, fd: RawFd) -> Option<T> {
        let index = self.index(fd).ok()?;
        let removed = self.slots[index].take();
        if removed.is_some() {
            self.occupied -= 1;
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, fd: RawFd) -> bool { self.get(fd).is_some() }

    /// The number of descriptors with an association.
    #[must_use]
    pub fn len(&self) -> usize { self.occupied }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.occupied == 0 }

    /// The highest descriptor the map can hold, plus one.
    #[must_use]
    pub fn capacity(&self) -> usize { self.slots.len() }

    /// Iterates the occupied `(fd, value)` pairs in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = (RawFd, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index as RawFd, value)))
    }
}

impl<T> Default for FdMap<T> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sized_from_the_descriptor_limit() {
        let map: FdMap<u8> = FdMap::new();
        assert!(map.capacity() >= 64);
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_get_remove() {
        let mut map = FdMap::with_capacity(8);
        assert_eq!(map.insert(3, "three").unwrap(), None);
        assert_eq!(map.insert(3, "still three").unwrap(), Some("three"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(3), Some(&"still three"));
        assert_eq!(map.remove(3), Some("still three"));
        assert_eq!(map.remove(3), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_out_of_range_descriptors_are_rejected() {
        let mut map = FdMap::with_capacity(4);
        assert!(matches!(
            map.insert(-1, ()),
            Err(FdMapError::OutOfRange { fd: -1, .. })
        ));
        assert!(matches!(
            map.insert(4, ()),
            Err(FdMapError::OutOfRange { fd: 4, .. })
        ));
        assert_eq!(map.get(99), None);
        assert_eq!(map.remove(99), None);
    }

    #[test]
    fn test_iteration_is_in_descriptor_order() {
        let mut map = FdMap::with_capacity(16);
        map.insert(9, 'c').unwrap();
        map.insert(1, 'a').unwrap();
        map.insert(4, 'b').unwrap();
        let pairs: Vec<_> = map.iter().collect();
        assert_eq!(pairs, vec![(1, &'a'), (4, &'b'), (9, &'c')]);
    }
}
