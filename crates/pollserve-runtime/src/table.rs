//! Descriptor-keyed lookup table.
//!
//! Maps a live descriptor to the value that owns it. The kernel hands out
//! the lowest free descriptor, so keys are small dense integers and the
//! hasher is the identity.

use std::collections::hash_map::{Entry, HashMap};
use std::hash::{BuildHasherDefault, Hasher};
use std::os::unix::io::RawFd;

use pollserve_core::{ServeError, ServeResult};

use crate::connection::Connection;

/// Identity hasher for descriptor keys.
#[derive(Default, Clone, Copy)]
pub struct FdHasher(u64);

impl Hasher for FdHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        // Only reached for non-integer keys
        for &b in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(b);
        }
    }

    #[inline]
    fn write_i32(&mut self, fd: i32) {
        self.0 = fd as u32 as u64;
    }
}

pub struct FdTable<V> {
    map: HashMap<RawFd, V, BuildHasherDefault<FdHasher>>,
}

/// Table of live connections, owned by the server.
pub type ConnectionTable<D> = FdTable<Connection<D>>;

impl<V> FdTable<V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Insert `value` under `fd`.
    ///
    /// A key already present is left untouched and the new value is
    /// dropped; two live owners of one descriptor is never valid.
    pub fn insert(&mut self, fd: RawFd, value: V) -> ServeResult<&mut V> {
        match self.map.entry(fd) {
            Entry::Occupied(_) => Err(ServeError::DuplicateDescriptor(fd)),
            Entry::Vacant(slot) => Ok(slot.insert(value)),
        }
    }

    #[inline]
    pub fn get(&self, fd: RawFd) -> Option<&V> {
        self.map.get(&fd)
    }

    #[inline]
    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut V> {
        self.map.get_mut(&fd)
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<V> {
        self.map.remove(&fd)
    }

    #[inline]
    pub fn contains(&self, fd: RawFd) -> bool {
        self.map.contains_key(&fd)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (RawFd, &V)> + '_ {
        self.map.iter().map(|(fd, v)| (*fd, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.map.keys().copied()
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<V> std::fmt::Debug for FdTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdTable").field("len", &self.len()).finish()
    }
}
