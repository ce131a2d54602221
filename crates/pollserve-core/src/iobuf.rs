//! `IoBuffer`: growable circular byte buffer.
//!
//! Stages bytes between a connection and the application without ever
//! blocking the event loop.
//!
//! # Layout
//!
//! ```text
//!  storage: [ size bytes, size = 2^k ]
//!  head: next write offset     tail: next read offset
//!  occupied = head - tail      index = offset & (size - 1)
//! ```
//!
//! Buffer is empty when head == tail, full when head - tail == size.
//!
//! Offsets are kept bounded instead of relying on integer wraparound:
//! once `tail` passes `size` both offsets drop by `size` (masked positions
//! are unchanged because size is a power of two), and a drained buffer
//! resets both to zero. So `tail < size` and `head < 2 * size` always hold.
//!
//! # Backpressure
//!
//! `append(.., false)` takes only what fits and reports the count; the
//! producer re-stages the remainder on a later ready event.
//! `append(.., true)` grows storage to the next power of two that holds
//! the occupied bytes plus the new ones.

use crate::error::{ServeError, ServeResult};
use crate::transport::{Fill, Transport};
use crate::{kdebug, kerror};

pub struct IoBuffer {
    /// Backing storage; `storage.len()` is the capacity.
    storage: Vec<u8>,
    /// Next write offset.
    head: usize,
    /// Next read offset.
    tail: usize,
}

/// Zero-filled storage, reporting allocation failure instead of aborting.
fn alloc_storage(size: usize) -> ServeResult<Vec<u8>> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(size)
        .map_err(|_| ServeError::OutOfMemory { requested: size })?;
    storage.resize(size, 0);
    Ok(storage)
}

impl IoBuffer {
    /// Allocate a buffer of `size` bytes. `size` must be a power of two.
    pub fn with_capacity(size: usize) -> ServeResult<Self> {
        if !size.is_power_of_two() {
            return Err(ServeError::InvalidCapacity(size));
        }
        Ok(Self {
            storage: alloc_storage(size)?,
            head: 0,
            tail: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.storage.len() - 1
    }

    /// Occupied bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.head - self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Free bytes.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Occupied bytes as up to two slices in logical order.
    ///
    /// The second slice is non-empty only when the data straddles the end
    /// of storage.
    pub fn segments(&self) -> (&[u8], &[u8]) {
        let len = self.len();
        if len == 0 {
            return (&[], &[]);
        }
        let size = self.capacity();
        let wtail = self.tail & self.mask();
        if wtail + len <= size {
            (&self.storage[wtail..wtail + len], &[])
        } else {
            let first = size - wtail;
            (&self.storage[wtail..], &self.storage[..len - first])
        }
    }

    /// Append `data`, returning how many bytes were taken.
    ///
    /// Zero when `data` is empty, when the buffer is full and may not grow,
    /// or when growth was needed but allocation failed (the buffer is then
    /// left untouched). With `allow_grow` the whole slice is always taken
    /// unless allocation fails.
    pub fn append(&mut self, data: &[u8], allow_grow: bool) -> usize {
        if data.is_empty() {
            return 0;
        }

        if self.available() < data.len() {
            if allow_grow {
                let wanted = self.len().saturating_add(data.len());
                if let Err(e) = self.grow(wanted) {
                    kerror!("buffer growth to {} bytes failed: {}", wanted, e);
                    return 0;
                }
            } else if self.is_full() {
                return 0;
            }
        }

        let count = data.len().min(self.available());
        let size = self.capacity();
        let whead = self.head & self.mask();

        // Free space is [whead, size) then [0, wtail) when wrapped
        let first = count.min(size - whead);
        self.storage[whead..whead + first].copy_from_slice(&data[..first]);
        self.storage[..count - first].copy_from_slice(&data[first..count]);

        self.head += count;
        count
    }

    /// Reallocate to the next power of two >= `min_size`, the smallest
    /// storage holding the occupied bytes plus the pending append.
    ///
    /// Sized from what is held, not from the old capacity: 2000 bytes into
    /// an empty 1024-byte buffer gives 2048, not 4096.
    ///
    /// Occupied bytes are copied to the front of the new storage, so the
    /// masked offsets are valid under the new mask.
    fn grow(&mut self, min_size: usize) -> ServeResult<()> {
        let new_size = min_size
            .checked_next_power_of_two()
            .ok_or(ServeError::OutOfMemory { requested: min_size })?;
        let mut storage = alloc_storage(new_size)?;

        let len = self.len();
        let (a, b) = self.segments();
        storage[..a.len()].copy_from_slice(a);
        storage[a.len()..len].copy_from_slice(b);

        kdebug!("buffer grown {} -> {} bytes", self.capacity(), new_size);
        self.storage = storage;
        self.tail = 0;
        self.head = len;
        Ok(())
    }

    /// Drop up to `count` bytes from the read side. Returns bytes dropped.
    pub fn consume(&mut self, count: usize) -> usize {
        let count = count.min(self.len());
        self.tail += count;
        self.normalize();
        count
    }

    fn normalize(&mut self) {
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        } else if self.tail >= self.capacity() {
            self.tail -= self.capacity();
            self.head -= self.capacity();
        }
    }

    /// Copy bytes out into `dst` and consume them.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let (a, b) = self.segments();
        let from_a = a.len().min(dst.len());
        dst[..from_a].copy_from_slice(&a[..from_a]);
        let from_b = b.len().min(dst.len() - from_a);
        dst[from_a..from_a + from_b].copy_from_slice(&b[..from_b]);
        self.consume(from_a + from_b)
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Send occupied bytes to `transport`, advancing `tail` by exactly
    /// what it accepted.
    ///
    /// An empty buffer is a no-op returning `Ok(0)`. A transport that would
    /// block also yields `Ok(0)` (or a short count); the caller retries on
    /// the next writable event.
    pub fn flush_to<T: Transport + ?Sized>(&mut self, transport: &mut T) -> ServeResult<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let len = self.len();
        let (a, b) = self.segments();
        let sent = if b.is_empty() {
            transport.send(a)?
        } else {
            transport.send_pair(a, b)?
        };

        debug_assert!(sent <= len, "transport accepted more than offered");
        Ok(self.consume(sent))
    }

    /// Receive from `transport` into free space without blocking.
    ///
    /// Fills the contiguous free run at `head`, then the wrapped run at the
    /// front of storage if the first was filled completely. Returns
    /// `Fill::Read(0)` only when the buffer is already full.
    pub fn fill_from<T: Transport + ?Sized>(&mut self, transport: &mut T) -> ServeResult<Fill> {
        let mut total = 0;

        for _ in 0..2 {
            let free = self.available();
            if free == 0 {
                break;
            }
            let whead = self.head & self.mask();
            let span = free.min(self.capacity() - whead);

            match transport.recv(&mut self.storage[whead..whead + span]) {
                Ok(Fill::Read(n)) => {
                    self.head += n;
                    total += n;
                    if n < span {
                        break;
                    }
                }
                Ok(other) if total == 0 => return Ok(other),
                Ok(_) => break,
                // Bytes already staged win; the error resurfaces next call
                Err(_) if total > 0 => break,
                Err(e) => return Err(e),
            }
        }

        Ok(Fill::Read(total))
    }
}

impl std::fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish()
    }
}
