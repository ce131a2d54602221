//! Byte transport abstraction.
//!
//! A `Transport` is whatever an `IoBuffer` flushes into or fills from.
//!
//! # Implementors
//!
//! - `Socket` (pollserve-runtime): a non-blocking connected TCP socket.
//!   `send_pair` maps to a single `sendmsg(2)` with two iovecs.
//! - In-memory loopbacks in tests.
//!
//! **Contract:** no method may block. A transport that cannot accept or
//! produce bytes right now reports `Ok(0)` from `send` and
//! `Ok(Fill::WouldBlock)` from `recv`; errors are reserved for a broken
//! connection.

use crate::error::{ServeError, ServeResult};

/// Outcome of a non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Bytes were received. Zero only when the destination had no room.
    Read(usize),
    /// Nothing available right now; retry on the next readable event.
    WouldBlock,
    /// Peer performed an orderly shutdown.
    Closed,
}

/// Non-blocking byte sink and source.
pub trait Transport {
    /// Send as much of `buf` as the transport accepts.
    ///
    /// Returns the number of bytes taken, `0` if it would block.
    fn send(&mut self, buf: &[u8]) -> ServeResult<usize>;

    /// Send `first` followed by `second` as one logical write.
    ///
    /// The default linearizes into a temporary buffer so a single `send`
    /// is issued. Failure to allocate it is an error, never a silent drop.
    fn send_pair(&mut self, first: &[u8], second: &[u8]) -> ServeResult<usize> {
        if second.is_empty() {
            return self.send(first);
        }
        let total = first.len() + second.len();
        let mut linear = Vec::new();
        linear
            .try_reserve_exact(total)
            .map_err(|_| ServeError::OutOfMemory { requested: total })?;
        linear.extend_from_slice(first);
        linear.extend_from_slice(second);
        self.send(&linear)
    }

    /// Receive into `buf` without blocking.
    fn recv(&mut self, buf: &mut [u8]) -> ServeResult<Fill>;
}
