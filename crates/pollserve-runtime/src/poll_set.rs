//! `PollSet`, the readiness set handed to poll(2).
//!
//! A fixed-capacity array of `pollfd` entries. Registered entries are
//! always packed at the front (`fds[..polled]`), so the whole live range
//! goes to the kernel in one call and unused slots hold `INVALID_FD`.
//!
//! ```text
//!  fds: [ listener | conn | conn | conn | -1 | -1 | ... ]
//!         0          1 ..  polled-1       polled .. capacity-1
//! ```
//!
//! Removing an entry shifts the later ones left by one, preserving their
//! relative order. Iteration order is registration order after churn, not
//! accept order.

use pollserve_core::constants::{BLOCK_INDEFINITELY, INVALID_FD};
use pollserve_core::{ktrace, ServeError, ServeResult};

use nix::errno::Errno;

use std::os::unix::io::RawFd;

use crate::event::EventMask;

const UNUSED: libc::pollfd = libc::pollfd {
    fd: INVALID_FD,
    events: 0,
    revents: 0,
};

/// One registered descriptor as seen after the last wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEntry {
    pub fd: RawFd,
    pub interest: EventMask,
    pub result: EventMask,
}

pub struct PollSet {
    /// `capacity` slots; `fds[..polled]` are live.
    fds: Vec<libc::pollfd>,
    /// Number of registered descriptors.
    polled: usize,
    /// Wait timeout in milliseconds, -1 blocks indefinitely.
    timeout: i32,
}

impl PollSet {
    /// Create a set able to watch up to `capacity` descriptors.
    pub fn new(capacity: usize) -> ServeResult<Self> {
        if capacity == 0 {
            return Err(ServeError::InvalidConfig("poll set capacity must be at least 1"));
        }
        let mut fds = Vec::new();
        fds.try_reserve_exact(capacity).map_err(|_| ServeError::OutOfMemory {
            requested: capacity.saturating_mul(std::mem::size_of::<libc::pollfd>()),
        })?;
        fds.resize(capacity, UNUSED);

        Ok(Self {
            fds,
            polled: 0,
            timeout: BLOCK_INDEFINITELY,
        })
    }

    #[inline]
    pub fn registered(&self) -> usize {
        self.polled
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.fds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.polled == 0
    }

    #[inline]
    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    /// -1 blocks indefinitely, 0 polls without blocking.
    pub fn set_timeout(&mut self, timeout_ms: i32) {
        self.timeout = timeout_ms;
    }

    /// Index of `fd` among the registered entries.
    pub fn position(&self, fd: RawFd) -> Option<usize> {
        self.fds[..self.polled].iter().position(|p| p.fd == fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.position(fd).is_some()
    }

    /// Register `fd`, or replace its interest mask if already registered.
    ///
    /// An update clears any stale result flags. Fails only when `fd` is new
    /// and every slot is taken.
    pub fn add(&mut self, fd: RawFd, interest: EventMask) -> ServeResult<()> {
        debug_assert!(fd >= 0, "negative descriptor {}", fd);

        if let Some(idx) = self.position(fd) {
            let entry = &mut self.fds[idx];
            entry.events = interest.bits();
            entry.revents = 0;
            return Ok(());
        }

        if self.polled == self.capacity() {
            return Err(ServeError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }

        self.fds[self.polled] = libc::pollfd {
            fd,
            events: interest.bits(),
            revents: 0,
        };
        self.polled += 1;
        Ok(())
    }

    /// Deregister `fd`, packing later entries left. Does not close it.
    ///
    /// Returns whether `fd` was registered.
    pub fn remove(&mut self, fd: RawFd) -> bool {
        let Some(idx) = self.position(fd) else {
            return false;
        };

        self.fds.copy_within(idx + 1..self.polled, idx);
        self.polled -= 1;
        self.fds[self.polled] = UNUSED;
        true
    }

    /// Deregister everything.
    pub fn clear(&mut self) {
        self.fds[..self.polled].fill(UNUSED);
        self.polled = 0;
    }

    /// Block in poll(2) using the configured timeout.
    pub fn wait(&mut self) -> ServeResult<usize> {
        self.wait_timeout(self.timeout)
    }

    /// Block until a registered descriptor is ready or `timeout_ms` elapses.
    ///
    /// Returns the number of descriptors with non-zero results; `0` on
    /// timeout. A signal interrupting the wait is also reported as `0` so the
    /// caller's loop simply comes around again.
    pub fn wait_timeout(&mut self, timeout_ms: i32) -> ServeResult<usize> {
        let ret = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.polled as libc::nfds_t,
                timeout_ms,
            )
        };

        if ret < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                ktrace!("poll interrupted by signal");
                self.clear_results();
                return Ok(0);
            }
            return Err(ServeError::Os { op: "poll", errno });
        }
        Ok(ret as usize)
    }

    fn clear_results(&mut self) {
        for entry in &mut self.fds[..self.polled] {
            entry.revents = 0;
        }
    }

    /// Result flags of entry `idx` from the last wait.
    #[inline]
    pub fn result(&self, idx: usize) -> EventMask {
        if idx < self.polled {
            EventMask::from_bits(self.fds[idx].revents)
        } else {
            EventMask::empty()
        }
    }

    /// Whether every bit of `flag` was reported for entry `idx`.
    #[inline]
    pub fn has_flag(&self, idx: usize, flag: EventMask) -> bool {
        self.result(idx).contains(flag)
    }

    pub fn entry(&self, idx: usize) -> Option<PollEntry> {
        self.fds[..self.polled].get(idx).map(to_entry)
    }

    /// Registered entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = PollEntry> + '_ {
        self.fds[..self.polled].iter().map(to_entry)
    }
}

fn to_entry(p: &libc::pollfd) -> PollEntry {
    PollEntry {
        fd: p.fd,
        interest: EventMask::from_bits(p.events),
        result: EventMask::from_bits(p.revents),
    }
}

impl std::fmt::Debug for PollSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSet")
            .field("registered", &self.polled)
            .field("capacity", &self.capacity())
            .field("timeout", &self.timeout)
            .finish()
    }
}
