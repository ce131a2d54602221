//! Readiness flags as reported by poll(2).

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitmask of `POLL*` flags, used both as an interest set and as the
/// result set handed to callbacks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(libc::c_short);

impl EventMask {
    pub const READABLE: EventMask = EventMask(libc::POLLIN);
    pub const PRIORITY: EventMask = EventMask(libc::POLLPRI);
    pub const WRITABLE: EventMask = EventMask(libc::POLLOUT);
    /// Result-only: error condition on the descriptor
    pub const ERROR: EventMask = EventMask(libc::POLLERR);
    /// Result-only: peer hung up
    pub const HANGUP: EventMask = EventMask(libc::POLLHUP);
    /// Result-only: descriptor is not open
    pub const INVALID: EventMask = EventMask(libc::POLLNVAL);

    /// Listener interest: pending connections
    pub const LISTENER: EventMask = EventMask(libc::POLLIN | libc::POLLPRI);
    /// Interest registered for every accepted connection
    pub const CONNECTION: EventMask = EventMask(libc::POLLIN | libc::POLLOUT | libc::POLLHUP);

    #[inline]
    pub const fn empty() -> Self {
        EventMask(0)
    }

    #[inline]
    pub const fn from_bits(bits: libc::c_short) -> Self {
        EventMask(bits)
    }

    #[inline]
    pub const fn bits(self) -> libc::c_short {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Every flag in `other` is set.
    #[inline]
    pub const fn contains(self, other: EventMask) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Any flag in `other` is set.
    #[inline]
    pub const fn intersects(self, other: EventMask) -> bool {
        (self.0 & other.0) != 0
    }

    #[inline]
    pub const fn without(self, other: EventMask) -> Self {
        EventMask(self.0 & !other.0)
    }

    pub fn is_readable(self) -> bool {
        self.intersects(Self::READABLE | Self::PRIORITY)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Hangup, error or invalid descriptor.
    pub fn is_closed(self) -> bool {
        self.intersects(Self::HANGUP | Self::ERROR | Self::INVALID)
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventMask, &str); 6] = [
            (EventMask::READABLE, "READABLE"),
            (EventMask::PRIORITY, "PRIORITY"),
            (EventMask::WRITABLE, "WRITABLE"),
            (EventMask::ERROR, "ERROR"),
            (EventMask::HANGUP, "HANGUP"),
            (EventMask::INVALID, "INVALID"),
        ];

        if self.is_empty() {
            return write!(f, "EventMask(empty)");
        }
        write!(f, "EventMask(")?;
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_queries() {
        let mask = EventMask::READABLE | EventMask::HANGUP;
        assert!(mask.is_readable());
        assert!(mask.is_closed());
        assert!(!mask.is_writable());
        assert!(mask.contains(EventMask::HANGUP));
        assert!(!mask.contains(EventMask::CONNECTION));
        assert!(EventMask::CONNECTION.contains(mask));
        assert_eq!(mask.without(EventMask::HANGUP), EventMask::READABLE);
        assert!(EventMask::empty().is_empty());
    }

    #[test]
    fn test_debug_names() {
        let mask = EventMask::READABLE | EventMask::WRITABLE;
        assert_eq!(format!("{:?}", mask), "EventMask(READABLE | WRITABLE)");
        assert_eq!(format!("{:?}", EventMask::empty()), "EventMask(empty)");
    }
}
