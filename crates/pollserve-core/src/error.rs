//! Error types for pollserve

use core::fmt;

use nix::errno::Errno;

/// Result type for pollserve operations
pub type ServeResult<T> = Result<T, ServeError>;

/// Errors surfaced by buffers, the readiness set and the server lifecycle.
///
/// "Would block" is deliberately absent: a non-blocking transfer that
/// moves zero bytes is reported as a successful zero-length result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    /// Buffer allocation, growth or linearization failed
    OutOfMemory { requested: usize },

    /// Readiness set has no free slot
    CapacityExceeded { capacity: usize },

    /// Buffer capacity is zero or not a power of two
    InvalidCapacity(usize),

    /// Bind address is neither `A.B.C.D:PORT` nor a bare port
    InvalidAddress(String),

    /// Configuration rejected by validation
    InvalidConfig(&'static str),

    /// Descriptor already present in the connection table
    DuplicateDescriptor(i32),

    /// Descriptor has no connection
    UnknownDescriptor(i32),

    /// Server listener has been cleaned up
    NotBound,

    /// OS call failed
    Os { op: &'static str, errno: Errno },
}

impl ServeError {
    /// Build an `Os` error from the calling thread's current errno.
    pub fn last_os(op: &'static str) -> Self {
        ServeError::Os { op, errno: Errno::last() }
    }

    /// Errno of an `Os` error.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            ServeError::Os { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Allocation failure or a full readiness set.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            ServeError::OutOfMemory { .. } | ServeError::CapacityExceeded { .. } => true,
            ServeError::Os { errno, .. } => matches!(
                errno,
                Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM
            ),
            _ => false,
        }
    }

    /// Nothing pending on a non-blocking descriptor.
    pub fn is_would_block(&self) -> bool {
        self.errno() == Some(Errno::EAGAIN)
    }

    /// Conditions an accept loop should ride out instead of stopping.
    pub fn is_transient(&self) -> bool {
        if self.is_resource_exhaustion() {
            return true;
        }
        matches!(
            self.errno(),
            Some(Errno::EAGAIN | Errno::EINTR | Errno::ECONNABORTED)
        )
    }
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::OutOfMemory { requested } => {
                write!(f, "out of memory allocating {} bytes", requested)
            }
            ServeError::CapacityExceeded { capacity } => {
                write!(f, "readiness set full ({} descriptors)", capacity)
            }
            ServeError::InvalidCapacity(size) => {
                write!(f, "buffer capacity {} is not a power of two", size)
            }
            ServeError::InvalidAddress(addr) => write!(f, "invalid bind address {:?}", addr),
            ServeError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            ServeError::DuplicateDescriptor(fd) => {
                write!(f, "descriptor {} already has a connection", fd)
            }
            ServeError::UnknownDescriptor(fd) => write!(f, "descriptor {} has no connection", fd),
            ServeError::NotBound => write!(f, "server is not bound"),
            ServeError::Os { op, errno } => write!(f, "{}: {}", op, errno),
        }
    }
}

impl std::error::Error for ServeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ServeError::CapacityExceeded { capacity: 4 };
        assert_eq!(format!("{}", e), "readiness set full (4 descriptors)");

        let e = ServeError::InvalidAddress("nope".to_string());
        assert_eq!(format!("{}", e), "invalid bind address \"nope\"");

        let e = ServeError::Os { op: "accept", errno: Errno::EBADF };
        assert!(format!("{}", e).starts_with("accept: "));
    }

    #[test]
    fn test_classification() {
        assert!(ServeError::OutOfMemory { requested: 8 }.is_resource_exhaustion());
        assert!(ServeError::Os { op: "accept", errno: Errno::EMFILE }.is_transient());
        assert!(ServeError::Os { op: "accept", errno: Errno::EAGAIN }.is_transient());
        assert!(!ServeError::Os { op: "send", errno: Errno::EPIPE }.is_transient());
        assert!(!ServeError::NotBound.is_transient());
        assert!(ServeError::Os { op: "accept", errno: Errno::EAGAIN }.is_would_block());
        assert!(!ServeError::CapacityExceeded { capacity: 2 }.is_would_block());
        assert_eq!(ServeError::NotBound.errno(), None);
    }
}
