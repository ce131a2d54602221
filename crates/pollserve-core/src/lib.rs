//! # pollserve-core
//!
//! Core types for the pollserve event loop.
//!
//! This crate is platform-agnostic and contains no socket code.
//! The readiness polling, listener and connection lifecycle live in
//! `pollserve-runtime`.
//!
//! ## Modules
//!
//! - `iobuf` - Growable power-of-two circular byte buffer
//! - `transport` - Byte sink/source trait used by buffer flush/fill
//! - `error` - Error taxonomy shared by every layer
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

pub mod iobuf;
pub mod transport;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use iobuf::IoBuffer;
pub use transport::{Fill, Transport};
pub use error::{ServeError, ServeResult};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Constants shared by the runtime and the embedding application
pub mod constants {
    /// Initial capacity of each connection buffer (power of two)
    pub const DEFAULT_BUFFER_SIZE: usize = 1024;

    /// Default bound on concurrently connected clients
    pub const DEFAULT_MAX_CLIENTS: usize = 1024;

    /// Default listen(2) backlog
    pub const DEFAULT_BACKLOG: i32 = 1024;

    /// Readiness wait timeout meaning "block until an event arrives"
    pub const BLOCK_INDEFINITELY: i32 = -1;

    /// Descriptor value marking an unused readiness slot
    pub const INVALID_FD: i32 = -1;
}
