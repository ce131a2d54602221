//! # pollserve-runtime
//!
//! Unix implementation of the pollserve event loop.
//!
//! This crate provides:
//! - Readiness set over poll(2) (`PollSet`) and its event flags (`EventMask`)
//! - IPv4 listener and non-blocking sockets
//! - Descriptor-keyed connection table
//! - Connection and server contexts with accept/disconnect/poll/cleanup
//! - Configuration with environment overrides

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod addr;
        pub mod config;
        pub mod connection;
        pub mod event;
        pub mod net;
        pub mod poll_set;
        pub mod server;
        pub mod table;
    } else {
        compile_error!("pollserve-runtime requires a Unix platform");
    }
}

// Re-exports
pub use addr::parse_bind_address;
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionCallback};
pub use event::EventMask;
pub use net::{Listener, Socket};
pub use poll_set::{PollEntry, PollSet};
pub use server::{Server, ServerCallback, Session};
pub use table::{ConnectionTable, FdTable};
