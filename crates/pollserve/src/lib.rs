//! # pollserve - single-threaded poll(2) TCP event loop
//!
//! A listener, a bounded set of non-blocking connections, and one thread
//! that waits on all of them and hands ready events to plain function
//! callbacks. Each connection stages bytes in a pair of growable circular
//! buffers so callbacks never block.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pollserve::prelude::*;
//!
//! fn on_listen(server: &mut Server<()>, events: EventMask, _: &mut ()) {
//!     if events.is_readable() {
//!         while server.accept(on_client).is_ok() {}
//!     }
//! }
//!
//! fn on_client(mut conn: Session<'_, ()>, events: EventMask, _: &mut ()) {
//!     if events.is_closed() {
//!         conn.disconnect();
//!         return;
//!     }
//!     if events.is_readable() && matches!(conn.receive(), Ok(Fill::Closed) | Err(_)) {
//!         conn.disconnect();
//!     }
//! }
//!
//! fn main() -> ServeResult<()> {
//!     let mut server = Server::bind("8080", on_listen, ServerConfig::from_env())?;
//!     pollserve::serve(&mut server, &mut (), |_, _| true)
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Application callbacks                     │
//! │        ServerCallback (listener)  ConnectionCallback        │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ dispatch
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Server::poll                              │
//! │     PollSet (poll(2))   ConnectionTable (fd → Connection)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌───────────┐                          ┌─────────────┐
//!    │ Listener  │                          │ Connection  │
//!    │           │                          │ in/out      │
//!    │           │                          │ IoBuffer    │
//!    └───────────┘                          └─────────────┘
//! ```

// Re-export core types
pub use pollserve_core::{
    constants,
    Fill,
    IoBuffer,
    ServeError,
    ServeResult,
    Transport,
};

// Re-export kprint macros for logging
pub use pollserve_core::{kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use pollserve_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use pollserve_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use pollserve_runtime::{
    parse_bind_address,
    Connection,
    ConnectionCallback,
    EventMask,
    PollSet,
    Server,
    ServerCallback,
    ServerConfig,
    Session,
};

/// Run `server.poll` until `keep_running` returns false.
///
/// The predicate is checked before every round, so a poll timeout in the
/// server config bounds how long a stop request can go unnoticed. A failed
/// wait ends the loop with that error; the server is left bound so the
/// caller decides whether to retry or `cleanup`.
pub fn serve<D, F>(server: &mut Server<D>, data: &mut D, mut keep_running: F) -> ServeResult<()>
where
    F: FnMut(&Server<D>, &D) -> bool,
{
    while keep_running(&*server, &*data) {
        server.poll(data)?;
    }
    Ok(())
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        serve,
        Connection,
        EventMask,
        Fill,
        IoBuffer,
        ServeError,
        ServeResult,
        Server,
        ServerConfig,
        Session,
    };
}
