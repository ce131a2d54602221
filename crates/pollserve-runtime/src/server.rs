//! Server context and the event loop.
//!
//! `Server` owns the listener, the readiness set and the connection table.
//! The listener is always entry 0 of the readiness set; connections follow
//! in registration order.
//!
//! ```text
//!  poll()
//!    wait ──► snapshot ready connections (fd, id, events)
//!         ──► listener callback   (may accept / disconnect)
//!         ──► connection callbacks, skipping any torn down meanwhile
//! ```
//!
//! Everything runs on the calling thread; `wait` is the only place it
//! blocks.

use std::any::Any;
use std::net::SocketAddrV4;
use std::ops::{Deref, DerefMut};
use std::os::unix::io::RawFd;

use pollserve_core::{kdebug, kerror, kinfo, ktrace, kwarn, ServeError, ServeResult};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionCallback};
use crate::event::EventMask;
use crate::net::Listener;
use crate::poll_set::PollSet;
use crate::table::ConnectionTable;

/// Invoked when the listener reports readiness.
pub type ServerCallback<D> = fn(&mut Server<D>, EventMask, &mut D);

/// A connection that was ready when the last wait returned.
#[derive(Debug, Clone, Copy)]
struct Ready {
    fd: RawFd,
    id: u64,
    events: EventMask,
}

pub struct Server<D> {
    config: ServerConfig,
    /// `None` once cleaned up.
    listener: Option<Listener>,
    local_addr: SocketAddrV4,
    polled: PollSet,
    connections: ConnectionTable<D>,
    callback: ServerCallback<D>,
    user_data: Option<Box<dyn Any>>,
    next_id: u64,
    /// Reused dispatch snapshot.
    ready: Vec<Ready>,
}

impl<D> Server<D> {
    /// Listen on `address` and register the listener for readiness.
    ///
    /// `address` is `"A.B.C.D:PORT"` or a bare port. Nothing stays open
    /// when any step fails.
    pub fn bind(address: &str, callback: ServerCallback<D>, config: ServerConfig) -> ServeResult<Self> {
        config.validate()?;

        let listener = Listener::bind(address, config.backlog).map_err(|e| {
            kerror!("bind {}: {}", address, e);
            e
        })?;

        let mut polled = PollSet::new(config.poll_capacity())?;
        polled.set_timeout(config.poll_timeout_ms);
        polled.add(listener.fd(), EventMask::LISTENER)?;

        let local_addr = listener.local_addr();
        kinfo!("listening on {} (max {} clients)", local_addr, config.max_clients);

        Ok(Self {
            connections: ConnectionTable::with_capacity(config.max_clients.min(1024)),
            config,
            listener: Some(listener),
            local_addr,
            polled,
            callback,
            user_data: None,
            next_id: 1,
            ready: Vec::new(),
        })
    }

    /// Accept one pending connection and register it.
    ///
    /// The new connection watches `EventMask::CONNECTION` and dispatches to
    /// `callback`. With nothing pending this returns a transient `EAGAIN`
    /// error, so listener callbacks typically loop until
    /// `ServeError::is_transient`.
    pub fn accept(&mut self, callback: ConnectionCallback<D>) -> ServeResult<&mut Connection<D>> {
        let listener = self.listener.as_ref().ok_or(ServeError::NotBound)?;

        let (socket, peer) = listener.accept().map_err(|e| {
            if !e.is_would_block() {
                kwarn!("accept: {}", e);
            }
            e
        })?;
        socket.set_nonblocking()?;
        let fd = socket.fd();

        if self.connections.contains(fd) {
            kerror!("accepted fd {} is already a live connection", fd);
            return Err(ServeError::DuplicateDescriptor(fd));
        }

        let conn = Connection::new(
            self.next_id,
            socket,
            peer,
            self.local_addr,
            self.config.buffer_size,
            callback,
        )?;

        if let Err(e) = self.polled.add(fd, EventMask::CONNECTION) {
            kwarn!("rejecting {} on fd {}: {}", peer, fd, e);
            return Err(e);
        }

        match self.connections.insert(fd, conn) {
            Ok(conn) => {
                self.next_id += 1;
                kdebug!("accepted fd {} from {}", fd, peer);
                Ok(conn)
            }
            Err(e) => {
                self.polled.remove(fd);
                kerror!("registering fd {}: {}", fd, e);
                Err(e)
            }
        }
    }

    /// Tear down the connection on `fd`: deregister it, close the socket
    /// and free its buffers.
    ///
    /// Returns `false` (and does nothing) if `fd` is not a live connection,
    /// so a second call for the same descriptor is harmless.
    pub fn disconnect(&mut self, fd: RawFd) -> bool {
        let Some(conn) = self.connections.remove(fd) else {
            ktrace!("disconnect: fd {} not connected", fd);
            return false;
        };
        self.polled.remove(fd);
        kdebug!("disconnected fd {} ({})", fd, conn.peer_addr());
        drop(conn);
        true
    }

    /// Replace the readiness interest of a live connection.
    pub fn set_interest(&mut self, fd: RawFd, interest: EventMask) -> ServeResult<()> {
        if !self.connections.contains(fd) {
            return Err(ServeError::UnknownDescriptor(fd));
        }
        self.polled.add(fd, interest)
    }

    /// Run one wait-and-dispatch round.
    ///
    /// Returns the number of ready descriptors, `0` on timeout or signal.
    /// Only a failed wait is an error; callbacks handle their own failures.
    pub fn poll(&mut self, data: &mut D) -> ServeResult<usize> {
        if self.listener.is_none() {
            return Err(ServeError::NotBound);
        }

        let ready = self.polled.wait().map_err(|e| {
            kerror!("poll: {}", e);
            e
        })?;
        if ready == 0 {
            return Ok(0);
        }

        let listener_events = self.polled.result(0);

        self.ready.clear();
        for entry in self.polled.iter().skip(1) {
            if entry.result.is_empty() {
                continue;
            }
            let conn = match self.connections.get(entry.fd) {
                Some(conn) => conn,
                None => panic!("fd {} is polled but has no connection", entry.fd),
            };
            self.ready.push(Ready {
                fd: entry.fd,
                id: conn.id(),
                events: entry.result,
            });
        }

        if !listener_events.is_empty() {
            ktrace!("dispatch listener {:?}", listener_events);
            let callback = self.callback;
            callback(self, listener_events, data);
        }

        let snapshot = std::mem::take(&mut self.ready);
        for r in &snapshot {
            // Torn down, or the descriptor now belongs to a newer connection
            let callback = match self.connections.get(r.fd) {
                Some(conn) if conn.id() == r.id => conn.callback(),
                _ => continue,
            };
            ktrace!("dispatch fd {} {:?}", r.fd, r.events);
            callback(Session { server: self, fd: r.fd }, r.events, data);
        }
        self.ready = snapshot;

        Ok(ready)
    }

    /// Close every connection and the listener and empty the readiness set.
    ///
    /// Connection callbacks are not invoked. Afterwards `poll` and `accept`
    /// fail with `NotBound`.
    pub fn cleanup(&mut self) {
        let count = self.connections.len();
        self.connections.clear();
        self.polled.clear();
        if self.listener.take().is_some() {
            kinfo!("closed listener {} and {} connection(s)", self.local_addr, count);
        }
    }

    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }

    /// Bound address, with the real port when bound to port 0.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn listener_fd(&self) -> Option<RawFd> {
        self.listener.as_ref().map(Listener::fd)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn poll_set(&self) -> &PollSet {
        &self.polled
    }

    /// -1 blocks indefinitely, 0 polls without blocking.
    pub fn set_timeout(&mut self, timeout_ms: i32) {
        self.polled.set_timeout(timeout_ms);
    }

    pub fn set_callback(&mut self, callback: ServerCallback<D>) {
        self.callback = callback;
    }

    pub fn connection(&self, fd: RawFd) -> Option<&Connection<D>> {
        self.connections.get(fd)
    }

    pub fn connection_mut(&mut self, fd: RawFd) -> Option<&mut Connection<D>> {
        self.connections.get_mut(fd)
    }

    /// Number of live connections.
    pub fn connections(&self) -> usize {
        self.connections.len()
    }

    /// Live connection descriptors, in no particular order.
    pub fn connection_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.connections.keys()
    }

    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref()
    }

    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut()
    }

    pub fn set_user_data<T: 'static>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn take_user_data(&mut self) -> Option<Box<dyn Any>> {
        self.user_data.take()
    }
}

impl<D> std::fmt::Debug for Server<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("bound", &self.is_bound())
            .field("connections", &self.connections.len())
            .field("polled", &self.polled)
            .finish()
    }
}

/// The ready connection plus the server that owns it, handed to a
/// connection callback.
///
/// Dereferences to the `Connection`.
///
/// # Panics
///
/// Dereferencing after the connection was removed through `server_mut()`
/// panics. Use `Session::disconnect` to end the connection instead.
pub struct Session<'a, D> {
    server: &'a mut Server<D>,
    fd: RawFd,
}

impl<'a, D> Session<'a, D> {
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn server(&self) -> &Server<D> {
        &*self.server
    }

    pub fn server_mut(&mut self) -> &mut Server<D> {
        &mut *self.server
    }

    pub fn is_connected(&self) -> bool {
        self.server.connections.contains(self.fd)
    }

    pub fn set_interest(&mut self, interest: EventMask) -> ServeResult<()> {
        self.server.set_interest(self.fd, interest)
    }

    /// End this connection.
    pub fn disconnect(self) -> bool {
        self.server.disconnect(self.fd)
    }
}

impl<'a, D> Deref for Session<'a, D> {
    type Target = Connection<D>;

    fn deref(&self) -> &Connection<D> {
        match self.server.connections.get(self.fd) {
            Some(conn) => conn,
            None => panic!("fd {} disconnected during its own callback", self.fd),
        }
    }
}

impl<'a, D> DerefMut for Session<'a, D> {
    fn deref_mut(&mut self) -> &mut Connection<D> {
        match self.server.connections.get_mut(self.fd) {
            Some(conn) => conn,
            None => panic!("fd {} disconnected during its own callback", self.fd),
        }
    }
}
