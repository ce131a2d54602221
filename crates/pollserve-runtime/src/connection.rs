//! Per-client connection context.
//!
//! A `Connection` owns its socket and both staging buffers, so dropping it
//! closes the descriptor and frees the buffers in one step. It is created
//! by `Server::accept` and lives in the server's connection table until
//! `Server::disconnect` or `Server::cleanup`.

use std::any::Any;
use std::net::SocketAddrV4;
use std::os::unix::io::RawFd;

use pollserve_core::{kerror, Fill, IoBuffer, ServeResult};

use crate::event::EventMask;
use crate::net::Socket;
use crate::server::Session;

/// Invoked for every ready event on a connection.
pub type ConnectionCallback<D> = fn(Session<'_, D>, EventMask, &mut D);

pub struct Connection<D> {
    /// Unique per server for its lifetime; descriptors get reused, ids don't.
    id: u64,
    socket: Socket,
    peer: SocketAddrV4,
    listener_addr: SocketAddrV4,
    /// Bytes received, waiting for the application.
    input: IoBuffer,
    /// Bytes staged by the application, waiting for the socket.
    output: IoBuffer,
    callback: ConnectionCallback<D>,
    status: u32,
    user_data: Option<Box<dyn Any>>,
}

impl<D> Connection<D> {
    /// Wrap an accepted socket, allocating both buffers at `buffer_size`.
    ///
    /// On allocation failure the socket is dropped, closing it.
    pub(crate) fn new(
        id: u64,
        socket: Socket,
        peer: SocketAddrV4,
        listener_addr: SocketAddrV4,
        buffer_size: usize,
        callback: ConnectionCallback<D>,
    ) -> ServeResult<Self> {
        let input = IoBuffer::with_capacity(buffer_size).map_err(|e| {
            kerror!("input buffer for fd {}: {}", socket.fd(), e);
            e
        })?;
        let output = IoBuffer::with_capacity(buffer_size).map_err(|e| {
            kerror!("output buffer for fd {}: {}", socket.fd(), e);
            e
        })?;

        Ok(Self {
            id,
            socket,
            peer,
            listener_addr,
            input,
            output,
            callback,
            status: 0,
            user_data: None,
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }

    pub fn peer_addr(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Address of the listener this connection arrived on.
    pub fn listener_addr(&self) -> SocketAddrV4 {
        self.listener_addr
    }

    pub fn input(&self) -> &IoBuffer {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut IoBuffer {
        &mut self.input
    }

    pub fn output(&self) -> &IoBuffer {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut IoBuffer {
        &mut self.output
    }

    pub fn callback(&self) -> ConnectionCallback<D> {
        self.callback
    }

    /// Replace the handler used from the next dispatch on.
    pub fn set_callback(&mut self, callback: ConnectionCallback<D>) {
        self.callback = callback;
    }

    /// Application-defined state tag; starts at 0.
    #[inline]
    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn set_status(&mut self, status: u32) {
        self.status = status;
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

    /// Stage bytes for sending. See `IoBuffer::append` for `allow_grow`.
    pub fn queue(&mut self, data: &[u8], allow_grow: bool) -> usize {
        self.output.append(data, allow_grow)
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Send as much staged output as the socket takes right now.
    pub fn flush(&mut self) -> ServeResult<usize> {
        self.output.flush_to(&mut self.socket)
    }

    /// Pull whatever the socket has into the input buffer.
    pub fn receive(&mut self) -> ServeResult<Fill> {
        self.input.fill_from(&mut self.socket)
    }
}

impl<D> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("fd", &self.fd())
            .field("peer", &self.peer)
            .field("status", &self.status)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    use pollserve_core::ServeError;

    use crate::net::tests::accept_within;
    use crate::net::Listener;

    fn ignore(_session: Session<'_, ()>, _events: EventMask, _data: &mut ()) {}

    fn pair(buffer_size: usize) -> (Connection<()>, TcpStream) {
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let client = TcpStream::connect(listener.local_addr()).unwrap();
        let (socket, peer) = accept_within(&listener, Duration::from_secs(2));
        socket.set_nonblocking().unwrap();
        let conn = Connection::new(1, socket, peer, listener.local_addr(), buffer_size, ignore).unwrap();
        (conn, client)
    }

    #[test]
    fn test_new_rejects_bad_buffer_size() {
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let _client = TcpStream::connect(listener.local_addr()).unwrap();
        let (socket, peer) = accept_within(&listener, Duration::from_secs(2));

        let err = Connection::<()>::new(1, socket, peer, listener.local_addr(), 1000, ignore).unwrap_err();
        assert_eq!(err, ServeError::InvalidCapacity(1000));
    }

    #[test]
    fn test_fresh_connection_state() {
        let (conn, client) = pair(64);
        assert_eq!(conn.status(), 0);
        assert!(conn.input().is_empty());
        assert_eq!(conn.output().capacity(), 64);
        assert!(!conn.has_pending_output());
        assert_eq!(conn.peer_addr(), match client.local_addr().unwrap() {
            std::net::SocketAddr::V4(a) => a,
            other => panic!("unexpected {}", other),
        });
    }

    #[test]
    fn test_queue_and_flush_reaches_peer() {
        let (mut conn, mut client) = pair(64);
        assert_eq!(conn.queue(b"hello", false), 5);
        assert!(conn.has_pending_output());
        assert_eq!(conn.flush().unwrap(), 5);
        assert!(!conn.has_pending_output());

        let mut got = [0u8; 5];
        client.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"hello");
    }

    #[test]
    fn test_receive_fills_input() {
        let (mut conn, mut client) = pair(64);
        assert_eq!(conn.receive().unwrap(), Fill::WouldBlock);

        client.write_all(b"abc").unwrap();
        let start = Instant::now();
        loop {
            match conn.receive().unwrap() {
                Fill::Read(n) => {
                    assert_eq!(n, 3);
                    break;
                }
                Fill::WouldBlock if start.elapsed() < Duration::from_secs(2) => {
                    std::thread::sleep(Duration::from_millis(2))
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        let mut buf = [0u8; 8];
        assert_eq!(conn.input_mut().read_into(&mut buf), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_user_data_and_status() {
        let (mut conn, _client) = pair(64);
        assert!(conn.user_data::<u64>().is_none());

        conn.set_user_data(41u64);
        *conn.user_data_mut::<u64>().unwrap() += 1;
        assert_eq!(conn.user_data::<u64>(), Some(&42));
        assert!(conn.user_data::<String>().is_none());

        conn.set_status(7);
        assert_eq!(conn.status(), 7);

        assert!(conn.take_user_data().is_some());
        assert!(conn.user_data::<u64>().is_none());
    }
}
