//! # TCP listener and connected sockets
//!
//! Thin libc wrappers that own their descriptor through `OwnedFd`, so
//! every early return closes whatever was already opened:
//!
//! ```ignore
//! let listener = Listener::bind("127.0.0.1:0", 128)?;
//! let (socket, peer) = listener.accept()?;
//! socket.set_nonblocking()?;
//! ```
//!
//! `Socket` implements `Transport`: sends never raise SIGPIPE, and
//! "would block" comes back as a zero-length result rather than an error.

use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use pollserve_core::{kdebug, kerror, Fill, ServeError, ServeResult, Transport};

use crate::addr::parse_bind_address;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SOCK_FLAGS: libc::c_int = libc::SOCK_CLOEXEC;
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

        unsafe fn sys_accept(fd: RawFd, addr: *mut libc::sockaddr, len: *mut libc::socklen_t) -> libc::c_int {
            libc::accept4(fd, addr, len, SOCK_FLAGS)
        }
    } else {
        const SOCK_FLAGS: libc::c_int = 0;
        const SEND_FLAGS: libc::c_int = 0;

        unsafe fn sys_accept(fd: RawFd, addr: *mut libc::sockaddr, len: *mut libc::socklen_t) -> libc::c_int {
            libc::accept(fd, addr, len)
        }
    }
}

/// Put `fd` into non-blocking mode, keeping its other status flags.
pub fn set_nonblocking(fd: RawFd) -> ServeResult<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|errno| ServeError::Os {
        op: "fcntl(F_GETFL)",
        errno,
    })?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|errno| ServeError::Os {
        op: "fcntl(F_SETFL)",
        errno,
    })?;
    Ok(())
}

fn to_sockaddr(addr: &SocketAddrV4) -> libc::sockaddr_in {
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
    sa
}

fn from_sockaddr(sa: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr)),
        u16::from_be(sa.sin_port),
    )
}

/// Check a libc return value, capturing errno on failure.
fn cvt(ret: libc::c_int, op: &'static str) -> ServeResult<libc::c_int> {
    if ret < 0 {
        Err(ServeError::last_os(op))
    } else {
        Ok(ret)
    }
}

/// A bound, listening, non-blocking IPv4 TCP socket.
pub struct Listener {
    fd: OwnedFd,
    addr: SocketAddrV4,
}

impl Listener {
    /// Parse `address` and listen on it.
    ///
    /// A malformed address fails before any descriptor is created.
    pub fn bind(address: &str, backlog: i32) -> ServeResult<Self> {
        let addr = parse_bind_address(address)?;
        Self::bind_addr(addr, backlog)
    }

    /// Socket setup: create, SO_REUSEADDR, bind, listen, O_NONBLOCK.
    pub fn bind_addr(addr: SocketAddrV4, backlog: i32) -> ServeResult<Self> {
        let raw = cvt(
            unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | SOCK_FLAGS, libc::IPPROTO_TCP) },
            "socket",
        )?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let opt: libc::c_int = 1;
        cvt(
            unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_REUSEADDR,
                    &opt as *const _ as *const libc::c_void,
                    mem::size_of_val(&opt) as libc::socklen_t,
                )
            },
            "setsockopt(SO_REUSEADDR)",
        )?;

        let sa = to_sockaddr(&addr);
        cvt(
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sa as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sa) as libc::socklen_t,
                )
            },
            "bind",
        )?;

        cvt(unsafe { libc::listen(fd.as_raw_fd(), backlog) }, "listen")?;
        set_nonblocking(fd.as_raw_fd())?;

        // Port 0 resolves to the kernel-chosen port here
        let mut bound: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&bound) as libc::socklen_t;
        cvt(
            unsafe {
                libc::getsockname(
                    fd.as_raw_fd(),
                    &mut bound as *mut _ as *mut libc::sockaddr,
                    &mut len,
                )
            },
            "getsockname",
        )?;

        let addr = from_sockaddr(&bound);
        kdebug!("listener fd {} bound to {}", fd.as_raw_fd(), addr);
        Ok(Self { fd, addr })
    }

    /// Accept one pending connection.
    ///
    /// With nothing pending this fails with `EAGAIN`, which
    /// `ServeError::is_transient` classifies as retryable.
    pub fn accept(&self) -> ServeResult<(Socket, SocketAddrV4)> {
        let mut peer: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&peer) as libc::socklen_t;
        let peer_ptr = &mut peer as *mut _ as *mut libc::sockaddr;

        let raw = loop {
            let ret = unsafe { sys_accept(self.fd.as_raw_fd(), peer_ptr, &mut len) };
            if ret >= 0 {
                break ret;
            }
            let errno = Errno::last();
            if errno != Errno::EINTR {
                return Err(ServeError::Os { op: "accept", errno });
            }
        };

        let socket = Socket {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        };
        Ok((socket, from_sockaddr(&peer)))
    }

    /// Bound address, with the real port when bound to port 0.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("fd", &self.fd())
            .field("addr", &self.addr)
            .finish()
    }
}

/// A connected TCP socket. Closed on drop.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
}

impl Socket {
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn set_nonblocking(&self) -> ServeResult<()> {
        set_nonblocking(self.fd())
    }

    fn sent(&self, ret: isize) -> ServeResult<Option<usize>> {
        if ret >= 0 {
            return Ok(Some(ret as usize));
        }
        match Errno::last() {
            Errno::EINTR => Ok(None),
            Errno::EAGAIN => Ok(Some(0)),
            errno => {
                kerror!("send on fd {} failed: {}", self.fd(), errno);
                Err(ServeError::Os { op: "send", errno })
            }
        }
    }
}

impl From<OwnedFd> for Socket {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl Transport for Socket {
    fn send(&mut self, buf: &[u8]) -> ServeResult<usize> {
        loop {
            let ret = unsafe {
                libc::send(
                    self.fd(),
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    SEND_FLAGS,
                )
            };
            if let Some(n) = self.sent(ret)? {
                return Ok(n);
            }
        }
    }

    /// One `sendmsg(2)` with two iovecs; no temporary copy.
    fn send_pair(&mut self, first: &[u8], second: &[u8]) -> ServeResult<usize> {
        let mut iov = [
            libc::iovec {
                iov_base: first.as_ptr() as *mut libc::c_void,
                iov_len: first.len(),
            },
            libc::iovec {
                iov_base: second.as_ptr() as *mut libc::c_void,
                iov_len: second.len(),
            },
        ];
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = iov.as_mut_ptr();
        msg.msg_iovlen = iov.len() as _;

        loop {
            let ret = unsafe { libc::sendmsg(self.fd(), &msg, SEND_FLAGS) };
            if let Some(n) = self.sent(ret)? {
                return Ok(n);
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> ServeResult<Fill> {
        loop {
            let ret = unsafe {
                libc::recv(
                    self.fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if ret > 0 {
                return Ok(Fill::Read(ret as usize));
            }
            if ret == 0 {
                return Ok(if buf.is_empty() { Fill::Read(0) } else { Fill::Closed });
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => return Ok(Fill::WouldBlock),
                errno => {
                    kerror!("recv on fd {} failed: {}", self.fd(), errno);
                    return Err(ServeError::Os { op: "recv", errno });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    /// Retry a non-blocking accept until the client's connect lands.
    pub(crate) fn accept_within(listener: &Listener, limit: Duration) -> (Socket, SocketAddrV4) {
        let start = Instant::now();
        loop {
            match listener.accept() {
                Ok(pair) => return pair,
                Err(e) if e.is_transient() && start.elapsed() < limit => {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => panic!("accept failed: {}", e),
            }
        }
    }

    #[test]
    fn test_bind_port_zero_resolves_port() {
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        assert_eq!(*listener.local_addr().ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.fd() >= 0);
    }

    #[test]
    fn test_bind_rejects_bad_address() {
        let err = Listener::bind("not-an-address", 16).unwrap_err();
        assert!(matches!(err, ServeError::InvalidAddress(_)));
    }

    #[test]
    fn test_accept_without_pending_is_transient() {
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EAGAIN));
        assert!(err.is_transient());
    }

    #[test]
    fn test_socket_transport_round_trip() {
        let listener = Listener::bind("127.0.0.1:0", 16).unwrap();
        let mut client = TcpStream::connect(listener.local_addr()).unwrap();
        let (mut socket, peer) = accept_within(&listener, Duration::from_secs(2));
        socket.set_nonblocking().unwrap();
        assert_eq!(peer.ip(), &Ipv4Addr::LOCALHOST);

        let mut buf = [0u8; 16];
        assert_eq!(socket.recv(&mut buf).unwrap(), Fill::WouldBlock);

        assert_eq!(socket.send_pair(b"hel", b"lo").unwrap(), 5);
        let mut got = [0u8; 5];
        client.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"hello");

        client.write_all(b"ping").unwrap();
        let start = Instant::now();
        let n = loop {
            match socket.recv(&mut buf).unwrap() {
                Fill::Read(n) => break n,
                Fill::WouldBlock if start.elapsed() < Duration::from_secs(2) => {
                    std::thread::sleep(Duration::from_millis(2))
                }
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(&buf[..n], b"ping");

        drop(client);
        let start = Instant::now();
        loop {
            match socket.recv(&mut buf).unwrap() {
                Fill::Closed => break,
                Fill::WouldBlock if start.elapsed() < Duration::from_secs(2) => {
                    std::thread::sleep(Duration::from_millis(2))
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
