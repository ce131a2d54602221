//! Echo Server
//!
//! Single-threaded TCP echo server on the pollserve event loop.
//!
//! Usage:
//!     cargo build --release -p echo
//!     ./target/release/echo [address]
//!
//! `address` is `A.B.C.D:PORT` or a bare port (default 8080). Limits come
//! from `PSV_*` environment variables, e.g.
//!
//!     PSV_MAX_CLIENTS=4096 PSV_BUFFER_SIZE=4096 ./target/release/echo 9999
//!
//! Test with:
//!     echo "hello" | nc localhost 8080

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pollserve::prelude::*;
use pollserve::{env_is_set, kdebug, kerror, kinfo, kprintln};

// ── Connection status bits ──

/// Peer sent EOF; close once everything is echoed back.
const CLOSING: u32 = 1 << 0;
/// Readability is part of the registered interest.
const WATCH_READ: u32 = 1 << 1;
/// Writability is part of the registered interest.
const WATCH_WRITE: u32 = 1 << 2;
const WATCH_MASK: u32 = WATCH_READ | WATCH_WRITE;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

// ── Stats ──

#[derive(Default)]
struct Stats {
    accepts: u64,
    rejected: u64,
    recvs: u64,
    sends: u64,
    closes: u64,
    bytes_in: u64,
    bytes_out: u64,
    errors: u64,
}

impl Stats {
    fn print(&self, conns: usize, elapsed_secs: f64) {
        kprintln!(
            "[{:.1}s] conns={} accepts={} rejected={} recv={} send={} close={} bytes_in={} bytes_out={} err={}",
            elapsed_secs,
            conns,
            self.accepts, self.rejected, self.recvs, self.sends, self.closes,
            self.bytes_in, self.bytes_out, self.errors,
        );
    }
}

// ── Callbacks ──

fn on_listen(server: &mut Server<Stats>, events: EventMask, stats: &mut Stats) {
    if !events.is_readable() {
        return;
    }
    loop {
        match server.accept(on_client) {
            Ok(conn) => {
                conn.set_status(WATCH_READ | WATCH_WRITE);
                stats.accepts += 1;
            }
            Err(e) if e.is_would_block() => break,
            // The pending client was taken off the queue and closed
            Err(ServeError::CapacityExceeded { .. }) => stats.rejected += 1,
            Err(e) if e.is_transient() => {
                stats.errors += 1;
                break;
            }
            Err(e) => {
                kerror!("accept: {}", e);
                stats.errors += 1;
                break;
            }
        }
    }
}

fn on_client(mut conn: Session<'_, Stats>, events: EventMask, stats: &mut Stats) {
    if events.intersects(EventMask::ERROR | EventMask::INVALID) {
        stats.errors += 1;
        close(conn, stats);
        return;
    }

    if events.is_readable() && conn.status() & CLOSING == 0 {
        match conn.receive() {
            Ok(Fill::Read(0)) => {}
            Ok(Fill::Read(n)) => {
                stats.recvs += 1;
                stats.bytes_in += n as u64;
            }
            Ok(Fill::WouldBlock) => {}
            Ok(Fill::Closed) => {
                let status = conn.status() | CLOSING;
                conn.set_status(status);
            }
            Err(e) => {
                kdebug!("recv fd {}: {}", conn.fd(), e);
                stats.errors += 1;
                close(conn, stats);
                return;
            }
        }
    } else if events.is_closed() {
        let status = conn.status() | CLOSING;
        conn.set_status(status);
    }

    pump(&mut conn);

    if conn.has_pending_output() {
        match conn.flush() {
            Ok(0) => {}
            Ok(n) => {
                stats.sends += 1;
                stats.bytes_out += n as u64;
                pump(&mut conn);
            }
            Err(e) => {
                kdebug!("send fd {}: {}", conn.fd(), e);
                stats.errors += 1;
                close(conn, stats);
                return;
            }
        }
    }

    let backlog = conn.has_pending_output() || !conn.input().is_empty();
    if conn.status() & CLOSING != 0 && !backlog {
        close(conn, stats);
        return;
    }

    let wanted = wanted_watch(conn.status(), conn.input().is_full(), backlog);
    if wanted != conn.status() & WATCH_MASK && conn.set_interest(interest_for(wanted)).is_ok() {
        let status = (conn.status() & !WATCH_MASK) | wanted;
        conn.set_status(status);
    }
}

/// Interest bits a connection should hold.
///
/// Reading stops while the input buffer is full or after EOF, otherwise a
/// level-triggered readable event would fire on every wait with nothing to
/// take. Writability is watched only while something waits to go out.
fn wanted_watch(status: u32, input_full: bool, backlog: bool) -> u32 {
    let mut wanted = 0;
    if status & CLOSING == 0 && !input_full {
        wanted |= WATCH_READ;
    }
    if backlog {
        wanted |= WATCH_WRITE;
    }
    wanted
}

fn interest_for(watch: u32) -> EventMask {
    let mut interest = EventMask::HANGUP;
    if watch & WATCH_READ != 0 {
        interest |= EventMask::READABLE;
    }
    if watch & WATCH_WRITE != 0 {
        interest |= EventMask::WRITABLE;
    }
    interest
}

/// Move received bytes to the output buffer, as many as fit without growing.
fn pump(conn: &mut Connection<Stats>) {
    let mut chunk = [0u8; 4096];
    loop {
        let room = conn.output().available().min(chunk.len());
        if room == 0 {
            break;
        }
        let n = conn.input_mut().read_into(&mut chunk[..room]);
        if n == 0 {
            break;
        }
        conn.queue(&chunk[..n], false);
    }
}

fn close(conn: Session<'_, Stats>, stats: &mut Stats) {
    if conn.disconnect() {
        stats.closes += 1;
    }
}

// ── Main ──

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn main() {
    pollserve::init_logging();

    let address = std::env::args().nth(1).unwrap_or_else(|| "8080".to_string());

    let mut config = ServerConfig::from_env();
    if !env_is_set("PSV_POLL_TIMEOUT_MS") {
        // Wake up periodically for stats and shutdown checks
        config = config.poll_timeout_ms(1000);
    }

    // SIGINT/SIGTERM interrupt the wait; the loop then sees RUNNING cleared
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }

    let mut server = match Server::bind(&address, on_listen, config) {
        Ok(server) => server,
        Err(e) => {
            kerror!("echo: cannot listen on {}: {}", address, e);
            std::process::exit(1);
        }
    };
    kinfo!("echo: serving on {}", server.local_addr());

    let mut stats = Stats::default();
    let start = Instant::now();
    let mut last_print = start;

    let result = pollserve::serve(&mut server, &mut stats, |server, stats| {
        if last_print.elapsed() >= STATS_INTERVAL {
            stats.print(server.connections(), start.elapsed().as_secs_f64());
            last_print = Instant::now();
        }
        RUNNING.load(Ordering::Relaxed)
    });

    stats.print(server.connections(), start.elapsed().as_secs_f64());
    server.cleanup();

    if let Err(e) = result {
        kerror!("echo: event loop stopped: {}", e);
        std::process::exit(1);
    }
}
