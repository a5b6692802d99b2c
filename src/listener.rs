//! Component C5: the accept loop. Binds plain and (optionally) TLS
//! listeners, accepts connections, optionally peels off a PROXY protocol
//! header from a trusted source, and hands the new `Connection` to the
//! connection table before waking a worker.
//!
//! Grounded in `ldap/servers/slapd/daemon.c`'s `slapd_daemon` accept loop;
//! the teacher has no server-side listener to borrow from, so the thread
//! lifecycle (named thread, `AtomicBool` shutdown flag, join-on-stop) is
//! modeled after `time.rs`'s `ClockTick`, which already follows that shape.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::conn::Connection;
use crate::conntable::ConnectionTable;
use crate::haproxy::{self, TrustedProxies};
use crate::workqueue::{WorkItem, WorkQueue};

pub struct Listener {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind `addr` and spawn the accept loop. Every accepted connection is
    /// registered in `table` and a `WorkItem` for its slot is pushed to
    /// `queue` so a worker picks it up for its first read.
    pub fn spawn(
        addr: &str,
        table: Arc<ConnectionTable>,
        queue: Arc<WorkQueue>,
        trusted_proxies: Arc<TrustedProxies>,
        next_connid: Arc<AtomicU64>,
    ) -> std::io::Result<Listener> {
        let tcp = TcpListener::bind(addr)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_inner = shutdown.clone();
        let handle = thread::Builder::new()
            .name("ldap-listener".to_string())
            .spawn(move || accept_loop(tcp, table, queue, trusted_proxies, next_connid, shutdown_inner))
            .expect("failed to spawn listener thread");
        Ok(Listener { shutdown, handle: Some(handle) })
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    tcp: TcpListener,
    table: Arc<ConnectionTable>,
    queue: Arc<WorkQueue>,
    trusted_proxies: Arc<TrustedProxies>,
    next_connid: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
) {
    tcp.set_nonblocking(true).ok();
    while !shutdown.load(Ordering::Relaxed) {
        match tcp.accept() {
            Ok((stream, remote_addr)) => {
                stream.set_nonblocking(false).ok();
                stream.set_read_timeout(Some(std::time::Duration::from_secs(1))).ok();
                handle_accept(stream, remote_addr, &table, &queue, &trusted_proxies, &next_connid);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(_) => thread::sleep(std::time::Duration::from_millis(50)),
        }
    }
}

fn handle_accept(
    mut stream: TcpStream,
    remote_addr: std::net::SocketAddr,
    table: &Arc<ConnectionTable>,
    queue: &Arc<WorkQueue>,
    trusted_proxies: &Arc<TrustedProxies>,
    next_connid: &Arc<AtomicU64>,
) {
    use std::os::unix::io::AsRawFd;
    let fd = stream.as_raw_fd();
    let local_addr = match stream.local_addr() {
        Ok(a) => a,
        Err(_) => return,
    };

    let effective_remote = if trusted_proxies.is_trusted(remote_addr.ip()) {
        peek_proxy_header(&mut stream).map(|p| p.src).unwrap_or(remote_addr)
    } else {
        remote_addr
    };

    let connid = next_connid.fetch_add(1, Ordering::Relaxed);
    let conn = Connection::new(connid, stream, effective_remote, local_addr);
    match table.acquire_slot(fd, conn) {
        Ok(slot) => queue.push(WorkItem { slot }),
        Err(_) => {
            // Table full: the connection (and its fd) is simply dropped,
            // which closes the socket (spec §8 boundary case).
        }
    }
}

/// Peek (and consume) a PROXY header from a freshly-accepted, trusted
/// connection, before any BER framing starts.
fn peek_proxy_header(stream: &mut TcpStream) -> Option<haproxy::ProxiedAddr> {
    let mut buf = [0u8; 256];
    let n = stream.peek(&mut buf).ok()?;
    match haproxy::parse_header(&buf[..n]) {
        Ok((addr, consumed)) => {
            let mut discard = vec![0u8; consumed];
            stream.read_exact(&mut discard).ok()?;
            Some(addr)
        }
        Err(_) => None,
    }
}
