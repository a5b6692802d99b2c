//! Component C4 (data model half): the per-connection state spec §3
//! describes. The slot/list machinery that stores these lives in
//! `conntable.rs`; this module is the `Connection` struct itself plus the
//! bind/auth state carried on it.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use crate::ber::Framer;
use crate::io_layer::IoLayers;
use crate::sasl::SaslExchange;

/// Authentication state reached by the bind processor (spec §4.8).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    Anonymous,
    Simple {
        dn: String,
    },
    SaslInProgress {
        mechanism: String,
    },
    Sasl {
        dn: String,
        mechanism: String,
    },
    SaslExternal {
        dn: String,
    },
}

impl AuthState {
    pub fn bound_dn(&self) -> Option<&str> {
        match self {
            AuthState::Simple { dn } | AuthState::Sasl { dn, .. } | AuthState::SaslExternal { dn } => Some(dn),
            AuthState::Anonymous | AuthState::SaslInProgress { .. } => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, AuthState::Anonymous)
    }
}

/// A connection's record of one still-running operation, enough to answer
/// "is this abandoned" and to route an abandon request to it (spec §4.7).
pub struct OperationHandle {
    pub msgid: i64,
    pub abandoned: AtomicBool,
}

/// All per-connection state (spec §3's data model).
pub struct Connection {
    pub connid: u64,
    pub fd: i32,
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub io: IoLayers,
    pub framer: Framer,
    /// Set while a partial PDU is buffered across poll cycles, i.e. we are
    /// mid-read on an operation and must not attempt to start a new one.
    pub getting_ber: bool,
    pub auth: AuthState,
    /// DN resolved from a local (AF_UNIX) peer credential autobind, if any;
    /// distinct from `auth` because it is set before any BIND is received.
    pub local_autobind_dn: Option<String>,
    pub needpw: bool,
    /// In-progress SASL server session, carried across separate
    /// `BindRequest`s that share a mechanism until it reports `Done` (spec's
    /// SASL_CONTINUE connection flag). Cleared by any non-SASL bind
    /// (`bind::clears_sasl_continue`).
    pub sasl_exchange: Option<SaslExchange>,
    pub ops_in_progress: VecDeque<OperationHandle>,
    pub refcount: AtomicU32,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub connected_at: Instant,
    /// Turbo mode: this worker keeps exclusive ownership of the connection
    /// across consecutive requests instead of returning it to the poll set
    /// (spec §9). Not `pub` outside this crate's workqueue.
    pub(crate) turbo: bool,
    pub closing: AtomicBool,
}

impl Connection {
    pub fn new(connid: u64, stream: TcpStream, remote_addr: SocketAddr, local_addr: SocketAddr) -> Connection {
        use std::os::unix::io::AsRawFd;
        let fd = stream.as_raw_fd();
        Connection {
            connid,
            fd,
            remote_addr,
            local_addr,
            io: IoLayers::plain(stream, 0),
            framer: Framer::new(),
            getting_ber: false,
            auth: AuthState::Anonymous,
            local_autobind_dn: None,
            needpw: false,
            sasl_exchange: None,
            ops_in_progress: VecDeque::new(),
            refcount: AtomicU32::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            connected_at: Instant::now(),
            turbo: false,
            closing: AtomicBool::new(false),
        }
    }

    pub fn effective_ssf(&self) -> u32 {
        self.io.effective_ssf()
    }

    /// Subject DN of the client's TLS certificate, if one was presented,
    /// for the SASL EXTERNAL bind fallback (spec §4.8).
    #[cfg(feature = "tls")]
    pub fn peer_cert_dn(&self) -> Option<String> {
        crate::tls_cert::subject_dn(self.io.peer_cert_der()?).ok()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::Relaxed);
    }

    pub fn acquire(&self) {
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Release one reference, returning the count remaining. The caller
    /// tears the connection down once this reaches zero and `is_closing()`
    /// is set (spec §4.7: refcounts protect in-flight operations from a
    /// concurrent teardown).
    pub fn release(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn begin_operation(&mut self, msgid: i64) {
        self.ops_in_progress.push_back(OperationHandle { msgid, abandoned: AtomicBool::new(false) });
    }

    pub fn end_operation(&mut self, msgid: i64) {
        self.ops_in_progress.retain(|op| op.msgid != msgid);
    }

    pub fn abandon_operation(&self, msgid: i64) -> bool {
        for op in &self.ops_in_progress {
            if op.msgid == msgid {
                op.abandoned.store(true, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    pub fn is_operation_abandoned(&self, msgid: i64) -> bool {
        self.ops_in_progress
            .iter()
            .find(|op| op.msgid == msgid)
            .map(|op| op.abandoned.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn test_conn() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        Connection::new(1, server, client.peer_addr().unwrap(), client.local_addr().unwrap())
    }

    #[test]
    fn new_connections_start_anonymous() {
        let conn = test_conn();
        assert!(conn.auth.is_anonymous());
        assert_eq!(conn.auth.bound_dn(), None);
    }

    #[test]
    fn abandon_marks_the_matching_operation_only() {
        let mut conn = test_conn();
        conn.begin_operation(1);
        conn.begin_operation(2);
        assert!(conn.abandon_operation(1));
        assert!(conn.is_operation_abandoned(1));
        assert!(!conn.is_operation_abandoned(2));
    }

    #[test]
    fn refcount_release_reaches_zero_after_matching_acquires() {
        let conn = test_conn();
        conn.acquire();
        conn.acquire();
        assert_eq!(conn.release(), 1);
        assert_eq!(conn.release(), 0);
    }
}
