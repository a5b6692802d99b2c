//! LDAPv3 directory server front-end: connection acceptance, BER framing,
//! bind processing, and operation dispatch to pluggable backend databases.
//!
//! This crate implements the connection-and-request core of a directory
//! server. It owns everything between "bytes arrive on a socket" and "a
//! decoded request reaches a backend, and its result is serialized back to
//! the wire" — schema, ACL, password policy, and the storage engines
//! themselves are plugged in through the traits in [`backend`].

#[macro_use]
extern crate lazy_static;

pub mod autobind;
pub mod backend;
pub mod ber;
pub mod bind;
pub mod config;
pub mod conn;
pub mod conntable;
pub mod dispatch;
pub mod dse;
pub mod error;
pub mod haproxy;
pub mod io_layer;
pub mod listener;
pub mod operation;
pub mod protocol;
pub mod psearch;
pub mod sasl;
pub mod time;
#[cfg(feature = "tls")]
pub mod tls_cert;
pub mod util;
pub mod workqueue;

pub use config::{AnonAccess, FrontendConfig};
pub use conn::{AuthState, Connection};
pub use conntable::ConnectionTable;
pub use error::{FrontendError, Result};
pub use operation::{Operation, OperationKind};
pub use protocol::result::{LdapResult, ResultCode};
pub use time::{ClockTick, Counters};
pub use util::{dn_escape, ldap_escape};
