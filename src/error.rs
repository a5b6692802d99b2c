//! Ambient error handling. Mirrors the teacher's `result::{LdapError, Result}`
//! pattern (referenced from `src/adapters.rs`, `src/sync.rs`) but scoped to
//! this crate's domain: fatal, local failures that never reach the wire as
//! an `LdapResult`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BER framing error: {0}")]
    Framing(&'static str),

    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("SASL error: {0}")]
    Sasl(String),

    #[error("connection table exhausted (capacity {0})")]
    TableFull(usize),

    #[error("DSE load error: {0}")]
    Dse(String),

    #[error("HAProxy header error: {0}")]
    HaProxy(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FrontendError>;
