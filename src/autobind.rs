//! Local-socket autobind: a connection accepted on an AF_UNIX listener can
//! resolve its peer's UID via `SO_PEERCRED` and treat that as an implicit
//! prior authentication, skipping the usual `BIND` for local admin tools
//! (`original_source/.../connection.c`'s `ldapi` auto-bind feature, not
//! named as a distinct module in spec.md but implied by spec §3's
//! `local_autobind_dn` field).
//!
//! Uses `nix`'s socket/uio/user feature set (already a teacher dependency,
//! per its `Cargo.toml`) rather than hand-rolling the `getsockopt(2)` call.

use std::os::unix::net::UnixStream;

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use nix::unistd::User;

use crate::error::{FrontendError, Result};

/// Resolve the DN to auto-bind an AF_UNIX peer to, by mapping its UID to a
/// system username and building `uid=<name>,cn=peercred,cn=external,cn=auth`,
/// the same shape OpenLDAP's `ldapi://` SASL EXTERNAL transform produces.
pub fn resolve_local_peer_dn(stream: &UnixStream) -> Result<String> {
    let cred = getsockopt(stream, PeerCredentials)
        .map_err(|e| FrontendError::Sasl(format!("SO_PEERCRED failed: {e}")))?;
    let uid = cred.uid();
    let name = User::from_uid(uid.into())
        .map_err(|e| FrontendError::Sasl(format!("uid lookup failed: {e}")))?
        .map(|u| u.name)
        .unwrap_or_else(|| uid.to_string());
    Ok(format!("uid={name},cn=peercred,cn=external,cn=auth"))
}
