//! The plugin API boundary (spec §1, §9): schema, ACL, password policy, and
//! the backend database engines themselves are out of scope and are
//! consumed through these traits rather than implemented here.
//!
//! Grounded in spec §9's design note to prefer a narrow trait per hook
//! category over one fat `Backend` god-trait, matching the teacher's habit
//! of one small trait per concern (`controls_impl` has one module per
//! control type rather than one enum).

use crate::protocol::controls::Control;
use crate::protocol::message::{AuthChoice, SearchRequest};
use crate::protocol::result::LdapResult;

/// One matched entry, handed back to the dispatcher to serialize as a
/// `SearchResultEntry` (attribute encoding itself stays with the caller,
/// since it needs access to the connection's write half).
pub struct BackendEntry {
    pub dn: String,
    pub attrs: Vec<(String, Vec<Vec<u8>>)>,
}

/// `be_bind`: a backend validates credentials for a DN it owns and reports
/// the outcome. Does not itself decide policy (anon access, minssf, etc.);
/// that's the bind processor's job (`bind.rs`).
pub trait BindBackend: Send + Sync {
    fn bind(&self, dn: &str, auth: &AuthChoice) -> LdapResult;
}

/// `be_search`/`be_add`/`be_modify`/... — the CRUD surface a database
/// plugin implements. `do_<op>` in `dispatch.rs` routes to these after
/// gating has passed.
pub trait Backend: Send + Sync {
    fn search(&self, req: &SearchRequest) -> Result<Vec<BackendEntry>, LdapResult>;
    fn add(&self, dn: &str, attrs: &[(String, Vec<Vec<u8>>)]) -> LdapResult;
    fn delete(&self, dn: &str) -> LdapResult;
    fn modify(&self, dn: &str, changes: &[(ModType, String, Vec<Vec<u8>>)]) -> LdapResult;
    fn modrdn(&self, dn: &str, new_rdn: &str, delete_old_rdn: bool, new_superior: Option<&str>) -> LdapResult;
    fn compare(&self, dn: &str, attr: &str, value: &[u8]) -> LdapResult;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModType {
    Add,
    Delete,
    Replace,
}

/// Password policy control attachment (spec §2, recovered from `bind.c`):
/// a successful bind may need `PWEXPIRED`/`PWEXPIRING(n)` controls added
/// to its response, and may need to force all subsequent operations on
/// the connection to fail until a password change, neither of which this
/// crate decides on its own.
pub trait PasswordPolicy: Send + Sync {
    /// Called after a successful bind; returns any controls to attach and
    /// whether the connection must now be restricted to password-change
    /// operations only (spec's "password-change-required" dispatcher gate).
    fn post_bind(&self, dn: &str) -> (Vec<Control>, bool);
}

/// Access control: narrow to the one question the dispatcher needs
/// answered before routing a request (spec's out-of-scope note: the ACL
/// *engine* lives elsewhere; this crate only needs a yes/no at the gate).
pub trait AccessControl: Send + Sync {
    fn allowed(&self, dn: Option<&str>, target_dn: &str, op: crate::operation::OperationKind) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::result::ResultCode;

    struct AllowAll;
    impl BindBackend for AllowAll {
        fn bind(&self, _dn: &str, _auth: &AuthChoice) -> LdapResult {
            LdapResult::success()
        }
    }
    impl AccessControl for AllowAll {
        fn allowed(&self, _dn: Option<&str>, _target_dn: &str, _op: crate::operation::OperationKind) -> bool {
            true
        }
    }

    #[test]
    fn a_trivial_backend_can_implement_both_traits() {
        let b = AllowAll;
        let auth = AuthChoice::Simple(b"x".to_vec());
        assert_eq!(b.bind("cn=x", &auth).rc, ResultCode::Success);
        assert!(b.allowed(None, "cn=x", crate::operation::OperationKind::Bind));
    }
}
