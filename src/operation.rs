//! Component C7: an in-flight LDAP operation.
//!
//! Grounded in the teacher's `result.rs` result-code table for
//! `ResultCode`/`LdapResult` shape; the `Operation` struct itself and its
//! factory/destructor semantics are new, driven by spec §4.7.

use crate::protocol::op;
use crate::protocol::result::LdapResult;

/// Which request type this operation is carrying. Mirrors the application
/// tag numbers in `protocol::op`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Bind,
    Unbind,
    Search,
    Modify,
    Add,
    Delete,
    ModDn,
    Compare,
    Abandon,
    Extended,
}

impl OperationKind {
    pub fn from_tag(tag: u64) -> Option<OperationKind> {
        Some(match tag {
            op::BIND_REQUEST => OperationKind::Bind,
            op::UNBIND_REQUEST => OperationKind::Unbind,
            op::SEARCH_REQUEST => OperationKind::Search,
            op::MODIFY_REQUEST => OperationKind::Modify,
            op::ADD_REQUEST => OperationKind::Add,
            op::DEL_REQUEST => OperationKind::Delete,
            op::MOD_DN_REQUEST => OperationKind::ModDn,
            op::COMPARE_REQUEST => OperationKind::Compare,
            op::ABANDON_REQUEST => OperationKind::Abandon,
            op::EXTENDED_REQUEST => OperationKind::Extended,
            _ => return None,
        })
    }

    pub fn response_tag(self) -> Option<u64> {
        Some(match self {
            OperationKind::Bind => op::BIND_RESPONSE,
            OperationKind::Search => op::SEARCH_RESULT_DONE,
            OperationKind::Modify => op::MODIFY_RESPONSE,
            OperationKind::Add => op::ADD_RESPONSE,
            OperationKind::Delete => op::DEL_RESPONSE,
            OperationKind::ModDn => op::MOD_DN_RESPONSE,
            OperationKind::Compare => op::COMPARE_RESPONSE,
            OperationKind::Extended => op::EXTENDED_RESPONSE,
            OperationKind::Unbind | OperationKind::Abandon => return None,
        })
    }
}

/// One request/response cycle. Created by the dispatcher for every decoded
/// PDU except unbind/abandon (which have no response and are handled
/// inline), torn down once its response has been sent or it is abandoned.
pub struct Operation {
    pub connid: u64,
    pub msgid: i64,
    pub kind: OperationKind,
    pub started_at: std::time::Instant,
}

impl Operation {
    pub fn new(connid: u64, msgid: i64, kind: OperationKind) -> Operation {
        Operation { connid, msgid, kind, started_at: std::time::Instant::now() }
    }

    /// Build the "operation was abandoned" result a `do_<op>` handler
    /// should return instead of running to completion once it observes
    /// `Connection::is_operation_abandoned` mid-flight.
    pub fn abandoned_result(&self) -> LdapResult {
        LdapResult::error(crate::protocol::result::ResultCode::OperationsError, "operation abandoned")
    }
}
