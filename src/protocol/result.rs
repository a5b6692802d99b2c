//! `LdapResult`, the common tail of every LDAP response, and the numeric
//! result codes from RFC 4511 appendix A.1.
//!
//! The shape of this struct (`rc`/`matched`/`text`/`refs`/`ctrls`) is taken
//! directly from the teacher's `src/result.rs`; `description()` reuses the
//! same code-to-name table. The direction is reversed (encode, not parse
//! `From<Tag>`), since this crate sends results rather than receiving them.

use crate::ber::{universal, Payload, StructureTag, TagClass};
use crate::protocol::controls::Control;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    Referral = 10,
    AdminLimitExceeded = 11,
    UnavailableCriticalExtension = 12,
    ConfidentialityRequired = 13,
    SaslBindInProgress = 14,
    NoSuchAttribute = 16,
    InvalidDnSyntax = 34,
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    NoSuchObject = 32,
    Other = 80,
}

impl ResultCode {
    pub fn description(self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::OperationsError => "operationsError",
            ResultCode::ProtocolError => "protocolError",
            ResultCode::TimeLimitExceeded => "timeLimitExceeded",
            ResultCode::SizeLimitExceeded => "sizeLimitExceeded",
            ResultCode::AuthMethodNotSupported => "authMethodNotSupported",
            ResultCode::StrongerAuthRequired => "strongerAuthRequired",
            ResultCode::Referral => "referral",
            ResultCode::AdminLimitExceeded => "adminLimitExceeded",
            ResultCode::UnavailableCriticalExtension => "unavailableCriticalExtension",
            ResultCode::ConfidentialityRequired => "confidentialityRequired",
            ResultCode::SaslBindInProgress => "saslBindInProgress",
            ResultCode::NoSuchAttribute => "noSuchAttribute",
            ResultCode::InvalidDnSyntax => "invalidDNSyntax",
            ResultCode::InappropriateAuthentication => "inappropriateAuthentication",
            ResultCode::InvalidCredentials => "invalidCredentials",
            ResultCode::InsufficientAccessRights => "insufficientAccessRights",
            ResultCode::Busy => "busy",
            ResultCode::Unavailable => "unavailable",
            ResultCode::UnwillingToPerform => "unwillingToPerform",
            ResultCode::NoSuchObject => "noSuchObject",
            ResultCode::Other => "other",
        }
    }
}

/// Common components of an LDAP operation result (RFC 4511 §4.1.9).
#[derive(Clone, Debug)]
pub struct LdapResult {
    pub rc: ResultCode,
    pub matched: String,
    pub text: String,
    pub refs: Vec<String>,
    pub ctrls: Vec<Control>,
}

impl LdapResult {
    pub fn success() -> LdapResult {
        LdapResult {
            rc: ResultCode::Success,
            matched: String::new(),
            text: String::new(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        }
    }

    pub fn error(rc: ResultCode, text: impl Into<String>) -> LdapResult {
        LdapResult {
            rc,
            matched: String::new(),
            text: text.into(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        }
    }

    pub fn with_matched(mut self, matched: impl Into<String>) -> LdapResult {
        self.matched = matched.into();
        self
    }

    pub fn with_control(mut self, c: Control) -> LdapResult {
        self.ctrls.push(c);
        self
    }

    /// Encode the `LDAPResult` body (everything after `protocolOp`'s own
    /// application tag) as the three or four mandatory/optional elements.
    fn encode_body(&self, body: &mut Vec<StructureTag>) {
        body.push(StructureTag {
            class: TagClass::Universal,
            id: universal::ENUMERATED,
            payload: Payload::Primitive(vec![self.rc as u32 as u8]),
        });
        body.push(StructureTag {
            class: TagClass::Universal,
            id: universal::OCTET_STRING,
            payload: Payload::Primitive(self.matched.clone().into_bytes()),
        });
        body.push(StructureTag {
            class: TagClass::Universal,
            id: universal::OCTET_STRING,
            payload: Payload::Primitive(self.text.clone().into_bytes()),
        });
        if !self.refs.is_empty() {
            let inner = self
                .refs
                .iter()
                .map(|r| StructureTag {
                    class: TagClass::Universal,
                    id: universal::OCTET_STRING,
                    payload: Payload::Primitive(r.clone().into_bytes()),
                })
                .collect();
            body.push(StructureTag {
                class: TagClass::Context,
                id: 3,
                payload: Payload::Constructed(inner),
            });
        }
    }

    /// Encode the full `protocolOp` (application-tagged LDAPResult variant)
    /// for the given response tag (e.g. `op::BIND_RESPONSE`).
    pub fn encode_protocol_op(&self, app_tag: u64) -> StructureTag {
        let mut body = Vec::new();
        self.encode_body(&mut body);
        StructureTag {
            class: TagClass::Application,
            id: app_tag,
            payload: Payload::Constructed(body),
        }
    }

    /// Encode a `BindResponse` (RFC 4511 §4.2.2), which adds an optional
    /// `serverSaslCreds [7]` element after the common `LDAPResult` fields —
    /// this is where a SASL challenge travels, never in `controls [0]`.
    pub fn encode_bind_response(&self, server_sasl_creds: Option<&[u8]>) -> StructureTag {
        let mut body = Vec::new();
        self.encode_body(&mut body);
        if let Some(creds) = server_sasl_creds {
            body.push(StructureTag {
                class: TagClass::Context,
                id: 7,
                payload: Payload::Primitive(creds.to_vec()),
            });
        }
        StructureTag {
            class: TagClass::Application,
            id: crate::protocol::op::BIND_RESPONSE,
            payload: Payload::Constructed(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_result_has_empty_strings() {
        let r = LdapResult::success();
        assert_eq!(r.rc, ResultCode::Success);
        assert!(r.matched.is_empty());
        assert!(r.text.is_empty());
    }

    #[test]
    fn encodes_as_an_application_tagged_sequence() {
        let r = LdapResult::error(ResultCode::InvalidCredentials, "bad password");
        let tag = r.encode_protocol_op(crate::protocol::op::BIND_RESPONSE);
        assert_eq!(tag.class, TagClass::Application);
        assert_eq!(tag.id, crate::protocol::op::BIND_RESPONSE);
        assert!(tag.is_constructed());
    }

    #[test]
    fn bind_response_carries_server_sasl_creds_in_tag_7_not_a_control() {
        let r = LdapResult::error(ResultCode::SaslBindInProgress, "");
        let tag = r.encode_bind_response(Some(b"challenge-bytes"));
        let elems = match &tag.payload {
            Payload::Constructed(e) => e,
            _ => panic!("expected constructed bind response"),
        };
        let creds = elems.last().expect("serverSaslCreds element present");
        assert_eq!(creds.class, TagClass::Context);
        assert_eq!(creds.id, 7);
        assert_eq!(creds.payload, Payload::Primitive(b"challenge-bytes".to_vec()));
    }

    #[test]
    fn bind_response_omits_server_sasl_creds_when_absent() {
        let r = LdapResult::success();
        let tag = r.encode_bind_response(None);
        let elems = match &tag.payload {
            Payload::Constructed(e) => e,
            _ => panic!("expected constructed bind response"),
        };
        assert_eq!(elems.len(), 3);
    }
}
