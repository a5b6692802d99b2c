//! The two extended operations named in spec §6: StartTLS and Password
//! Modify (RFC 4511 / RFC 3062). Grounded in the teacher's
//! `src/exop_impl/starttls.rs` and `src/exop_impl/passmod.rs` (request
//! builders there; decoders here, since the frontend receives these).

use crate::ber::{universal, Payload, StructureTag, TagClass};

pub const START_TLS_OID: &str = "1.3.6.1.4.1.1466.20037";
pub const PASSWORD_MODIFY_OID: &str = "1.3.6.1.4.1.4203.1.11.1";

#[derive(Debug, Default, Clone)]
pub struct PasswordModifyRequest {
    pub user_identity: Option<String>,
    pub old_passwd: Option<Vec<u8>>,
    pub new_passwd: Option<Vec<u8>>,
}

/// Decode the `PasswdModifyRequestValue` SEQUENCE carried as the exop's
/// opaque value.
pub fn decode_password_modify(value: &[u8]) -> Option<PasswordModifyRequest> {
    let (tag, _) = crate::ber::decode_tag(value)?;
    let tags = tag.expect_constructed()?;
    let mut req = PasswordModifyRequest::default();
    for t in tags {
        if t.class != TagClass::Context {
            return None;
        }
        let bytes = t.expect_primitive()?;
        match t.id {
            0 => req.user_identity = Some(String::from_utf8_lossy(&bytes).into_owned()),
            1 => req.old_passwd = Some(bytes),
            2 => req.new_passwd = Some(bytes),
            _ => return None,
        }
    }
    Some(req)
}

pub fn encode_password_modify_response(generated_password: Option<&[u8]>) -> StructureTag {
    let mut inner = Vec::new();
    if let Some(pw) = generated_password {
        inner.push(StructureTag {
            class: TagClass::Context,
            id: 0,
            payload: Payload::Primitive(pw.to_vec()),
        });
    }
    StructureTag {
        class: TagClass::Universal,
        id: universal::SEQUENCE,
        payload: Payload::Constructed(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_request(old: Option<&str>, new: Option<&str>) -> Vec<u8> {
        let mut inner = Vec::new();
        if let Some(old) = old {
            inner.push(StructureTag { class: TagClass::Context, id: 1, payload: Payload::Primitive(old.as_bytes().to_vec()) });
        }
        if let Some(new) = new {
            inner.push(StructureTag { class: TagClass::Context, id: 2, payload: Payload::Primitive(new.as_bytes().to_vec()) });
        }
        let seq = StructureTag { class: TagClass::Universal, id: universal::SEQUENCE, payload: Payload::Constructed(inner) };
        let mut out = Vec::new();
        seq.encode(&mut out);
        out
    }

    #[test]
    fn decodes_old_and_new_password() {
        let wire = encode_request(Some("old"), Some("new"));
        let req = decode_password_modify(&wire).expect("decodes");
        assert_eq!(req.old_passwd.as_deref(), Some(b"old".as_ref()));
        assert_eq!(req.new_passwd.as_deref(), Some(b"new".as_ref()));
        assert!(req.user_identity.is_none());
    }
}
