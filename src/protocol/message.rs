//! Decoding of the message envelope and every request body the dispatcher
//! needs to hand to a `Backend` (see `backend.rs`): bind, search, add,
//! modify, delete, modrdn, compare, extended, and abandon.

use crate::ber::{encode_int, parse_int, parse_uint, universal, Payload, StructureTag, TagClass};
use crate::protocol::controls::{self, Control};
use crate::protocol::op;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    BadEnvelope,
    BadMsgId,
    BadControls,
    BadBody,
}

/// A fully-framed, partially-decoded client message.
pub struct Envelope {
    pub msgid: i32,
    pub op_tag: u64,
    pub protocol_op: StructureTag,
    pub controls: Vec<Control>,
}

pub fn decode_envelope(tag: StructureTag) -> Result<Envelope, ProtocolError> {
    let mut tags = tag
        .match_class(TagClass::Universal)
        .and_then(|t| t.match_id(universal::SEQUENCE))
        .and_then(|t| t.expect_constructed())
        .ok_or(ProtocolError::BadEnvelope)?
        .into_iter();

    let msgid_tag = tags.next().ok_or(ProtocolError::BadEnvelope)?;
    let msgid_bytes = msgid_tag
        .match_class(TagClass::Universal)
        .and_then(|t| t.match_id(universal::INTEGER))
        .and_then(|t| t.expect_primitive())
        .ok_or(ProtocolError::BadMsgId)?;
    let msgid = parse_int(&msgid_bytes) as i32;

    let protocol_op = tags.next().ok_or(ProtocolError::BadEnvelope)?;
    if protocol_op.class != TagClass::Application {
        return Err(ProtocolError::BadEnvelope);
    }
    let op_tag = protocol_op.id;

    let controls = match tags.next() {
        None => Vec::new(),
        Some(c) if c.class == TagClass::Context && c.id == 0 => {
            controls::parse_controls(StructureTag {
                class: TagClass::Universal,
                id: universal::SEQUENCE,
                payload: c.payload,
            })
            .ok_or(ProtocolError::BadControls)?
        }
        Some(_) => return Err(ProtocolError::BadEnvelope),
    };

    Ok(Envelope { msgid, op_tag, protocol_op, controls })
}

/// `AuthenticationChoice` (RFC 4511 §4.2).
pub enum AuthChoice {
    Simple(Vec<u8>),
    Sasl { mech: String, creds: Option<Vec<u8>> },
}

pub struct BindRequest {
    pub version: i64,
    pub name: String,
    pub auth: AuthChoice,
}

pub fn decode_bind_request(op: StructureTag) -> Result<BindRequest, ProtocolError> {
    let mut tags = op.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let version_bytes = tags
        .next()
        .and_then(|t| t.expect_primitive())
        .ok_or(ProtocolError::BadBody)?;
    let version = parse_int(&version_bytes);

    let name_bytes = tags
        .next()
        .and_then(|t| t.expect_primitive())
        .ok_or(ProtocolError::BadBody)?;
    let name = String::from_utf8(name_bytes).map_err(|_| ProtocolError::BadBody)?;

    let auth_tag = tags.next().ok_or(ProtocolError::BadBody)?;
    let auth = match (auth_tag.class, auth_tag.id) {
        (TagClass::Context, 0) => {
            AuthChoice::Simple(auth_tag.expect_primitive().ok_or(ProtocolError::BadBody)?)
        }
        (TagClass::Context, 3) => {
            let mut inner = auth_tag.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
            let mech_bytes = inner.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?;
            let mech = String::from_utf8(mech_bytes).map_err(|_| ProtocolError::BadBody)?;
            let creds = inner.next().and_then(|t| t.expect_primitive());
            AuthChoice::Sasl { mech, creds }
        }
        _ => return Err(ProtocolError::BadBody),
    };

    Ok(BindRequest { version, name, auth })
}

/// Scope of a `SearchRequest`, used by the dispatcher's root-DSE gate and
/// by persistent search's scope check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub filter: StructureTag,
    pub attributes: Vec<String>,
}

pub fn decode_search_request(op: StructureTag) -> Result<SearchRequest, ProtocolError> {
    let mut tags = op.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let base = String::from_utf8(tags.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let scope_byte = tags.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?;
    let scope = match scope_byte.first() {
        Some(0) => Scope::Base,
        Some(1) => Scope::OneLevel,
        Some(2) => Scope::Subtree,
        _ => return Err(ProtocolError::BadBody),
    };
    // derefAliases, sizeLimit, timeLimit, typesOnly: not interpreted by
    // this layer, just skipped.
    for _ in 0..4 {
        tags.next();
    }
    let filter = tags.next().ok_or(ProtocolError::BadBody)?;
    let attributes = match tags.next() {
        Some(t) => t
            .expect_constructed()
            .ok_or(ProtocolError::BadBody)?
            .into_iter()
            .filter_map(|a| a.expect_primitive())
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .collect(),
        None => Vec::new(),
    };
    Ok(SearchRequest { base, scope, filter, attributes })
}

/// `AddRequest ::= [APPLICATION 8] SEQUENCE { entry LDAPDN, attributes
/// AttributeList }`.
pub struct AddRequest {
    pub dn: String,
    pub attrs: Vec<(String, Vec<Vec<u8>>)>,
}

pub fn decode_add_request(op: StructureTag) -> Result<AddRequest, ProtocolError> {
    let mut tags = op.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let dn = String::from_utf8(tags.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let attr_list = tags.next().and_then(|t| t.expect_constructed()).ok_or(ProtocolError::BadBody)?;
    let attrs = attr_list
        .into_iter()
        .map(decode_attribute)
        .collect::<Result<Vec<_>, ProtocolError>>()?;
    Ok(AddRequest { dn, attrs })
}

fn decode_attribute(t: StructureTag) -> Result<(String, Vec<Vec<u8>>), ProtocolError> {
    let mut inner = t.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let name = String::from_utf8(inner.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let vals = inner
        .next()
        .and_then(|t| t.expect_constructed())
        .ok_or(ProtocolError::BadBody)?
        .into_iter()
        .map(|v| v.expect_primitive().ok_or(ProtocolError::BadBody))
        .collect::<Result<Vec<_>, ProtocolError>>()?;
    Ok((name, vals))
}

/// `DelRequest ::= [APPLICATION 10] LDAPDN` — a bare primitive octet string.
pub fn decode_delete_request(op: StructureTag) -> Result<String, ProtocolError> {
    let bytes = op.expect_primitive().ok_or(ProtocolError::BadBody)?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::BadBody)
}

/// `ModifyRequest ::= [APPLICATION 6] SEQUENCE { object LDAPDN, changes
/// SEQUENCE OF SEQUENCE { operation ENUMERATED, modification
/// PartialAttribute } }`.
pub struct ModifyRequest {
    pub dn: String,
    pub changes: Vec<(crate::backend::ModType, String, Vec<Vec<u8>>)>,
}

pub fn decode_modify_request(op: StructureTag) -> Result<ModifyRequest, ProtocolError> {
    use crate::backend::ModType;
    let mut tags = op.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let dn = String::from_utf8(tags.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let change_list = tags.next().and_then(|t| t.expect_constructed()).ok_or(ProtocolError::BadBody)?;
    let mut changes = Vec::new();
    for change in change_list {
        let mut inner = change.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
        let op_bytes = inner.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?;
        let mod_type = match op_bytes.first() {
            Some(0) => ModType::Add,
            Some(1) => ModType::Delete,
            Some(2) => ModType::Replace,
            _ => return Err(ProtocolError::BadBody),
        };
        let (name, vals) = decode_attribute(inner.next().ok_or(ProtocolError::BadBody)?)?;
        changes.push((mod_type, name, vals));
    }
    Ok(ModifyRequest { dn, changes })
}

/// `ModDNRequest ::= [APPLICATION 12] SEQUENCE { entry LDAPDN, newrdn
/// RelativeLDAPDN, deleteoldrdn BOOLEAN, newSuperior [0] LDAPDN OPTIONAL }`.
pub struct ModDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

pub fn decode_moddn_request(op: StructureTag) -> Result<ModDnRequest, ProtocolError> {
    let mut tags = op.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let dn = String::from_utf8(tags.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let new_rdn = String::from_utf8(tags.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let delete_old_rdn = tags
        .next()
        .and_then(|t| t.expect_primitive())
        .ok_or(ProtocolError::BadBody)?
        .first()
        .map(|&b| b != 0)
        .unwrap_or(false);
    let new_superior = match tags.next() {
        Some(t) if t.class == TagClass::Context && t.id == 0 => {
            Some(String::from_utf8(t.expect_primitive().ok_or(ProtocolError::BadBody)?).map_err(|_| ProtocolError::BadBody)?)
        }
        _ => None,
    };
    Ok(ModDnRequest { dn, new_rdn, delete_old_rdn, new_superior })
}

/// `CompareRequest ::= [APPLICATION 14] SEQUENCE { entry LDAPDN, ava
/// SEQUENCE { attributeDesc, assertionValue } }`.
pub struct CompareRequest {
    pub dn: String,
    pub attr: String,
    pub value: Vec<u8>,
}

pub fn decode_compare_request(op: StructureTag) -> Result<CompareRequest, ProtocolError> {
    let mut tags = op.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let dn = String::from_utf8(tags.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let mut ava = tags.next().and_then(|t| t.expect_constructed()).ok_or(ProtocolError::BadBody)?.into_iter();
    let attr = String::from_utf8(ava.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let value = ava.next().and_then(|t| t.expect_primitive()).ok_or(ProtocolError::BadBody)?;
    Ok(CompareRequest { dn, attr, value })
}

pub struct ExtendedRequest {
    pub oid: String,
    pub value: Option<Vec<u8>>,
}

pub fn decode_extended_request(op: StructureTag) -> Result<ExtendedRequest, ProtocolError> {
    let mut tags = op.expect_constructed().ok_or(ProtocolError::BadBody)?.into_iter();
    let oid_tag = tags.next().ok_or(ProtocolError::BadBody)?;
    if oid_tag.class != TagClass::Context || oid_tag.id != 0 {
        return Err(ProtocolError::BadBody);
    }
    let oid = String::from_utf8(oid_tag.expect_primitive().ok_or(ProtocolError::BadBody)?)
        .map_err(|_| ProtocolError::BadBody)?;
    let value = match tags.next() {
        Some(t) if t.class == TagClass::Context && t.id == 1 => t.expect_primitive(),
        _ => None,
    };
    Ok(ExtendedRequest { oid, value })
}

/// `AbandonRequest ::= [APPLICATION 16] MessageID` — a bare primitive
/// integer, not a SEQUENCE.
pub fn decode_abandon_request(op: StructureTag) -> Result<i32, ProtocolError> {
    let bytes = op.expect_primitive().ok_or(ProtocolError::BadBody)?;
    Ok(parse_uint(&bytes) as i32)
}

/// Wrap an already-encoded `protocolOp` (an application-tagged
/// `StructureTag`, e.g. from `LdapResult::encode_protocol_op` or
/// `encode_search_result_entry`) plus its message ID and any response
/// controls into the full `LDAPMessage ::= SEQUENCE { messageID, protocolOp,
/// controls [0] Controls OPTIONAL }` wire envelope, ready to write to the
/// connection's transport.
pub fn encode_message(msgid: i32, protocol_op: StructureTag, controls: &[Control]) -> Vec<u8> {
    let mut elements = vec![
        StructureTag {
            class: TagClass::Universal,
            id: universal::INTEGER,
            payload: Payload::Primitive(encode_int(msgid as i64)),
        },
        protocol_op,
    ];
    if !controls.is_empty() {
        elements.push(StructureTag {
            class: TagClass::Context,
            id: 0,
            payload: Payload::Constructed(controls.iter().map(|c| c.encode()).collect()),
        });
    }
    let envelope = StructureTag { class: TagClass::Universal, id: universal::SEQUENCE, payload: Payload::Constructed(elements) };
    let mut out = Vec::new();
    envelope.encode(&mut out);
    out
}

/// `SearchResultEntry ::= [APPLICATION 4] SEQUENCE { objectName LDAPDN,
/// attributes PartialAttributeList }`, the inverse of the decoding this
/// module does for requests: this crate only ever originates entries, it
/// never receives them, so there's no matching `decode_*`.
pub fn encode_search_result_entry(dn: &str, attrs: &[(String, Vec<Vec<u8>>)]) -> StructureTag {
    let attr_list = attrs
        .iter()
        .map(|(name, vals)| StructureTag {
            class: TagClass::Universal,
            id: universal::SEQUENCE,
            payload: Payload::Constructed(vec![
                StructureTag {
                    class: TagClass::Universal,
                    id: universal::OCTET_STRING,
                    payload: Payload::Primitive(name.clone().into_bytes()),
                },
                StructureTag {
                    class: TagClass::Universal,
                    id: universal::SET,
                    payload: Payload::Constructed(
                        vals.iter()
                            .map(|v| StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(v.clone()) })
                            .collect(),
                    ),
                },
            ]),
        })
        .collect();
    StructureTag {
        class: TagClass::Application,
        id: op::SEARCH_RESULT_ENTRY,
        payload: Payload::Constructed(vec![
            StructureTag {
                class: TagClass::Universal,
                id: universal::OCTET_STRING,
                payload: Payload::Primitive(dn.as_bytes().to_vec()),
            },
            StructureTag { class: TagClass::Universal, id: universal::SEQUENCE, payload: Payload::Constructed(attr_list) },
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::decode_tag;

    fn encode_simple_bind(msgid: i64, dn: &str, pw: &str) -> Vec<u8> {
        let req = StructureTag {
            class: TagClass::Application,
            id: op::BIND_REQUEST,
            payload: Payload::Constructed(vec![
                StructureTag { class: TagClass::Universal, id: universal::INTEGER, payload: Payload::Primitive(vec![3]) },
                StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(dn.as_bytes().to_vec()) },
                StructureTag { class: TagClass::Context, id: 0, payload: Payload::Primitive(pw.as_bytes().to_vec()) },
            ]),
        };
        let outer = StructureTag {
            class: TagClass::Universal,
            id: universal::SEQUENCE,
            payload: Payload::Constructed(vec![
                StructureTag { class: TagClass::Universal, id: universal::INTEGER, payload: Payload::Primitive(vec![msgid as u8]) },
                req,
            ]),
        };
        let mut out = Vec::new();
        outer.encode(&mut out);
        out
    }

    #[test]
    fn decodes_envelope_and_simple_bind() {
        let wire = encode_simple_bind(7, "cn=directory manager", "secret");
        let (tag, _) = decode_tag(&wire).unwrap();
        let env = decode_envelope(tag).unwrap();
        assert_eq!(env.msgid, 7);
        assert_eq!(env.op_tag, op::BIND_REQUEST);
        assert!(env.controls.is_empty());

        let bind = decode_bind_request(env.protocol_op).unwrap();
        assert_eq!(bind.version, 3);
        assert_eq!(bind.name, "cn=directory manager");
        match bind.auth {
            AuthChoice::Simple(pw) => assert_eq!(pw, b"secret"),
            _ => panic!("expected simple auth"),
        }
    }

    #[test]
    fn decodes_an_add_request_with_two_attributes() {
        let attr = |name: &str, vals: &[&str]| StructureTag {
            class: TagClass::Universal,
            id: universal::SEQUENCE,
            payload: Payload::Constructed(vec![
                StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(name.as_bytes().to_vec()) },
                StructureTag {
                    class: TagClass::Universal,
                    id: universal::SET,
                    payload: Payload::Constructed(
                        vals.iter()
                            .map(|v| StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(v.as_bytes().to_vec()) })
                            .collect(),
                    ),
                },
            ]),
        };
        let op = StructureTag {
            class: TagClass::Application,
            id: op::ADD_REQUEST,
            payload: Payload::Constructed(vec![
                StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(b"cn=new,dc=example".to_vec()) },
                StructureTag {
                    class: TagClass::Universal,
                    id: universal::SEQUENCE,
                    payload: Payload::Constructed(vec![attr("cn", &["new"]), attr("objectClass", &["top", "person"])]),
                },
            ]),
        };
        let req = decode_add_request(op).unwrap();
        assert_eq!(req.dn, "cn=new,dc=example");
        assert_eq!(req.attrs.len(), 2);
        assert_eq!(req.attrs[1].1.len(), 2);
    }

    #[test]
    fn decodes_a_moddn_request_with_new_superior() {
        let op = StructureTag {
            class: TagClass::Application,
            id: op::MOD_DN_REQUEST,
            payload: Payload::Constructed(vec![
                StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(b"cn=old,dc=example".to_vec()) },
                StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(b"cn=new".to_vec()) },
                StructureTag { class: TagClass::Universal, id: universal::BOOLEAN, payload: Payload::Primitive(vec![0xFF]) },
                StructureTag { class: TagClass::Context, id: 0, payload: Payload::Primitive(b"ou=people,dc=example".to_vec()) },
            ]),
        };
        let req = decode_moddn_request(op).unwrap();
        assert_eq!(req.new_rdn, "cn=new");
        assert!(req.delete_old_rdn);
        assert_eq!(req.new_superior.as_deref(), Some("ou=people,dc=example"));
    }

    #[test]
    fn encode_message_round_trips_through_decode_envelope() {
        use crate::protocol::result::{LdapResult, ResultCode};
        let result = LdapResult::error(ResultCode::InvalidCredentials, "bad password");
        let protocol_op = result.encode_protocol_op(op::BIND_RESPONSE);
        let wire = encode_message(7, protocol_op, &[]);
        let (tag, consumed) = decode_tag(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        let env = decode_envelope(tag).unwrap();
        assert_eq!(env.msgid, 7);
        assert_eq!(env.op_tag, op::BIND_RESPONSE);
    }

    #[test]
    fn encode_message_negative_msgid_encodes_a_minimal_integer() {
        use crate::protocol::result::LdapResult;
        let protocol_op = LdapResult::success().encode_protocol_op(op::DEL_RESPONSE);
        let wire = encode_message(-1, protocol_op, &[]);
        let (tag, _) = decode_tag(&wire).unwrap();
        let env = decode_envelope(tag).unwrap();
        assert_eq!(env.msgid, -1);
    }

    #[test]
    fn encode_search_result_entry_round_trips_dn_and_attributes() {
        let entry = encode_search_result_entry("cn=new,dc=example", &[("cn".to_string(), vec![b"new".to_vec()])]);
        let mut out = Vec::new();
        entry.encode(&mut out);
        let (tag, consumed) = decode_tag(&out).unwrap();
        assert_eq!(consumed, out.len());
        assert_eq!(tag.class, TagClass::Application);
        assert_eq!(tag.id, op::SEARCH_RESULT_ENTRY);
        let mut fields = tag.expect_constructed().unwrap().into_iter();
        let dn = String::from_utf8(fields.next().unwrap().expect_primitive().unwrap()).unwrap();
        assert_eq!(dn, "cn=new,dc=example");
        let attrs = fields.next().unwrap().expect_constructed().unwrap();
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn rejects_mistagged_msgid() {
        let req = StructureTag {
            class: TagClass::Application,
            id: op::UNBIND_REQUEST,
            payload: Payload::Primitive(vec![]),
        };
        let outer = StructureTag {
            class: TagClass::Universal,
            id: universal::SEQUENCE,
            payload: Payload::Constructed(vec![
                StructureTag { class: TagClass::Universal, id: universal::OCTET_STRING, payload: Payload::Primitive(vec![]) },
                req,
            ]),
        };
        match decode_envelope(outer) {
            Err(ProtocolError::BadMsgId) => {}
            other => panic!("expected BadMsgId, got {:?}", other.map(|_| ()).err()),
        }
    }
}
