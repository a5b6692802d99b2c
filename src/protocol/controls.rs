//! Request/response control construction and parsing.
//!
//! `Control`/`RawControl`/`construct_control`/`parse_controls` follow the
//! shape of the teacher's `src/controls_impl/mod.rs` almost exactly; only
//! the underlying tag representation changed (this crate's `ber::StructureTag`
//! instead of `asnom`'s). OIDs covered are the ones named in spec §6:
//! paged results, persistent search, authorization (proxy auth), and the
//! two password-policy response controls recovered from `bind.c`.

use std::collections::HashMap;

use crate::ber::{decode_tag, encode_int, parse_int, universal, Payload, StructureTag, TagClass};

pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";
pub const PERSISTENT_SEARCH_OID: &str = "2.16.840.1.113730.3.4.3";
pub const ENTRY_CHANGE_NOTIFICATION_OID: &str = "2.16.840.1.113730.3.4.7";
pub const PROXY_AUTH_OID: &str = "2.16.840.1.113730.3.4.18";
pub const PWEXPIRED_OID: &str = "2.16.840.1.113730.3.4.4";
pub const PWEXPIRING_OID: &str = "2.16.840.1.113730.3.4.5";
pub const MANAGE_DSA_IT_OID: &str = "2.16.840.1.113730.3.4.2";

lazy_static! {
    /// OID -> human-readable name, for access-log lines that name which
    /// controls a request carried (spec §7).
    static ref CONTROL_NAMES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert(PAGED_RESULTS_OID, "PagedResults");
        map.insert(PERSISTENT_SEARCH_OID, "PersistentSearch");
        map.insert(ENTRY_CHANGE_NOTIFICATION_OID, "EntryChangeNotification");
        map.insert(PROXY_AUTH_OID, "ProxiedAuthorization");
        map.insert(PWEXPIRED_OID, "PasswordExpired");
        map.insert(PWEXPIRING_OID, "PasswordExpiring");
        map.insert(MANAGE_DSA_IT_OID, "ManageDsaIT");
        map
    };
}

/// Human-readable name for a control OID, or the OID itself if unknown.
pub fn control_name(oid: &str) -> &str {
    CONTROL_NAMES.get(oid).copied().unwrap_or(oid)
}

#[derive(Clone, Debug)]
pub struct RawControl {
    pub ctype: String,
    pub crit: bool,
    pub val: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct Control(pub RawControl);

impl Control {
    pub fn new(oid: &str, crit: bool, val: Option<Vec<u8>>) -> Control {
        Control(RawControl { ctype: oid.to_string(), crit, val })
    }

    pub fn pwexpired() -> Control {
        Control::new(PWEXPIRED_OID, false, None)
    }

    pub fn pwexpiring(seconds_left: u64) -> Control {
        Control::new(PWEXPIRING_OID, false, Some(seconds_left.to_string().into_bytes()))
    }

    pub fn encode(&self) -> StructureTag {
        construct_control(&self.0.ctype, self.0.crit, self.0.val.clone())
    }
}

pub fn construct_control(oid: &str, crit: bool, val: Option<Vec<u8>>) -> StructureTag {
    let mut seq = vec![StructureTag {
        class: TagClass::Universal,
        id: universal::OCTET_STRING,
        payload: Payload::Primitive(oid.as_bytes().to_vec()),
    }];
    if crit {
        seq.push(StructureTag {
            class: TagClass::Universal,
            id: universal::BOOLEAN,
            payload: Payload::Primitive(vec![0xFF]),
        });
    }
    if let Some(val) = val {
        seq.push(StructureTag {
            class: TagClass::Universal,
            id: universal::OCTET_STRING,
            payload: Payload::Primitive(val),
        });
    }
    StructureTag {
        class: TagClass::Universal,
        id: universal::SEQUENCE,
        payload: Payload::Constructed(seq),
    }
}

/// Parse the `controls [0] Controls OPTIONAL` element of a request
/// envelope (already stripped of its `[0]` wrapper by the caller).
pub fn parse_controls(t: StructureTag) -> Option<Vec<Control>> {
    let tags = t.expect_constructed()?;
    let mut ctrls = Vec::new();
    for ctrl in tags {
        let mut components = ctrl.expect_constructed()?.into_iter();
        let ctype_tag = components.next()?;
        let ctype = String::from_utf8(ctype_tag.expect_primitive()?).ok()?;
        let next = components.next();
        let (crit, maybe_val) = match next {
            None => (false, None),
            Some(c) => {
                if c.id == universal::BOOLEAN && c.class == TagClass::Universal {
                    let bytes = c.expect_primitive()?;
                    (bytes.first().map(|&b| b != 0).unwrap_or(false), components.next())
                } else {
                    (false, Some(c))
                }
            }
        };
        let val = match maybe_val {
            None => None,
            Some(v) => Some(v.expect_primitive()?),
        };
        ctrls.push(Control(RawControl { ctype, crit, val }));
    }
    Some(ctrls)
}

/// Encode a `PersistentSearch` request control's value, the inverse of
/// decoding it (used only by tests, since this crate never originates the
/// control, only decodes it).
#[cfg(test)]
pub fn encode_persistent_search_value(change_types: i32, changes_only: bool, return_ecs: bool) -> Vec<u8> {
    let seq = StructureTag {
        class: TagClass::Universal,
        id: universal::SEQUENCE,
        payload: Payload::Constructed(vec![
            StructureTag {
                class: TagClass::Universal,
                id: universal::INTEGER,
                payload: Payload::Primitive(vec![change_types as u8]),
            },
            StructureTag {
                class: TagClass::Universal,
                id: universal::BOOLEAN,
                payload: Payload::Primitive(vec![if changes_only { 0xFF } else { 0x00 }]),
            },
            StructureTag {
                class: TagClass::Universal,
                id: universal::BOOLEAN,
                payload: Payload::Primitive(vec![if return_ecs { 0xFF } else { 0x00 }]),
            },
        ]),
    };
    let mut out = Vec::new();
    seq.encode(&mut out);
    out
}

/// `EntryChangeNotification` response control value (spec §6):
/// `SEQUENCE { changeType ENUM, previousDN? LDAPDN, changeNumber? INTEGER }`.
/// `changeType` carries one of `psearch::change_type`'s bitmask values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryChangeNotification {
    pub change_type: i32,
    pub previous_dn: Option<String>,
    pub change_number: Option<i64>,
}

/// Encode an `EntryChangeNotification` control value, the inverse of
/// `decode_entry_change_notification` (spec §8 testable property #4).
pub fn encode_entry_change_notification(ecn: &EntryChangeNotification) -> Vec<u8> {
    let mut elems = vec![StructureTag {
        class: TagClass::Universal,
        id: universal::ENUMERATED,
        payload: Payload::Primitive(encode_int(ecn.change_type as i64)),
    }];
    if let Some(ref dn) = ecn.previous_dn {
        elems.push(StructureTag {
            class: TagClass::Universal,
            id: universal::OCTET_STRING,
            payload: Payload::Primitive(dn.clone().into_bytes()),
        });
    }
    if let Some(n) = ecn.change_number {
        elems.push(StructureTag {
            class: TagClass::Universal,
            id: universal::INTEGER,
            payload: Payload::Primitive(encode_int(n)),
        });
    }
    let seq = StructureTag { class: TagClass::Universal, id: universal::SEQUENCE, payload: Payload::Constructed(elems) };
    let mut out = Vec::new();
    seq.encode(&mut out);
    out
}

/// Decode an `EntryChangeNotification` control value from its raw control
/// bytes. `previousDN` and `changeNumber` are both optional and may appear
/// in either combination, so each element is dispatched by tag rather than
/// by position.
pub fn decode_entry_change_notification(val: &[u8]) -> Option<EntryChangeNotification> {
    let (tag, _) = decode_tag(val)?;
    let mut components = tag.expect_constructed()?.into_iter();
    let change_type_tag = components.next()?;
    let change_type = parse_int(&change_type_tag.expect_primitive()?) as i32;
    let mut previous_dn = None;
    let mut change_number = None;
    for elem in components {
        if elem.class != TagClass::Universal {
            continue;
        }
        match elem.id {
            universal::OCTET_STRING => previous_dn = String::from_utf8(elem.expect_primitive()?).ok(),
            universal::INTEGER => change_number = Some(parse_int(&elem.expect_primitive()?)),
            _ => {}
        }
    }
    Some(EntryChangeNotification { change_type, previous_dn, change_number })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_control_without_a_value() {
        let tag = construct_control(MANAGE_DSA_IT_OID, true, None);
        let ctrls = parse_controls(StructureTag {
            class: TagClass::Universal,
            id: universal::SEQUENCE,
            payload: Payload::Constructed(vec![tag]),
        })
        .expect("parses");
        assert_eq!(ctrls.len(), 1);
        assert_eq!(ctrls[0].0.ctype, MANAGE_DSA_IT_OID);
        assert!(ctrls[0].0.crit);
        assert!(ctrls[0].0.val.is_none());
    }

    #[test]
    fn round_trips_a_control_with_a_value() {
        let c = Control::pwexpiring(42);
        let tag = c.encode();
        let ctrls = parse_controls(StructureTag {
            class: TagClass::Universal,
            id: universal::SEQUENCE,
            payload: Payload::Constructed(vec![tag]),
        })
        .expect("parses");
        assert_eq!(ctrls[0].0.val.as_deref(), Some(b"42".as_ref()));
    }

    #[test]
    fn control_name_falls_back_to_the_oid_itself() {
        assert_eq!(control_name(MANAGE_DSA_IT_OID), "ManageDsaIT");
        assert_eq!(control_name("1.2.3.4"), "1.2.3.4");
    }

    #[test]
    fn entry_change_notification_round_trips_through_the_inverse_encoder() {
        let ecn = EntryChangeNotification {
            change_type: crate::psearch::change_type::MODDN,
            previous_dn: Some("cn=old,dc=example".to_string()),
            change_number: Some(17),
        };
        let encoded = encode_entry_change_notification(&ecn);
        let decoded = decode_entry_change_notification(&encoded).expect("decodes");
        assert_eq!(decoded, ecn);
    }

    #[test]
    fn entry_change_notification_round_trips_with_no_optional_fields() {
        let ecn = EntryChangeNotification { change_type: crate::psearch::change_type::ADD, previous_dn: None, change_number: None };
        let encoded = encode_entry_change_notification(&ecn);
        let decoded = decode_entry_change_notification(&encoded).expect("decodes");
        assert_eq!(decoded, ecn);
    }
}
