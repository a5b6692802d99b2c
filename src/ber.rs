//! BER framer (component C2) and the minimal ASN.1/BER tree used to decode
//! and encode LDAPv3 PDUs.
//!
//! The tree shape (`StructureTag`, `TagClass`, `Payload`) follows the
//! `StructureTag`/`PL` idiom used throughout the teacher crate's
//! `controls_impl`/`filter` modules, but the framer itself is hand-rolled:
//! it has to peek a length prefix off a live, possibly-partial byte stream
//! and report `WouldBlock` rather than parse a buffer that is assumed to be
//! complete, which a whole-buffer `nom` parser can't express.

use std::io::{self, Read};

use bytes::{Buf, BytesMut};

use crate::time::Counters;

/// ASN.1 tag class, encoded in the top two bits of the identifier octet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagClass {
    Universal,
    Application,
    Context,
    Private,
}

impl TagClass {
    fn from_bits(bits: u8) -> TagClass {
        match bits {
            0b00 => TagClass::Universal,
            0b01 => TagClass::Application,
            0b10 => TagClass::Context,
            _ => TagClass::Private,
        }
    }

    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0b00,
            TagClass::Application => 0b01,
            TagClass::Context => 0b10,
            TagClass::Private => 0b11,
        }
    }
}

/// Universal tag numbers actually used by LDAPv3.
pub mod universal {
    pub const BOOLEAN: u64 = 1;
    pub const INTEGER: u64 = 2;
    pub const OCTET_STRING: u64 = 4;
    pub const NULL: u64 = 5;
    pub const ENUMERATED: u64 = 10;
    pub const SEQUENCE: u64 = 16;
    pub const SET: u64 = 17;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Primitive(Vec<u8>),
    Constructed(Vec<StructureTag>),
}

/// A decoded (or to-be-encoded) BER tag: class, number, and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructureTag {
    pub class: TagClass,
    pub id: u64,
    pub payload: Payload,
}

impl StructureTag {
    pub fn is_constructed(&self) -> bool {
        matches!(self.payload, Payload::Constructed(_))
    }

    pub fn match_class(self, class: TagClass) -> Option<StructureTag> {
        if self.class == class {
            Some(self)
        } else {
            None
        }
    }

    pub fn match_id(self, id: u64) -> Option<StructureTag> {
        if self.id == id {
            Some(self)
        } else {
            None
        }
    }

    pub fn expect_constructed(self) -> Option<Vec<StructureTag>> {
        match self.payload {
            Payload::Constructed(v) => Some(v),
            Payload::Primitive(_) => None,
        }
    }

    pub fn expect_primitive(self) -> Option<Vec<u8>> {
        match self.payload {
            Payload::Primitive(v) => Some(v),
            Payload::Constructed(_) => None,
        }
    }

    /// Encode this tag (and its payload, recursively) into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let (body_start, constructed_bit) = (out.len(), if self.is_constructed() { 0x20 } else { 0x00 });
        debug_assert!(self.id <= 30, "high-tag-number form is unused by LDAPv3");
        let id_byte = (self.class.bits() << 6) | constructed_bit | self.id as u8;
        out.push(id_byte);
        let mut body = Vec::new();
        match &self.payload {
            Payload::Primitive(bytes) => body.extend_from_slice(bytes),
            Payload::Constructed(tags) => {
                for t in tags {
                    t.encode(&mut body);
                }
            }
        }
        encode_length(body.len() as u64, out);
        out.extend_from_slice(&body);
        let _ = body_start;
    }
}

fn encode_length(len: u64, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let mut bytes = Vec::new();
        let mut n = len;
        while n > 0 {
            bytes.push((n & 0xFF) as u8);
            n >>= 8;
        }
        bytes.reverse();
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
}

/// Parse an unsigned BER integer body (used for both lengths and INTEGER
/// primitives restricted to non-negative values).
pub fn parse_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Encode a signed value as a minimal two's-complement BER INTEGER body
/// (the inverse of `parse_int`), used when this crate originates a PDU
/// instead of decoding one (message IDs, result codes, abandon targets).
pub fn encode_int(n: i64) -> Vec<u8> {
    let mut bytes = n.to_be_bytes().to_vec();
    while bytes.len() > 1 && ((bytes[0] == 0x00 && bytes[1] & 0x80 == 0) || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0)) {
        bytes.remove(0);
    }
    bytes
}

/// Parse a signed BER INTEGER body (two's complement, big-endian).
pub fn parse_int(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut acc: i64 = if negative { -1 } else { 0 };
    for &b in bytes {
        acc = (acc << 8) | b as i64;
    }
    acc
}

/// Decode a single complete BER tag (and everything nested in it) from the
/// front of `input`, returning the tag and the number of bytes consumed.
/// Assumes `input` contains at least one whole tag; the framer guarantees
/// this before calling.
pub fn decode_tag(input: &[u8]) -> Option<(StructureTag, usize)> {
    if input.is_empty() {
        return None;
    }
    let id_byte = input[0];
    let class = TagClass::from_bits((id_byte >> 6) & 0b11);
    let constructed = id_byte & 0x20 != 0;
    let id = (id_byte & 0x1F) as u64;
    let (len, len_bytes) = decode_length(&input[1..])?;
    let header_len = 1 + len_bytes;
    let total_len = header_len + len as usize;
    if input.len() < total_len {
        return None;
    }
    let body = &input[header_len..total_len];
    let payload = if constructed {
        let mut inner = Vec::new();
        let mut off = 0;
        while off < body.len() {
            let (tag, consumed) = decode_tag(&body[off..])?;
            inner.push(tag);
            off += consumed;
        }
        Payload::Constructed(inner)
    } else {
        Payload::Primitive(body.to_vec())
    };
    Some((StructureTag { class, id, payload }, total_len))
}

/// Decode the outer `(class, id, length)` header only, returning the
/// declared body length and the number of octets the length field itself
/// occupied. Used by the framer to decide how many bytes a full PDU needs
/// without decoding the body.
fn decode_length(input: &[u8]) -> Option<(u64, usize)> {
    if input.is_empty() {
        return None;
    }
    let first = input[0];
    if first & 0x80 == 0 {
        Some((first as u64, 1))
    } else {
        let n = (first & 0x7F) as usize;
        if n == 0 {
            // indefinite length form: not used on the wire by LDAPv3
            return None;
        }
        if input.len() < 1 + n {
            return None;
        }
        Some((parse_uint(&input[1..1 + n]), 1 + n))
    }
}

/// Why a connection was torn down while framing a PDU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    BerTooBig,
    BadBerTag,
    ProtocolTimeout,
    Io,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::BerTooBig => "BER_TOO_BIG",
            DisconnectReason::BadBerTag => "BAD_BER_TAG",
            DisconnectReason::ProtocolTimeout => "B1",
            DisconnectReason::Io => "connection reset",
        }
    }
}

/// Outcome of one framing attempt (spec §4.2 `read_operation` contract).
pub enum FrameStatus {
    /// A complete PDU was decoded; any bytes belonging to the next PDU
    /// remain buffered (`remaining_data`).
    Ok { tag: StructureTag, remaining_data: bool },
    /// Not enough bytes are available yet; the caller should poll again.
    WouldBlock,
    /// The connection is fatally broken; it must be closed.
    Done(DisconnectReason),
}

/// Per-connection incremental BER reader. Owns the connection's read
/// buffer (spec §5 "read buffer is owned by the connection") and never
/// allocates more than `max_ber_size` bytes for a single PDU.
pub struct Framer {
    buf: BytesMut,
}

impl Framer {
    pub fn new() -> Framer {
        Framer { buf: BytesMut::with_capacity(4096) }
    }

    /// Clear residual state so the buffer can be reused by the next
    /// operation on the same connection (spec §4.7: "reuse the framer
    /// buffer ... never free it separately").
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Try to read one PDU. `max_ber_size == 0` means "no explicit limit"
    /// (spec §8 boundary case).
    pub fn read_operation<R: Read>(
        &mut self,
        reader: &mut R,
        max_ber_size: u64,
        counters: &Counters,
    ) -> FrameStatus {
        // First, see if we already have a full PDU buffered from a
        // previous short read.
        if let Some(status) = self.try_decode(max_ber_size) {
            return status;
        }
        let mut chunk = [0u8; 8192];
        match reader.read(&mut chunk) {
            Ok(0) => FrameStatus::Done(DisconnectReason::Io),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                counters.bytes_read.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
                match self.try_decode(max_ber_size) {
                    Some(status) => status,
                    None => FrameStatus::WouldBlock,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => FrameStatus::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => FrameStatus::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => FrameStatus::WouldBlock,
            Err(_) => FrameStatus::Done(DisconnectReason::Io),
        }
    }

    fn try_decode(&mut self, max_ber_size: u64) -> Option<FrameStatus> {
        if self.buf.is_empty() {
            return None;
        }
        let id_byte = self.buf[0];
        // The outer PDU is always a universal SEQUENCE.
        if (id_byte & 0x1F) as u64 != universal::SEQUENCE || id_byte & 0x20 == 0 {
            return Some(FrameStatus::Done(DisconnectReason::BadBerTag));
        }
        let header_and_len = match decode_length(&self.buf[1..]) {
            Some(v) => v,
            None => return None,
        };
        let (len, len_bytes) = header_and_len;
        if max_ber_size != 0 && len > max_ber_size {
            self.reset();
            return Some(FrameStatus::Done(DisconnectReason::BerTooBig));
        }
        let total_len = 1 + len_bytes + len as usize;
        if self.buf.len() < total_len {
            return None;
        }
        let (tag, consumed) = match decode_tag(&self.buf[..total_len]) {
            Some(v) => v,
            None => return Some(FrameStatus::Done(DisconnectReason::BadBerTag)),
        };
        self.buf.advance(consumed);
        let remaining_data = !self.buf.is_empty();
        Some(FrameStatus::Ok { tag, remaining_data })
    }
}

impl Default for Framer {
    fn default() -> Framer {
        Framer::new()
    }
}
