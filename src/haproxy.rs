//! Component C12: HAProxy PROXY protocol v1 (text) and v2 (binary) header
//! parsing, gated by a trusted-source CIDR allow-list (spec §4.1 — only a
//! connection arriving from a configured trusted proxy may supply one).
//!
//! Test vectors grounded in `test/libslapd/haproxy/parse.c`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// The real client address and port a PROXY header reported, replacing the
/// TCP-level peer address for logging and ACL purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxiedAddr {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaProxyError {
    NotAHeader,
    Truncated,
    Malformed,
    UnsupportedFamily,
}

/// Try to parse a PROXY protocol header (v1 or v2) from the front of
/// `buf`. Returns the parsed address and how many bytes the header
/// occupied, so the caller can advance its read buffer past it before
/// framing the first real BER PDU.
pub fn parse_header(buf: &[u8]) -> Result<(ProxiedAddr, usize), HaProxyError> {
    if buf.starts_with(b"PROXY ") {
        parse_v1(buf)
    } else if buf.starts_with(&V2_SIGNATURE) {
        parse_v2(buf)
    } else if buf.len() < V2_SIGNATURE.len() && V2_SIGNATURE.starts_with(buf) {
        Err(HaProxyError::Truncated)
    } else {
        Err(HaProxyError::NotAHeader)
    }
}

fn parse_v1(buf: &[u8]) -> Result<(ProxiedAddr, usize), HaProxyError> {
    let nl = buf.iter().position(|&b| b == b'\n').ok_or(HaProxyError::Truncated)?;
    let line = &buf[..nl];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|_| HaProxyError::Malformed)?;
    let mut parts = text.split(' ');
    if parts.next() != Some("PROXY") {
        return Err(HaProxyError::Malformed);
    }
    let proto = parts.next().ok_or(HaProxyError::Malformed)?;
    if proto == "UNKNOWN" {
        // No further fields are guaranteed; still a valid header.
        return Ok((
            ProxiedAddr {
                src: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                dst: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            },
            nl + 1,
        ));
    }
    if proto != "TCP4" && proto != "TCP6" {
        return Err(HaProxyError::UnsupportedFamily);
    }
    let src_ip: IpAddr = parts.next().ok_or(HaProxyError::Malformed)?.parse().map_err(|_| HaProxyError::Malformed)?;
    let dst_ip: IpAddr = parts.next().ok_or(HaProxyError::Malformed)?.parse().map_err(|_| HaProxyError::Malformed)?;
    let src_port: u16 = parts.next().ok_or(HaProxyError::Malformed)?.parse().map_err(|_| HaProxyError::Malformed)?;
    let dst_port: u16 = parts.next().ok_or(HaProxyError::Malformed)?.parse().map_err(|_| HaProxyError::Malformed)?;
    Ok((ProxiedAddr { src: SocketAddr::new(src_ip, src_port), dst: SocketAddr::new(dst_ip, dst_port) }, nl + 1))
}

const V2_SIGNATURE: [u8; 12] = [0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A];

fn parse_v2(buf: &[u8]) -> Result<(ProxiedAddr, usize), HaProxyError> {
    if buf.len() < 16 {
        return Err(HaProxyError::Truncated);
    }
    let ver_cmd = buf[12];
    if ver_cmd >> 4 != 0x2 {
        return Err(HaProxyError::Malformed);
    }
    let cmd = ver_cmd & 0x0F;
    let fam_proto = buf[13];
    let family = fam_proto >> 4;
    let len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    let total = 16 + len;
    if buf.len() < total {
        return Err(HaProxyError::Truncated);
    }
    if cmd == 0x0 {
        // LOCAL: connection was health-checked by the proxy itself, not
        // forwarded; no address substitution applies.
        return Ok((
            ProxiedAddr {
                src: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                dst: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            },
            total,
        ));
    }
    let body = &buf[16..total];
    let addr = match family {
        0x1 => {
            if body.len() < 12 {
                return Err(HaProxyError::Truncated);
            }
            let src_ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            let dst_ip = Ipv4Addr::new(body[4], body[5], body[6], body[7]);
            let src_port = u16::from_be_bytes([body[8], body[9]]);
            let dst_port = u16::from_be_bytes([body[10], body[11]]);
            ProxiedAddr {
                src: SocketAddr::new(IpAddr::V4(src_ip), src_port),
                dst: SocketAddr::new(IpAddr::V4(dst_ip), dst_port),
            }
        }
        0x2 => {
            if body.len() < 36 {
                return Err(HaProxyError::Truncated);
            }
            let mut src_octets = [0u8; 16];
            let mut dst_octets = [0u8; 16];
            src_octets.copy_from_slice(&body[0..16]);
            dst_octets.copy_from_slice(&body[16..32]);
            let src_port = u16::from_be_bytes([body[32], body[33]]);
            let dst_port = u16::from_be_bytes([body[34], body[35]]);
            ProxiedAddr {
                src: SocketAddr::new(IpAddr::V6(Ipv6Addr::from(src_octets)), src_port),
                dst: SocketAddr::new(IpAddr::V6(Ipv6Addr::from(dst_octets)), dst_port),
            }
        }
        _ => return Err(HaProxyError::UnsupportedFamily),
    };
    Ok((addr, total))
}

/// A trusted-proxy allow-list entry: either a bare IP or a `base/prefixlen`
/// CIDR block (spec §6 `nsslapd-haproxy-trusted-ip`).
pub struct TrustedProxies {
    entries: Vec<(IpAddr, u8)>,
}

impl TrustedProxies {
    pub fn from_config(values: &[String]) -> TrustedProxies {
        let mut entries = Vec::new();
        for v in values {
            if let Some((base, len)) = v.split_once('/') {
                if let (Ok(ip), Ok(prefix)) = (base.parse::<IpAddr>(), len.parse::<u8>()) {
                    entries.push((ip, prefix));
                }
            } else if let Ok(ip) = v.parse::<IpAddr>() {
                let max_bits = if ip.is_ipv4() { 32 } else { 128 };
                entries.push((ip, max_bits));
            }
        }
        TrustedProxies { entries }
    }

    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        self.entries.iter().any(|(base, prefix)| in_cidr(addr, *base, *prefix))
    }
}

fn in_cidr(addr: IpAddr, base: IpAddr, prefix: u8) -> bool {
    match (addr, base) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let mask = if prefix == 0 {
                0u32
            } else if prefix >= 32 {
                u32::MAX
            } else {
                !0u32 << (32 - prefix)
            };
            (u32::from(a) & mask) == (u32::from(b) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            let mask = if prefix == 0 {
                0u128
            } else if prefix >= 128 {
                u128::MAX
            } else {
                !0u128 << (128 - prefix)
            };
            (u128::from(a) & mask) == (u128::from(b) & mask)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_v1_tcp4_header() {
        let buf = b"PROXY TCP4 192.168.1.1 192.168.1.2 56324 443\r\nGET".to_vec();
        let (addr, consumed) = parse_header(&buf).expect("parses");
        assert_eq!(addr.src, "192.168.1.1:56324".parse().unwrap());
        assert_eq!(addr.dst, "192.168.1.2:443".parse().unwrap());
        assert_eq!(&buf[consumed..], b"GET");
    }

    #[test]
    fn parses_a_v1_tcp6_header() {
        let buf = b"PROXY TCP6 ::1 ::1 1 2\r\n".to_vec();
        let (addr, _) = parse_header(&buf).expect("parses");
        assert_eq!(addr.src.ip(), "::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn v1_unknown_proto_yields_a_header_with_no_addresses() {
        let buf = b"PROXY UNKNOWN\r\nrest".to_vec();
        let (_addr, consumed) = parse_header(&buf).expect("parses");
        assert_eq!(&buf[consumed..], b"rest");
    }

    #[test]
    fn parses_a_v2_tcp4_header() {
        let mut buf = V2_SIGNATURE.to_vec();
        buf.push(0x21); // version 2, command PROXY
        buf.push(0x11); // AF_INET, STREAM
        buf.extend_from_slice(&12u16.to_be_bytes());
        buf.extend_from_slice(&[10, 0, 0, 1]);
        buf.extend_from_slice(&[10, 0, 0, 2]);
        buf.extend_from_slice(&1234u16.to_be_bytes());
        buf.extend_from_slice(&389u16.to_be_bytes());
        let (addr, consumed) = parse_header(&buf).expect("parses");
        assert_eq!(addr.src, "10.0.0.1:1234".parse().unwrap());
        assert_eq!(addr.dst, "10.0.0.2:389".parse().unwrap());
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_truncated_v2_header() {
        let buf = V2_SIGNATURE.to_vec();
        assert_eq!(parse_header(&buf), Err(HaProxyError::Truncated));
    }

    #[test]
    fn non_proxy_traffic_is_not_a_header() {
        let buf = b"\x30\x0c\x02\x01\x01\x60\x07".to_vec();
        assert_eq!(parse_header(&buf), Err(HaProxyError::NotAHeader));
    }

    #[test]
    fn trusted_proxies_matches_cidr_blocks() {
        let trusted = TrustedProxies::from_config(&["10.0.0.0/8".to_string(), "192.168.1.5".to_string()]);
        assert!(trusted.is_trusted("10.1.2.3".parse().unwrap()));
        assert!(trusted.is_trusted("192.168.1.5".parse().unwrap()));
        assert!(!trusted.is_trusted("192.168.1.6".parse().unwrap()));
    }

    #[test]
    fn prefix_zero_matches_every_address() {
        let trusted = TrustedProxies::from_config(&["0.0.0.0/0".to_string()]);
        assert!(trusted.is_trusted("1.2.3.4".parse().unwrap()));
        assert!(trusted.is_trusted("255.255.255.255".parse().unwrap()));

        let trusted6 = TrustedProxies::from_config(&["::/0".to_string()]);
        assert!(trusted6.is_trusted("::1".parse().unwrap()));
        assert!(trusted6.is_trusted("fe80::1".parse().unwrap()));
    }
}
