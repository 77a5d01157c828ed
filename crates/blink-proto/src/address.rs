//! Destination addresses and their SOCKS-style wire encoding.
//!
//! ```text
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! +------+----------+----------+
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, MAX_DOMAIN_LEN, ParseError, ParseResult, WriteError,
    read_u16,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Ipv4,
    Ipv6,
    Domain,
}

/// A destination: host plus port. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: Host,
    pub port: u16,
}

impl Address {
    pub fn new(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        Self::new(Host::Domain(name.into()), port)
    }

    pub fn kind(&self) -> AddressKind {
        match self.host {
            Host::Ipv4(_) => AddressKind::Ipv4,
            Host::Ipv6(_) => AddressKind::Ipv6,
            Host::Domain(_) => AddressKind::Domain,
        }
    }

    /// Host part as a string suitable for a resolver (IPv6 unbracketed).
    pub fn host_str(&self) -> String {
        match &self.host {
            Host::Ipv4(ip) => ip.to_string(),
            Host::Ipv6(ip) => ip.to_string(),
            Host::Domain(d) => d.clone(),
        }
    }

    /// The socket address when the host is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.host {
            Host::Ipv4(ip) => Some(SocketAddr::new(IpAddr::V4(ip), self.port)),
            Host::Ipv6(ip) => Some(SocketAddr::new(IpAddr::V6(ip), self.port)),
            Host::Domain(_) => None,
        }
    }

    /// Number of bytes [`write_address`] produces for this address.
    pub fn encoded_len(&self) -> usize {
        1 + match &self.host {
            Host::Ipv4(_) => 4,
            Host::Ipv6(_) => 16,
            Host::Domain(d) => 1 + d.len(),
        } + 2
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(ip) => Host::Ipv4(ip),
            IpAddr::V6(ip) => Host::Ipv6(ip),
        };
        Self::new(host, addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ipv4(ip) => write!(f, "{}:{}", ip, self.port),
            Host::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            Host::Domain(d) => write!(f, "{}:{}", d, self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

impl Address {
    /// Parse `host` with an optional `:port`, using `default_port` if absent.
    pub fn parse_with_default(s: &str, default_port: u16) -> Result<Self, AddressParseError> {
        let err = || AddressParseError(s.to_string());

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(err)?;
            let ip = host.parse::<Ipv6Addr>().map_err(|_| err())?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse::<u16>().map_err(|_| err())?,
                None if tail.is_empty() => default_port,
                None => return Err(err()),
            };
            return Ok(Self::new(Host::Ipv6(ip), port));
        }

        if let Ok(ip) = s.parse::<Ipv6Addr>() {
            return Ok(Self::new(Host::Ipv6(ip), default_port));
        }

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| err())?),
            None => (s, default_port),
        };
        if host.is_empty() || host.len() > MAX_DOMAIN_LEN {
            return Err(err());
        }
        let host = match host.parse::<Ipv4Addr>() {
            Ok(ip) => Host::Ipv4(ip),
            Err(_) => Host::Domain(host.to_string()),
        };
        Ok(Self::new(host, port))
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parse `"host:port"` or `"[ipv6]:port"`; the port is required.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let has_port = match s.strip_prefix('[') {
            Some(rest) => rest.contains("]:"),
            None => s.parse::<Ipv6Addr>().is_err() && s.contains(':'),
        };
        if !has_port {
            return Err(AddressParseError(s.to_string()));
        }
        Self::parse_with_default(s, 0)
    }
}

/// Parse `ATYP | ADDR | PORT` from the start of `buf`.
///
/// Returns the address and the number of bytes consumed.
pub fn parse_address(buf: &[u8]) -> ParseResult<(Address, usize)> {
    if buf.is_empty() {
        return ParseResult::Incomplete(1);
    }
    parse_address_body(buf[0], &buf[1..])
        .offset_by(1)
        .map_len(|len| len + 1)
}

/// Parse `ADDR | PORT` for an already-consumed address type byte.
pub(crate) fn parse_address_body(atyp: u8, buf: &[u8]) -> ParseResult<(Address, usize)> {
    match atyp {
        ATYP_IPV4 => {
            if buf.len() < 6 {
                return ParseResult::Incomplete(6);
            }
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = read_u16(&buf[4..6]);
            ParseResult::Complete((Address::new(Host::Ipv4(ip), port), 6))
        }
        ATYP_DOMAIN => {
            if buf.is_empty() {
                return ParseResult::Incomplete(1);
            }
            let len = buf[0] as usize;
            if len == 0 {
                return ParseResult::Invalid(ParseError::InvalidDomainLen);
            }
            let need = 1 + len + 2;
            if buf.len() < need {
                return ParseResult::Incomplete(need);
            }
            let Ok(domain) = std::str::from_utf8(&buf[1..1 + len]) else {
                return ParseResult::Invalid(ParseError::InvalidUtf8);
            };
            let port = read_u16(&buf[1 + len..need]);
            ParseResult::Complete((Address::domain(domain, port), need))
        }
        ATYP_IPV6 => {
            if buf.len() < 18 {
                return ParseResult::Incomplete(18);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[0..16]);
            let port = read_u16(&buf[16..18]);
            ParseResult::Complete((Address::new(Host::Ipv6(Ipv6Addr::from(octets)), port), 18))
        }
        other => ParseResult::Invalid(ParseError::InvalidAtyp(other)),
    }
}

impl<T> ParseResult<(T, usize)> {
    #[inline]
    fn map_len(self, f: impl FnOnce(usize) -> usize) -> Self {
        match self {
            ParseResult::Complete((v, len)) => ParseResult::Complete((v, f(len))),
            other => other,
        }
    }
}

/// Append `ATYP | ADDR | PORT` to `buf`.
#[allow(clippy::cast_possible_truncation)]
pub fn write_address(buf: &mut BytesMut, address: &Address) -> Result<(), WriteError> {
    match &address.host {
        Host::Ipv4(ip) => {
            buf.put_u8(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        Host::Ipv6(ip) => {
            buf.put_u8(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
        Host::Domain(domain) => {
            if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
                return Err(WriteError::DomainTooLong);
            }
            buf.put_u8(ATYP_DOMAIN);
            buf.put_u8(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
        }
    }
    buf.put_u16(address.port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_domain_address_with_trailing_payload() {
        let mut buf = BytesMut::new();
        write_address(&mut buf, &Address::domain("example.com", 443)).unwrap();
        buf.extend_from_slice(b"GET /");

        match parse_address(&buf) {
            ParseResult::Complete((addr, len)) => {
                assert_eq!(addr, Address::domain("example.com", 443));
                assert_eq!(len, 1 + 1 + 11 + 2);
                assert_eq!(&buf[len..], b"GET /");
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn parse_address_reports_total_needed() {
        assert_eq!(parse_address(&[]), ParseResult::Incomplete(1));
        assert_eq!(parse_address(&[ATYP_IPV4, 1, 2]), ParseResult::Incomplete(7));
        assert_eq!(parse_address(&[ATYP_DOMAIN]), ParseResult::Incomplete(2));
        assert_eq!(
            parse_address(&[ATYP_DOMAIN, 4, b'a']),
            ParseResult::Incomplete(1 + 1 + 4 + 2)
        );
        assert_eq!(parse_address(&[ATYP_IPV6, 0]), ParseResult::Incomplete(19));
    }

    #[test]
    fn parse_address_rejects_bad_atyp_and_empty_domain() {
        assert_eq!(
            parse_address(&[0x09, 0, 0]),
            ParseResult::Invalid(ParseError::InvalidAtyp(0x09))
        );
        assert_eq!(
            parse_address(&[ATYP_DOMAIN, 0, 0, 80]),
            ParseResult::Invalid(ParseError::InvalidDomainLen)
        );
    }

    #[test]
    fn write_address_ipv6() {
        let addr: Address = "[::1]:8080".parse().unwrap();
        let mut buf = BytesMut::new();
        write_address(&mut buf, &addr).unwrap();
        assert_eq!(buf.len(), addr.encoded_len());
        assert_eq!(buf[0], ATYP_IPV6);
        assert_eq!(&buf[17..], &8080u16.to_be_bytes());
    }

    #[test]
    fn write_address_domain_too_long() {
        let addr = Address::domain("a".repeat(256), 80);
        let mut buf = BytesMut::new();
        assert_eq!(write_address(&mut buf, &addr), Err(WriteError::DomainTooLong));
    }

    #[test]
    fn from_str_forms() {
        let addr: Address = "example.com:443".parse().unwrap();
        assert_eq!(addr.kind(), AddressKind::Domain);
        assert_eq!(addr.port, 443);

        let addr: Address = "10.0.0.1:80".parse().unwrap();
        assert_eq!(addr.kind(), AddressKind::Ipv4);
        assert_eq!(addr.to_string(), "10.0.0.1:80");

        let addr: Address = "[fe80::1]:53".parse().unwrap();
        assert_eq!(addr.kind(), AddressKind::Ipv6);
        assert_eq!(addr.to_string(), "[fe80::1]:53");

        "example.com".parse::<Address>().unwrap_err();
        "::1".parse::<Address>().unwrap_err();
        "host:notaport".parse::<Address>().unwrap_err();
    }

    #[test]
    fn parse_with_default_port() {
        let addr = Address::parse_with_default("example.com", 80).unwrap();
        assert_eq!(addr, Address::domain("example.com", 80));
        let addr = Address::parse_with_default("example.com:8080", 80).unwrap();
        assert_eq!(addr.port, 8080);
        let addr = Address::parse_with_default("[::1]", 80).unwrap();
        assert_eq!(addr.socket_addr().unwrap(), "[::1]:80".parse().unwrap());
    }
}
