//! SOCKS5 messages (RFC 1928), parsed from buffers rather than streams so a
//! handshake can arrive split across any number of reads.

use std::io;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::{Address, parse_address_body, write_address};
use crate::{ParseError, ParseResult, WriteError};

pub const SOCKS5_VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

/// SOCKS5 reply codes.
pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_TTL_EXPIRED: u8 = 0x06;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Method-selection greeting: `VER | NMETHODS | METHODS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
    pub len: usize,
}

impl Greeting {
    pub fn accepts_no_auth(&self) -> bool {
        self.methods.contains(&METHOD_NO_AUTH)
    }
}

/// Request: `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: u8,
    pub address: Address,
    pub len: usize,
}

/// UDP request header: `RSV | FRAG | ATYP | DST.ADDR | DST.PORT | DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpRequestMessage {
    pub address: Address,
    pub data: Bytes,
}

pub fn parse_greeting(buf: &[u8]) -> ParseResult<Greeting> {
    if buf.len() < 2 {
        return ParseResult::Incomplete(2);
    }
    if buf[0] != SOCKS5_VERSION {
        return ParseResult::Invalid(ParseError::InvalidVersion(buf[0]));
    }
    let len = 2 + buf[1] as usize;
    if buf.len() < len {
        return ParseResult::Incomplete(len);
    }
    ParseResult::Complete(Greeting {
        methods: buf[2..len].to_vec(),
        len,
    })
}

pub fn parse_request(buf: &[u8]) -> ParseResult<Request> {
    if buf.len() < 4 {
        return ParseResult::Incomplete(4);
    }
    if buf[0] != SOCKS5_VERSION {
        return ParseResult::Invalid(ParseError::InvalidVersion(buf[0]));
    }
    let command = buf[1];
    if !matches!(command, CMD_CONNECT | CMD_BIND | CMD_UDP_ASSOCIATE) {
        return ParseResult::Invalid(ParseError::InvalidCommand(command));
    }
    match parse_address_body(buf[3], &buf[4..]) {
        ParseResult::Complete((address, addr_len)) => ParseResult::Complete(Request {
            command,
            address,
            len: 4 + addr_len,
        }),
        ParseResult::Incomplete(n) => ParseResult::Incomplete(4 + n),
        ParseResult::Invalid(e) => ParseResult::Invalid(e),
    }
}

impl UdpRequestMessage {
    /// Parse one complete datagram. Returns `None` for anything that is not a
    /// well-formed, unfragmented SOCKS5 UDP request.
    pub fn parse(buf: &Bytes) -> Option<Self> {
        if buf.len() < 4 || buf[0] != 0x00 || buf[1] != 0x00 {
            return None;
        }
        check_udp_fragment(buf).ok()?;
        match parse_address_body(buf[3], &buf[4..]) {
            ParseResult::Complete((address, addr_len)) => Some(Self {
                address,
                data: buf.slice(4 + addr_len..),
            }),
            _ => None,
        }
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<(), WriteError> {
        buf.reserve(3 + self.address.encoded_len() + self.data.len());
        buf.extend_from_slice(&[0x00, 0x00, 0x00]);
        write_address(buf, &self.address)?;
        buf.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Fails for a SOCKS5 UDP request (zero `RSV`) whose `FRAG` byte is set.
/// Anything else passes; it is left to [`UdpRequestMessage::parse`].
pub fn check_udp_fragment(buf: &[u8]) -> Result<(), ParseError> {
    match buf {
        [0x00, 0x00, frag, ..] if *frag != 0x00 => Err(ParseError::Fragmented),
        _ => Ok(()),
    }
}

/// `VER | METHOD` reply to a greeting.
pub fn method_reply(method: u8) -> [u8; 2] {
    [SOCKS5_VERSION, method]
}

/// `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`.
pub fn reply(code: u8, bind: &SocketAddr) -> Bytes {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_u8(SOCKS5_VERSION);
    buf.put_u8(code);
    buf.put_u8(0x00);
    // IP addresses always encode.
    let _ = write_address(&mut buf, &Address::from(*bind));
    buf.freeze()
}

/// A reply with a zeroed bind address (0.0.0.0:0).
pub fn reply_unspecified(code: u8) -> Bytes {
    reply(code, &SocketAddr::from(([0, 0, 0, 0], 0u16)))
}

/// Map a connect error to the closest SOCKS5 reply code.
pub fn reply_code_for_connect_error(err: &io::Error) -> u8 {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
        io::ErrorKind::TimedOut => REPLY_TTL_EXPIRED,
        io::ErrorKind::HostUnreachable => REPLY_HOST_UNREACHABLE,
        io::ErrorKind::NetworkUnreachable => REPLY_NETWORK_UNREACHABLE,
        io::ErrorKind::PermissionDenied => REPLY_CONNECTION_NOT_ALLOWED,
        _ => REPLY_GENERAL_FAILURE,
    }
}
