//! Wire formats understood by blinksocks-rs.
//!
//! Parsers here are pure functions over byte slices: they never mutate their
//! input and never panic on malformed data. Incremental parsers report how
//! many bytes they need through [`ParseResult::Incomplete`]; one-shot parsers
//! (the HTTP request line) return `None` when the input does not match.

pub mod address;
pub mod http;
pub mod socks5;

pub use address::{Address, AddressKind, Host, parse_address, write_address};
pub use http::HttpRequestMessage;

/// Maximum domain name length.
pub const MAX_DOMAIN_LEN: usize = 255;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unsupported protocol version {0:#04x}")]
    InvalidVersion(u8),
    #[error("unsupported command {0:#04x}")]
    InvalidCommand(u8),
    #[error("unsupported address type {0:#04x}")]
    InvalidAtyp(u8),
    #[error("invalid domain length")]
    InvalidDomainLen,
    #[error("domain is not valid utf-8")]
    InvalidUtf8,
    #[error("fragmented udp datagrams are not supported")]
    Fragmented,
}

/// Errors that can occur when writing protocol data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("domain exceeds 255 bytes")]
    DomainTooLong,
}

/// Parse result for incremental parsing.
///
/// - `Complete(T)` - parsing succeeded, contains the parsed value.
/// - `Incomplete(n)` - buffer too small; `n` is the **minimum total bytes** needed
///   (not the additional bytes needed). Caller should accumulate more data and retry.
/// - `Invalid(e)` - protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult<T> {
    Complete(T),
    Incomplete(usize),
    Invalid(ParseError),
}

impl<T> ParseResult<T> {
    /// Shift an `Incomplete` requirement by `offset` bytes of preceding data.
    #[inline]
    pub fn offset_by(self, offset: usize) -> Self {
        match self {
            ParseResult::Incomplete(n) => ParseResult::Incomplete(offset + n),
            other => other,
        }
    }
}

#[inline]
pub(crate) fn read_u16(buf: &[u8]) -> u16 {
    debug_assert!(buf.len() >= 2, "read_u16 requires at least 2 bytes");
    u16::from_be_bytes([buf[0], buf[1]])
}
