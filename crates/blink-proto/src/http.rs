//! HTTP proxy request detection.
//!
//! ```text
//! +----------------------------------------+
//! |  CONNECT www.bing.com:443 HTTP/1.1\r\n |
//! |  Host: www.bing.com\r\n                |
//! |  [...Headers]                          |
//! |  \r\n                                  |
//! +----------------------------------------+
//! ```

use bytes::Bytes;

/// Requests shorter than this are never matched.
pub const MIN_REQUEST_LEN: usize = 20;

pub const METHODS: [&str; 8] = [
    "OPTIONS", "GET", "HEAD", "POST", "PUT", "DELETE", "TRACE", "CONNECT",
];

/// The parts of an HTTP request head needed to pick a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestMessage {
    pub method: Bytes,
    pub uri: Bytes,
    pub version: Bytes,
    pub host: Bytes,
}

impl HttpRequestMessage {
    /// Match a request head.
    ///
    /// The buffer must be at least [`MIN_REQUEST_LEN`] bytes, split into at
    /// least four CRLF-separated lines, start with a known method, and carry a
    /// `Host: ` header among the lines between the request line and the final
    /// two. Anything else is `None`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < MIN_REQUEST_LEN {
            return None;
        }
        let text = String::from_utf8_lossy(buf);
        let lines: Vec<&str> = text.split("\r\n").collect();
        if lines.len() < 4 {
            return None;
        }

        let mut request_line = lines[0].split(' ');
        let method = request_line.next()?;
        if !METHODS.contains(&method) {
            return None;
        }
        let uri = request_line.next()?;
        let version = request_line.next()?;

        let host = lines[1..lines.len() - 2]
            .iter()
            .find_map(|line| line.strip_prefix("Host: "))?;
        let host = host.split(' ').next().unwrap_or_default();

        Some(Self {
            method: Bytes::copy_from_slice(method.as_bytes()),
            uri: Bytes::copy_from_slice(uri.as_bytes()),
            version: Bytes::copy_from_slice(version.as_bytes()),
            host: Bytes::copy_from_slice(host.as_bytes()),
        })
    }

    pub fn is_connect(&self) -> bool {
        &self.method[..] == b"CONNECT"
    }
}
