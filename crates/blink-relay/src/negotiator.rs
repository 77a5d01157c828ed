//! Front-end protocol detection for client nodes.
//!
//! Stream connections are offered to the SOCKS5 parser first, then to the
//! HTTP proxy parser. UDP sessions carry SOCKS5 UDP request messages. The
//! first parser that matches yields the destination; after that every byte
//! bypasses the negotiator.
//!
//! Input no parser recognises is not an error: it is discarded and the
//! negotiator keeps answering [`Step::Pending`] until the idle timer closes
//! the connection. Only SOCKS5 refusals that carry a reply code reject.

use std::io;

use blink_pipeline::TransportKind;
use blink_proto::socks5::{
    self, CMD_BIND, CMD_CONNECT, CMD_UDP_ASSOCIATE, METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH,
    REPLY_ADDRESS_TYPE_NOT_SUPPORTED, REPLY_COMMAND_NOT_SUPPORTED, REPLY_GENERAL_FAILURE,
    REPLY_SUCCEEDED, SOCKS5_VERSION, UdpRequestMessage,
};
use blink_proto::{Address, HttpRequestMessage, ParseError, ParseResult};
use bytes::{Buf, Bytes, BytesMut};

const HTTP_TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const HTTP_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";
const HTTP_DEFAULT_PORT: u16 = 80;
const HTTPS_DEFAULT_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Socks5,
    Http,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Socks5 => "socks5",
            Protocol::Http => "http",
            Protocol::Udp => "udp",
        }
    }
}

/// How to answer the client once the upstream is connected (or failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    None,
    Socks5,
    HttpTunnel,
}

impl Ack {
    pub fn success(&self) -> Option<Bytes> {
        match self {
            Ack::None => None,
            Ack::Socks5 => Some(socks5::reply_unspecified(REPLY_SUCCEEDED)),
            Ack::HttpTunnel => Some(Bytes::from_static(HTTP_TUNNEL_ESTABLISHED)),
        }
    }

    pub fn failure(&self, err: Option<&io::Error>) -> Option<Bytes> {
        match self {
            Ack::None => None,
            Ack::Socks5 => Some(socks5::reply_unspecified(
                err.map_or(REPLY_GENERAL_FAILURE, socks5::reply_code_for_connect_error),
            )),
            Ack::HttpTunnel => Some(Bytes::from_static(HTTP_BAD_GATEWAY)),
        }
    }
}

/// A recovered destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: Protocol,
    pub target: Address,
    /// Bytes that arrived with (or as part of) the handshake and must be
    /// forwarded once the upstream is open.
    pub payload: Bytes,
    pub ack: Ack,
}

/// Outcome of one `handshake` call.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// Need more bytes.
    Pending,
    /// Send these bytes to the client and keep negotiating.
    Reply(Bytes),
    /// A SOCKS5 UDP ASSOCIATE was accepted; the stream only keeps the
    /// association alive from now on.
    Associate,
    Done(Handshake),
    /// An unidentified datagram; drop it and keep the session.
    Discard,
    /// Refused. `reply` goes to the client before closing.
    Rejected { reason: String, reply: Option<Bytes> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Detect,
    Socks5Request,
    Associated,
    /// Nothing matched; inbound bytes are dropped.
    Unmatched,
    Done,
}

pub struct ClientHandshakeNegotiator {
    kind: TransportKind,
    state: State,
    buf: BytesMut,
    max_header_bytes: usize,
}

impl ClientHandshakeNegotiator {
    pub fn new(kind: TransportKind, max_header_bytes: usize) -> Self {
        Self {
            kind,
            state: State::Detect,
            buf: BytesMut::new(),
            max_header_bytes,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// No parser recognised the client's bytes.
    pub fn is_unmatched(&self) -> bool {
        self.state == State::Unmatched
    }

    /// Bytes received but not yet consumed by a parser.
    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Feed one inbound chunk (or datagram). Call again with an empty slice
    /// after a [`Step::Reply`] while [`has_buffered`](Self::has_buffered).
    pub fn handshake(&mut self, data: &[u8]) -> Step {
        if matches!(self.state, State::Done | State::Associated | State::Unmatched) {
            return Step::Pending;
        }
        if self.kind == TransportKind::Udp {
            return self.datagram(data);
        }

        self.buf.extend_from_slice(data);
        if self.buf.is_empty() {
            return Step::Pending;
        }
        let step = match self.state {
            State::Detect if self.buf[0] == SOCKS5_VERSION => self.socks5_greeting(),
            State::Detect if self.buf[0].is_ascii_uppercase() => self.http(),
            State::Detect => self.unmatched(),
            State::Socks5Request => self.socks5_request(),
            State::Associated | State::Unmatched | State::Done => Step::Pending,
        };
        if step == Step::Pending && self.buf.len() > self.max_header_bytes {
            return self.unmatched();
        }
        step
    }

    fn datagram(&mut self, data: &[u8]) -> Step {
        match UdpRequestMessage::parse(&Bytes::copy_from_slice(data)) {
            Some(message) => {
                self.state = State::Done;
                Step::Done(Handshake {
                    protocol: Protocol::Udp,
                    target: message.address,
                    payload: message.data,
                    ack: Ack::None,
                })
            }
            None => Step::Discard,
        }
    }

    fn socks5_greeting(&mut self) -> Step {
        match socks5::parse_greeting(&self.buf) {
            ParseResult::Incomplete(_) => Step::Pending,
            ParseResult::Invalid(_) => self.unmatched(),
            ParseResult::Complete(greeting) => {
                if !greeting.accepts_no_auth() {
                    return self.reject(
                        "socks5: no acceptable auth method".into(),
                        Some(Bytes::copy_from_slice(&socks5::method_reply(
                            METHOD_NO_ACCEPTABLE,
                        ))),
                    );
                }
                self.buf.advance(greeting.len);
                self.state = State::Socks5Request;
                Step::Reply(Bytes::copy_from_slice(&socks5::method_reply(
                    METHOD_NO_AUTH,
                )))
            }
        }
    }

    fn socks5_request(&mut self) -> Step {
        match socks5::parse_request(&self.buf) {
            ParseResult::Incomplete(_) => Step::Pending,
            ParseResult::Invalid(ParseError::InvalidAtyp(atyp)) => self.reject(
                format!("socks5: unsupported address type {atyp:#04x}"),
                Some(socks5::reply_unspecified(REPLY_ADDRESS_TYPE_NOT_SUPPORTED)),
            ),
            ParseResult::Invalid(ParseError::InvalidCommand(cmd)) => self.reject(
                format!("socks5: unsupported command {cmd:#04x}"),
                Some(socks5::reply_unspecified(REPLY_COMMAND_NOT_SUPPORTED)),
            ),
            ParseResult::Invalid(e) => self.reject(
                format!("socks5 request: {e}"),
                Some(socks5::reply_unspecified(REPLY_GENERAL_FAILURE)),
            ),
            ParseResult::Complete(request) => match request.command {
                CMD_CONNECT => {
                    self.buf.advance(request.len);
                    self.state = State::Done;
                    Step::Done(Handshake {
                        protocol: Protocol::Socks5,
                        target: request.address,
                        payload: self.buf.split().freeze(),
                        ack: Ack::Socks5,
                    })
                }
                CMD_UDP_ASSOCIATE => {
                    self.buf.clear();
                    self.state = State::Associated;
                    Step::Associate
                }
                CMD_BIND => self.reject(
                    "socks5: BIND is not supported".into(),
                    Some(socks5::reply_unspecified(REPLY_COMMAND_NOT_SUPPORTED)),
                ),
                cmd => self.reject(
                    format!("socks5: unsupported command {cmd:#04x}"),
                    Some(socks5::reply_unspecified(REPLY_COMMAND_NOT_SUPPORTED)),
                ),
            },
        }
    }

    fn http(&mut self) -> Step {
        let Some(head_end) = find_head_end(&self.buf) else {
            return Step::Pending;
        };
        let Some(request) = HttpRequestMessage::parse(&self.buf[..head_end]) else {
            return self.unmatched();
        };
        let Some(target) = http_target(&request) else {
            return self.unmatched();
        };

        self.state = State::Done;
        if request.is_connect() {
            self.buf.advance(head_end);
            Step::Done(Handshake {
                protocol: Protocol::Http,
                target,
                payload: self.buf.split().freeze(),
                ack: Ack::HttpTunnel,
            })
        } else {
            Step::Done(Handshake {
                protocol: Protocol::Http,
                target,
                payload: self.buf.split().freeze(),
                ack: Ack::None,
            })
        }
    }

    fn unmatched(&mut self) -> Step {
        self.buf = BytesMut::new();
        self.state = State::Unmatched;
        Step::Pending
    }

    fn reject(&mut self, reason: String, reply: Option<Bytes>) -> Step {
        self.buf.clear();
        Step::Rejected { reason, reply }
    }
}

/// Offset just past the `\r\n\r\n` that ends a request head.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// CONNECT tunnels to the request-target, falling back to `Host`; other
/// methods go to `Host` on port 80 unless it names a port.
fn http_target(request: &HttpRequestMessage) -> Option<Address> {
    let host = std::str::from_utf8(&request.host).ok()?;
    if request.is_connect() {
        let uri = std::str::from_utf8(&request.uri).ok()?;
        Address::parse_with_default(uri, HTTPS_DEFAULT_PORT)
            .or_else(|_| Address::parse_with_default(host, HTTPS_DEFAULT_PORT))
            .ok()
    } else {
        Address::parse_with_default(host, HTTP_DEFAULT_PORT).ok()
    }
}

/// Strip the SOCKS5 UDP header from a datagram, or `None` if it has none.
pub fn unwrap_datagram(data: &Bytes) -> Option<(Address, Bytes)> {
    UdpRequestMessage::parse(data).map(|m| (m.address, m.data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_request(host: &str, port: u16) -> Vec<u8> {
        let mut req = vec![0x05, CMD_CONNECT, 0x00, blink_proto::ATYP_DOMAIN, host.len() as u8];
        req.extend_from_slice(host.as_bytes());
        req.extend_from_slice(&port.to_be_bytes());
        req
    }

    fn stream() -> ClientHandshakeNegotiator {
        ClientHandshakeNegotiator::new(TransportKind::Tcp, 1024)
    }

    #[test]
    fn socks5_connect() {
        let mut n = stream();
        assert_eq!(
            n.handshake(&[0x05, 0x01, 0x00]),
            Step::Reply(Bytes::from_static(&[0x05, 0x00]))
        );
        assert!(!n.is_done());

        let mut req = connect_request("example.com", 443);
        req.extend_from_slice(b"hi");
        let Step::Done(hs) = n.handshake(&req) else {
            panic!("expected done");
        };
        assert_eq!(hs.protocol, Protocol::Socks5);
        assert_eq!(hs.target, Address::domain("example.com", 443));
        assert_eq!(&hs.payload[..], b"hi");
        assert_eq!(hs.ack, Ack::Socks5);
        assert!(n.is_done());
        assert_eq!(n.handshake(b"more"), Step::Pending);
    }

    #[test]
    fn socks5_pipelined_and_split() {
        let mut n = stream();
        let mut first = vec![0x05, 0x01, 0x00];
        let req = connect_request("example.com", 80);
        first.extend_from_slice(&req[..5]);

        assert!(matches!(n.handshake(&first), Step::Reply(_)));
        assert!(n.has_buffered());
        assert_eq!(n.handshake(&[]), Step::Pending);

        let Step::Done(hs) = n.handshake(&req[5..]) else {
            panic!("expected done");
        };
        assert_eq!(hs.target.port, 80);
        assert!(hs.payload.is_empty());
    }

    #[test]
    fn socks5_refusals() {
        let mut n = stream();
        assert_eq!(
            n.handshake(&[0x05, 0x01, 0x02]),
            Step::Rejected {
                reason: "socks5: no acceptable auth method".into(),
                reply: Some(Bytes::from_static(&[0x05, METHOD_NO_ACCEPTABLE])),
            }
        );

        let mut n = stream();
        n.handshake(&[0x05, 0x01, 0x00]);
        let mut bind = connect_request("example.com", 80);
        bind[1] = CMD_BIND;
        let Step::Rejected { reply: Some(reply), .. } = n.handshake(&bind) else {
            panic!("expected rejection");
        };
        assert_eq!(reply[1], REPLY_COMMAND_NOT_SUPPORTED);
    }

    #[test]
    fn socks5_udp_associate_holds() {
        let mut n = stream();
        n.handshake(&[0x05, 0x01, 0x00]);
        let assoc = [0x05, CMD_UDP_ASSOCIATE, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        assert_eq!(n.handshake(&assoc), Step::Associate);
        assert_eq!(n.handshake(b"ignored"), Step::Pending);
        assert!(!n.is_done());
    }

    #[test]
    fn http_connect_tunnel() {
        let mut n = stream();
        let head = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        assert_eq!(n.handshake(&head[..20]), Step::Pending);
        let Step::Done(hs) = n.handshake(&head[20..]) else {
            panic!("expected done");
        };
        assert_eq!(hs.protocol, Protocol::Http);
        assert_eq!(hs.target, Address::domain("example.com", 443));
        assert!(hs.payload.is_empty());
        assert_eq!(
            hs.ack.success().as_deref(),
            Some(&b"HTTP/1.1 200 Connection Established\r\n\r\n"[..])
        );
    }

    #[test]
    fn http_plain_request_is_forwarded() {
        let mut n = stream();
        let req = b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let Step::Done(hs) = n.handshake(req) else {
            panic!("expected done");
        };
        assert_eq!(hs.target, Address::domain("example.com", 80));
        assert_eq!(&hs.payload[..], &req[..]);
        assert_eq!(hs.ack, Ack::None);
    }

    #[test]
    fn unknown_method_waits() {
        let mut n = stream();
        let step = n.handshake(b"BREW /pot HTTP/1.1\r\nHost: tea.example\r\n\r\n");
        assert_eq!(step, Step::Pending);
        assert!(n.is_unmatched());
        assert!(!n.is_done());
    }

    #[test]
    fn binary_garbage_is_dropped() {
        let mut n = stream();
        assert_eq!(n.handshake(&[0x16, 0x03, 0x01]), Step::Pending);
        assert!(n.is_unmatched());
        assert!(!n.has_buffered());

        // A later valid greeting does not revive the negotiation.
        assert_eq!(n.handshake(&[0x05, 0x01, 0x00]), Step::Pending);
        assert!(!n.has_buffered());
    }

    #[test]
    fn oversized_head_is_dropped() {
        let mut n = ClientHandshakeNegotiator::new(TransportKind::Tcp, 64);
        assert_eq!(n.handshake(b"GET / HTTP/1.1\r\n"), Step::Pending);
        assert!(!n.is_unmatched());
        assert_eq!(n.handshake(&[b'a'; 64]), Step::Pending);
        assert!(n.is_unmatched());
        assert!(!n.has_buffered());
        assert_eq!(n.handshake(&[b'a'; 4096]), Step::Pending);
        assert!(!n.has_buffered());
    }

    #[test]
    fn udp_datagrams() {
        let mut n = ClientHandshakeNegotiator::new(TransportKind::Udp, 1024);
        assert_eq!(n.handshake(b"junk"), Step::Discard);

        let dgram = [0, 0, 0, 0x01, 127, 0, 0, 1, 0x00, 0x35, b'q'];
        let Step::Done(hs) = n.handshake(&dgram) else {
            panic!("expected done");
        };
        assert_eq!(hs.protocol, Protocol::Udp);
        assert_eq!(hs.target.to_string(), "127.0.0.1:53");
        assert_eq!(&hs.payload[..], b"q");

        let (addr, data) = unwrap_datagram(&Bytes::copy_from_slice(&dgram)).unwrap();
        assert_eq!(addr.port, 53);
        assert_eq!(&data[..], b"q");
    }
}
