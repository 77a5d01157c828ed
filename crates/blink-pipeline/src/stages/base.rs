//! Destination address framing.
//!
//! Stream mode: the client prefixes the first upward chunk with
//! `ATYP | ADDR | PORT`; the server accumulates downward bytes until the
//! header is complete, reports the destination and forwards the rest.
//!
//! Datagram mode: every datagram in both directions carries the header.

use blink_proto::{Address, ParseResult, parse_address, write_address};
use bytes::{Bytes, BytesMut};

use crate::error::StageError;
use crate::stage::{Role, Stage, StageOutput, TransportKind};

pub const NAME: &str = "base";

pub struct BaseStage {
    role: Role,
    kind: TransportKind,
    target: Option<Address>,
    header_done: bool,
    pending: BytesMut,
}

impl BaseStage {
    /// `target` is required on the client; the server learns it.
    pub fn new(role: Role, kind: TransportKind, target: Option<Address>) -> Self {
        Self {
            role,
            kind,
            target,
            header_done: false,
            pending: BytesMut::new(),
        }
    }

    fn prefix(&self, data: &[u8]) -> Result<Bytes, StageError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| StageError::Malformed("destination unknown".into()))?;
        let mut buf = BytesMut::with_capacity(target.encoded_len() + data.len());
        write_address(&mut buf, target).map_err(|e| StageError::Malformed(e.to_string()))?;
        buf.extend_from_slice(data);
        Ok(buf.freeze())
    }

    fn strip_datagram(data: &Bytes) -> Result<(Address, Bytes), StageError> {
        match parse_address(data) {
            ParseResult::Complete((address, len)) => Ok((address, data.slice(len..))),
            ParseResult::Incomplete(_) => {
                Err(StageError::Malformed("truncated datagram header".into()))
            }
            ParseResult::Invalid(e) => Err(StageError::Malformed(e.to_string())),
        }
    }

    fn accept_stream_header(&mut self, data: Bytes, out: &mut StageOutput) -> Result<(), StageError> {
        self.pending.extend_from_slice(&data);
        match parse_address(&self.pending) {
            ParseResult::Complete((address, len)) => {
                let rest = self.pending.split().freeze().slice(len..);
                self.header_done = true;
                self.target = Some(address.clone());
                out.connect(address);
                out.push(rest);
                Ok(())
            }
            ParseResult::Incomplete(_) => Ok(()),
            ParseResult::Invalid(e) => Err(StageError::Malformed(e.to_string())),
        }
    }
}

impl Stage for BaseStage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn upward(&mut self, data: Bytes, out: &mut StageOutput) -> Result<(), StageError> {
        match (self.role, self.kind) {
            (Role::Client, TransportKind::Tcp) if !self.header_done => {
                self.header_done = true;
                out.push(self.prefix(&data)?);
            }
            (_, TransportKind::Udp) => out.push(self.prefix(&data)?),
            _ => out.push(data),
        }
        Ok(())
    }

    fn downward(&mut self, data: Bytes, out: &mut StageOutput) -> Result<(), StageError> {
        match (self.role, self.kind) {
            (Role::Server, TransportKind::Tcp) if !self.header_done => {
                self.accept_stream_header(data, out)?;
            }
            (Role::Server, TransportKind::Udp) => {
                let (address, payload) = Self::strip_datagram(&data)?;
                if self.target.is_none() {
                    self.target = Some(address.clone());
                    out.connect(address);
                }
                out.push(payload);
            }
            (Role::Client, TransportKind::Udp) => {
                let (_, payload) = Self::strip_datagram(&data)?;
                out.push(payload);
            }
            _ => out.push(data),
        }
        Ok(())
    }
}
