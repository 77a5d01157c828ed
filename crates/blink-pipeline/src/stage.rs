//! The stage contract.

use blink_proto::Address;
use bytes::Bytes;

use crate::error::StageError;

/// Traffic direction through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Into the tunnel: what the client sends upstream, what the server
    /// sends back to the client.
    Upward,
    /// Out of the tunnel: replies reaching the client, requests reaching
    /// the server.
    Downward,
}

/// Which end of the tunnel this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Whether the tunnel carries a byte stream or datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// Collects what a stage produces for one input buffer.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub(crate) chunks: Vec<Bytes>,
    pub(crate) connect: Option<Address>,
}

impl StageOutput {
    /// Pass `chunk` on to the next stage (or out of the pipeline).
    pub fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Report the destination learned from the stream.
    pub fn connect(&mut self, target: Address) {
        self.connect = Some(target);
    }
}

/// One transform layer.
///
/// A stage owns only per-connection state; it is built fresh for every
/// connection and never shared. `upward` and `downward` may emit any number
/// of chunks, including none while waiting for more input.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    fn upward(&mut self, data: Bytes, out: &mut StageOutput) -> Result<(), StageError>;

    fn downward(&mut self, data: Bytes, out: &mut StageOutput) -> Result<(), StageError>;
}
