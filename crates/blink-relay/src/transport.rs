//! Transport endpoints owned by a connection.
//!
//! A [`Transport`] is a read half and a write half chosen at construction:
//! a byte stream (TCP, or anything `AsyncRead + AsyncWrite`), a connected
//! UDP socket, or one peer's session on a shared UDP listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use blink_core::defaults::DEFAULT_MAX_UDP_PAYLOAD;
use blink_pipeline::TransportKind;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::util::{connect_with_buffers, udp_bind_for};

/// Receiving side of a transport.
///
/// `recv` must be cancel-safe: dropping the future before it resolves must
/// not lose data.
#[async_trait]
pub trait TransportRead: Send {
    /// The next chunk, or `None` once the peer has closed.
    async fn recv(&mut self) -> io::Result<Option<Bytes>>;
}

/// Sending side of a transport.
#[async_trait]
pub trait TransportWrite: Send {
    async fn send(&mut self, data: Bytes) -> io::Result<()>;

    /// Flush and signal end of stream. Datagram transports have nothing to do.
    async fn shutdown(&mut self) -> io::Result<()>;
}

pub struct Transport {
    pub kind: TransportKind,
    pub reader: Box<dyn TransportRead>,
    pub writer: Box<dyn TransportWrite>,
}

impl Transport {
    /// Wrap a byte stream, reading at most `buffer_size` bytes per chunk.
    pub fn stream<S>(io: S, buffer_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self {
            kind: TransportKind::Tcp,
            reader: Box::new(StreamReader {
                inner: reader,
                buf: BytesMut::with_capacity(buffer_size),
                chunk: buffer_size.max(1),
            }),
            writer: Box::new(StreamWriter { inner: writer }),
        }
    }

    /// A UDP socket already `connect`ed to its peer.
    pub fn connected_udp(socket: UdpSocket) -> Self {
        let socket = Arc::new(socket);
        Self {
            kind: TransportKind::Udp,
            reader: Box::new(UdpReader {
                socket: socket.clone(),
                buf: BytesMut::with_capacity(DEFAULT_MAX_UDP_PAYLOAD),
            }),
            writer: Box::new(UdpWriter { socket }),
        }
    }

    /// One peer's datagrams, demultiplexed from a shared listening socket.
    pub fn udp_session(
        inbox: mpsc::Receiver<Bytes>,
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    ) -> Self {
        Self {
            kind: TransportKind::Udp,
            reader: Box::new(SessionReader { inbox }),
            writer: Box::new(SessionWriter { socket, peer }),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("kind", &self.kind).finish()
    }
}

struct StreamReader<S> {
    inner: ReadHalf<S>,
    buf: BytesMut,
    chunk: usize,
}

#[async_trait]
impl<S: AsyncRead + Send> TransportRead for StreamReader<S> {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        self.buf.reserve(self.chunk);
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }
}

struct StreamWriter<S> {
    inner: WriteHalf<S>,
}

#[async_trait]
impl<S: AsyncWrite + Send> TransportWrite for StreamWriter<S> {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.inner.write_all(&data).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

struct UdpReader {
    socket: Arc<UdpSocket>,
    buf: BytesMut,
}

#[async_trait]
impl TransportRead for UdpReader {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        self.buf.clear();
        self.buf.reserve(DEFAULT_MAX_UDP_PAYLOAD);
        let n = self.socket.recv_buf(&mut self.buf).await?;
        Ok(Some(self.buf.split_to(n).freeze()))
    }
}

struct UdpWriter {
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl TransportWrite for UdpWriter {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.socket.send(&data).await.map(|_| ())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct SessionReader {
    inbox: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl TransportRead for SessionReader {
    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.inbox.recv().await)
    }
}

struct SessionWriter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl TransportWrite for SessionWriter {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.socket.send_to(&data, self.peer).await.map(|_| ())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens upstream transports.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr, kind: TransportKind) -> io::Result<Transport>;
}

/// Dials real sockets.
#[derive(Debug, Clone)]
pub struct NetDialer {
    pub relay_buffer_size: usize,
    pub tcp_send_buffer: usize,
    pub tcp_recv_buffer: usize,
}

#[async_trait]
impl Dialer for NetDialer {
    async fn dial(&self, addr: SocketAddr, kind: TransportKind) -> io::Result<Transport> {
        match kind {
            TransportKind::Tcp => {
                let stream =
                    connect_with_buffers(addr, self.tcp_send_buffer, self.tcp_recv_buffer).await?;
                let _ = stream.set_nodelay(true);
                Ok(Transport::stream(stream, self.relay_buffer_size))
            }
            TransportKind::Udp => {
                let socket = UdpSocket::bind(udp_bind_for(&addr)).await?;
                socket.connect(addr).await?;
                Ok(Transport::connected_udp(socket))
            }
        }
    }
}
