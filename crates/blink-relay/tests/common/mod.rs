//! Helpers shared by the relay integration tests.
#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use blink_config::{Config, UpstreamConfig};
use blink_core::defaults::DEFAULT_RELAY_BUFFER_SIZE;
use blink_dns::{DnsError, Lookup};
use blink_pipeline::{PresetConfig, Role, TransportKind};
use blink_relay::{Connection, ConnectionSummary, Dialer, RelayContext, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const PEER: &str = "127.0.0.1:50000";

/// Tests only use IP literals; any real lookup is a bug.
pub struct NoLookup;

#[async_trait]
impl Lookup for NoLookup {
    async fn lookup(&self, host: &str) -> Result<IpAddr, DnsError> {
        Err(DnsError::NoResults(host.to_string()))
    }
}

/// An upstream opened by [`PipeDialer`]: where it was dialed and the far end.
pub struct Dialed {
    pub addr: SocketAddr,
    pub stream: DuplexStream,
}

/// Dials in-memory pipes and hands their far ends to the test.
pub struct PipeDialer {
    tx: mpsc::UnboundedSender<Dialed>,
    capacity: usize,
    refuse: bool,
}

impl PipeDialer {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Dialed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            tx,
            capacity,
            refuse: false,
        });
        (dialer, rx)
    }

    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<Dialed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            tx,
            capacity: 1024,
            refuse: true,
        });
        (dialer, rx)
    }
}

#[async_trait]
impl Dialer for PipeDialer {
    async fn dial(&self, addr: SocketAddr, _kind: TransportKind) -> io::Result<Transport> {
        if self.refuse {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        let (near, far) = duplex(self.capacity);
        let _ = self.tx.send(Dialed { addr, stream: far });
        Ok(Transport::stream(near, DEFAULT_RELAY_BUFFER_SIZE))
    }
}

/// A config with only the `base` stage, so tunnel bytes stay readable.
pub fn plain_config(servers: &[(&str, u16)]) -> Config {
    let mut config: Config = serde_json::from_str(r#"{"key": "secret"}"#).unwrap();
    config.presets = vec![PresetConfig::new("base")];
    config.servers = servers
        .iter()
        .map(|(host, port)| UpstreamConfig::new(*host, *port))
        .collect();
    config
}

pub fn context(config: &Config, role: Role, dialer: Arc<dyn Dialer>) -> Arc<RelayContext> {
    let mut ctx = RelayContext::from_config_with(config, role, Arc::new(NoLookup)).unwrap();
    ctx.dialer = dialer;
    Arc::new(ctx)
}

/// Start a connection on an in-memory client transport. Returns the test's
/// end of the client pipe.
pub fn start(ctx: Arc<RelayContext>) -> (DuplexStream, JoinHandle<ConnectionSummary>) {
    let (client, relay_side) = duplex(64 * 1024);
    let conn = Connection::new(
        ctx,
        Transport::stream(relay_side, DEFAULT_RELAY_BUFFER_SIZE),
        PEER,
    );
    (client, tokio::spawn(conn.run()))
}

/// SOCKS5 CONNECT to `domain:port`; asserts the success reply.
pub async fn socks5_connect(client: &mut DuplexStream, domain: &str, port: u16) {
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    client.write_all(&socks5_request(domain, port)).await.unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[..2], [0x05, 0x00]);
}

pub fn socks5_request(domain: &str, port: u16) -> Vec<u8> {
    let mut req = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    req.extend_from_slice(domain.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// `ATYP | ADDR | PORT` as the base stage writes it for a domain.
pub fn domain_header(domain: &str, port: u16) -> Vec<u8> {
    let mut header = vec![0x03, domain.len() as u8];
    header.extend_from_slice(domain.as_bytes());
    header.extend_from_slice(&port.to_be_bytes());
    header
}
