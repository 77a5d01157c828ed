//! End-to-end tests: a client node tunnels to a server node over loopback.
//!
//! Both nodes run the default stage list (base + aead) on real sockets.
//! Destinations are local echo servers, so only IP literals are resolved.

mod common;

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    sync::Arc,
    thread,
    time::Duration,
};

use blink_config::Config;
use blink_pipeline::Role;
use blink_proto::Address;
use blink_proto::socks5::UdpRequestMessage;
use blink_relay::{CancellationToken, Listeners, RelayContext};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;

use common::NoLookup;

const KEY: &str = "e2e-shared-secret";

// ============================================================================
// Test Helper: Mock Echo Servers
// ============================================================================

/// A simple TCP server that echoes back whatever it receives.
struct MockEchoServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockEchoServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

/// Echoes every datagram back to its sender.
async fn start_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });
    addr
}

// ============================================================================
// Test Helper: Nodes
// ============================================================================

struct Node {
    addr: SocketAddr,
    udp: Option<SocketAddr>,
    ctx: Arc<RelayContext>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Node {
    async fn start(config: Config, role: Role) -> Self {
        let listeners = Listeners::bind("127.0.0.1:0".parse().unwrap(), 128, config.udp)
            .await
            .unwrap();
        let addr = listeners.tcp_addr().unwrap();
        let udp = listeners.udp_addr();

        let mut ctx = RelayContext::from_config_with(&config, role, Arc::new(NoLookup)).unwrap();
        ctx.udp_relay = udp;
        let ctx = Arc::new(ctx);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            async move {
                listeners
                    .serve(ctx, 64, Duration::from_secs(1), shutdown)
                    .await
                    .unwrap();
            }
        });

        Self {
            addr,
            udp,
            ctx,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("node did not stop")
            .unwrap();
    }
}

fn node_config(udp: bool) -> Config {
    let mut config: Config = serde_json::from_str(&format!(r#"{{"key": "{KEY}"}}"#)).unwrap();
    config.udp = udp;
    config
}

/// A server node plus a client node pointed at it.
async fn start_pair(udp: bool) -> (Node, Node) {
    let server = Node::start(node_config(udp), Role::Server).await;
    let mut client_config = node_config(udp);
    client_config.servers = vec![blink_config::UpstreamConfig::new(
        "127.0.0.1",
        server.addr.port(),
    )];
    let client = Node::start(client_config, Role::Client).await;
    (server, client)
}

fn socks5_ipv4_request(target: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = target else {
        panic!("ipv4 target expected");
    };
    let mut req = vec![0x05, 0x01, 0x00, 0x01];
    req.extend_from_slice(&v4.ip().octets());
    req.extend_from_slice(&v4.port().to_be_bytes());
    req
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn socks5_through_tunnel_reaches_echo() {
    let echo = MockEchoServer::start();
    let (server, client) = start_pair(false).await;

    let mut stream = TcpStream::connect(client.addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    stream.write_all(&socks5_ipv4_request(echo.addr)).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    for message in [&b"ping over the tunnel"[..], &[0u8; 40_000][..]] {
        stream.write_all(message).await.unwrap();
        let mut echoed = vec![0u8; message.len()];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut echoed))
            .await
            .expect("echo timed out")
            .unwrap();
        assert_eq!(&echoed[..], message);
    }
    drop(stream);

    client.stop().await;
    let server_profile = server.ctx.profile.snapshot();
    server.stop().await;
    assert_eq!(server_profile.fatals, 0);
}

#[tokio::test]
async fn http_connect_through_tunnel_reaches_echo() {
    let echo = MockEchoServer::start();
    let (server, client) = start_pair(false).await;

    let mut stream = TcpStream::connect(client.addr).await.unwrap();
    let request = format!(
        "CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n\r\n",
        addr = echo.addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let ack = b"HTTP/1.1 200 Connection Established\r\n\r\n";
    let mut got = vec![0u8; ack.len()];
    stream.read_exact(&mut got).await.unwrap();
    assert_eq!(&got[..], &ack[..]);

    stream.write_all(b"hello").await.unwrap();
    let mut echoed = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut echoed))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(&echoed, b"hello");
    drop(stream);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn udp_datagram_through_tunnel_reaches_echo() {
    let echo = start_udp_echo().await;
    let (server, client) = start_pair(true).await;
    let relay = client.udp.expect("client udp listener");

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = UdpRequestMessage {
        address: Address::from(echo),
        data: Bytes::from_static(b"dgram"),
    };
    let mut buf = BytesMut::new();
    request.write(&mut buf).unwrap();
    socket.send_to(&buf, relay).await.unwrap();

    let mut reply = vec![0u8; 65536];
    let (n, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut reply))
        .await
        .expect("udp echo timed out")
        .unwrap();
    assert_eq!(from.port(), relay.port());

    let message = UdpRequestMessage::parse(&Bytes::copy_from_slice(&reply[..n])).unwrap();
    assert_eq!(message.address, Address::from(echo));
    assert_eq!(&message.data[..], b"dgram");

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn wrong_key_is_refused_by_server() {
    let echo = MockEchoServer::start();
    let server = Node::start(node_config(false), Role::Server).await;
    let mut client_config = node_config(false);
    client_config.key = "not-the-server-key".into();
    client_config.servers = vec![blink_config::UpstreamConfig::new(
        "127.0.0.1",
        server.addr.port(),
    )];
    let client = Node::start(client_config, Role::Client).await;

    let mut stream = TcpStream::connect(client.addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    stream.write_all(&socks5_ipv4_request(echo.addr)).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    stream.write_all(b"this never decrypts").await.unwrap();

    // The server holds the connection open after a failure instead of
    // answering; nothing may come back in the meantime.
    let mut echoed = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_millis(500), stream.read(&mut echoed)).await;
    assert!(read.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.ctx.profile.snapshot().fatals, 1);

    drop(stream);
    client.stop().await;
    server.shutdown.cancel();
}
