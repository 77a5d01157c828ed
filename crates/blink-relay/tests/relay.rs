//! Connection behaviour over in-memory transports.
//!
//! Every test uses the `base` stage only, so the bytes seen by the fake
//! upstream are the address header followed by the payload in clear.

mod common;

use std::time::Duration;

use blink_core::defaults::MAX_BUFFERED_SIZE;
use blink_lb::SelectStrategy;
use blink_pipeline::Role;
use blink_relay::NodeMode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

use common::*;

// ============================================================================
// Client role
// ============================================================================

#[tokio::test]
async fn socks5_connect_relays_both_ways() {
    let config = plain_config(&[("10.0.0.1", 8388)]);
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let ctx = context(&config, Role::Client, dialer.clone());
    let (mut client, handle) = start(ctx.clone());

    socks5_connect(&mut client, "example.com", 443).await;
    let mut upstream = dialed.recv().await.unwrap();
    assert_eq!(upstream.addr, "10.0.0.1:8388".parse().unwrap());

    client.write_all(b"hello").await.unwrap();
    let mut expected = domain_header("example.com", 443);
    expected.extend_from_slice(b"hello");
    let mut got = vec![0u8; expected.len()];
    upstream.stream.read_exact(&mut got).await.unwrap();
    assert_eq!(got, expected);

    upstream.stream.write_all(b"world").await.unwrap();
    let mut reply = [0u8; 5];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"world");

    drop(client);
    let mut rest = Vec::new();
    upstream.stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    let summary = handle.await.unwrap();
    assert!(summary.handshake_done);
    assert_eq!(summary.track.up_bytes, expected.len() as u64);
    assert_eq!(summary.track.down_bytes, 5);

    let profile = ctx.profile.snapshot();
    assert_eq!(profile.total_in, 5);
    assert_eq!(profile.total_out, expected.len() as u64 + 5);
    assert_eq!(profile.errors, 0);
}

#[tokio::test]
async fn http_connect_is_acknowledged() {
    let config = plain_config(&[("10.0.0.1", 8388)]);
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let (mut client, _handle) = start(context(&config, Role::Client, dialer.clone()));

    client
        .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
        .await
        .unwrap();
    let ack = b"HTTP/1.1 200 Connection Established\r\n\r\n";
    let mut got = vec![0u8; ack.len()];
    client.read_exact(&mut got).await.unwrap();
    assert_eq!(&got[..], &ack[..]);

    client.write_all(b"tls").await.unwrap();
    let mut upstream = dialed.recv().await.unwrap();
    let mut expected = domain_header("example.com", 443);
    expected.extend_from_slice(b"tls");
    let mut got = vec![0u8; expected.len()];
    upstream.stream.read_exact(&mut got).await.unwrap();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn plain_http_request_is_forwarded_whole() {
    let config = plain_config(&[("10.0.0.1", 8388)]);
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let (mut client, _handle) = start(context(&config, Role::Client, dialer.clone()));

    let request = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
    client.write_all(request).await.unwrap();

    let mut upstream = dialed.recv().await.unwrap();
    let mut expected = domain_header("example.com", 80);
    expected.extend_from_slice(request);
    let mut got = vec![0u8; expected.len()];
    upstream.stream.read_exact(&mut got).await.unwrap();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn refused_upstream_maps_socks_reply_and_marks_unhealthy() {
    let config = plain_config(&[("10.0.0.1", 8388)]);
    let (dialer, _dialed) = PipeDialer::refusing();
    let ctx = context(&config, Role::Client, dialer.clone());
    let (mut client, handle) = start(ctx.clone());

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    client.read_exact(&mut method).await.unwrap();
    client
        .write_all(&socks5_request("example.com", 443))
        .await
        .unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply.len(), 10);
    assert_eq!(reply[1], 0x05);

    let summary = handle.await.unwrap();
    assert!(!summary.handshake_done);
    assert_eq!(ctx.profile.snapshot().errors, 1);

    let NodeMode::Client(upstreams) = &ctx.mode else {
        panic!("client context expected");
    };
    assert!(!upstreams.selector().backends()[0].is_healthy());
}

#[tokio::test(start_paused = true)]
async fn unknown_protocol_waits_for_idle_timeout() {
    let mut config = plain_config(&[("10.0.0.1", 8388)]);
    config.timeout = 30;
    let (dialer, mut dialed) = PipeDialer::new(1024);
    let ctx = context(&config, Role::Client, dialer.clone());
    let (mut client, handle) = start(ctx.clone());

    let started = Instant::now();
    client.write_all(&[0x16, 0x03, 0x01, 0x00]).await.unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(30));

    let summary = handle.await.unwrap();
    assert!(!summary.handshake_done);
    assert!(dialed.try_recv().is_err());
    assert_eq!(ctx.profile.snapshot().errors, 0);
}

#[tokio::test]
async fn backpressure_bounds_buffering() {
    const TOTAL: usize = 4 * 1024 * 1024;

    let config = plain_config(&[("10.0.0.1", 8388)]);
    let (dialer, mut dialed) = PipeDialer::new(16 * 1024);
    let (mut client, handle) = start(context(&config, Role::Client, dialer.clone()));

    socks5_connect(&mut client, "example.com", 443).await;
    let mut upstream = dialed.recv().await.unwrap();

    let writer = tokio::spawn(async move {
        let payload: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();
        for chunk in payload.chunks(64 * 1024) {
            client.write_all(chunk).await.unwrap();
        }
        client.shutdown().await.unwrap();
        client
    });

    // Stall the consumer so the relay's queue fills up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut received = Vec::with_capacity(TOTAL + 64);
    upstream.stream.read_to_end(&mut received).await.unwrap();

    let header = domain_header("example.com", 443);
    assert_eq!(received.len(), header.len() + TOTAL);
    assert_eq!(&received[..header.len()], &header[..]);
    assert!(
        received[header.len()..]
            .iter()
            .enumerate()
            .all(|(i, b)| *b == (i % 251) as u8)
    );

    let _client = writer.await.unwrap();
    let summary = handle.await.unwrap();
    assert!(summary.peak_upstream_buffer >= MAX_BUFFERED_SIZE);
    assert!(summary.peak_upstream_buffer < MAX_BUFFERED_SIZE + 128 * 1024);
}

#[tokio::test]
async fn upstream_close_flushes_pending_reply() {
    const REPLY: usize = 256 * 1024;

    let config = plain_config(&[("10.0.0.1", 8388)]);
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let (mut client, handle) = start(context(&config, Role::Client, dialer.clone()));

    socks5_connect(&mut client, "example.com", 443).await;
    let mut upstream = dialed.recv().await.unwrap();

    tokio::spawn(async move {
        upstream.stream.write_all(&vec![7u8; REPLY]).await.unwrap();
        drop(upstream);
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received.len(), REPLY);
    assert!(received.iter().all(|b| *b == 7));

    let summary = handle.await.unwrap();
    assert_eq!(summary.track.down_bytes, REPLY as u64);
}

#[tokio::test]
async fn upstream_switch_leaves_pinned_connections_alone() {
    let mut config = plain_config(&[("10.0.0.1", 8388), ("10.0.0.2", 8388)]);
    config.balancer.strategy = SelectStrategy::Failover;
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let ctx = context(&config, Role::Client, dialer.clone());
    let NodeMode::Client(upstreams) = &ctx.mode else {
        panic!("client context expected");
    };

    let (mut first, _h1) = start(ctx.clone());
    socks5_connect(&mut first, "a.example", 443).await;
    let mut first_up = dialed.recv().await.unwrap();
    assert_eq!(first_up.addr, "10.0.0.1:8388".parse().unwrap());

    upstreams.selector().mark_unhealthy(0);

    let (mut second, _h2) = start(ctx.clone());
    socks5_connect(&mut second, "b.example", 443).await;
    let second_up = dialed.recv().await.unwrap();
    assert_eq!(second_up.addr, "10.0.0.2:8388".parse().unwrap());
    assert_eq!(upstreams.active().current().unwrap().candidate.index, 1);

    first.write_all(b"still-first").await.unwrap();
    let mut expected = domain_header("a.example", 443);
    expected.extend_from_slice(b"still-first");
    let mut got = vec![0u8; expected.len()];
    first_up.stream.read_exact(&mut got).await.unwrap();
    assert_eq!(got, expected);
}

#[tokio::test(start_paused = true)]
async fn idle_client_times_out() {
    let mut config = plain_config(&[("10.0.0.1", 8388)]);
    config.timeout = 5;
    let (dialer, _dialed) = PipeDialer::new(1024);
    let (mut client, handle) = start(context(&config, Role::Client, dialer.clone()));

    let started = Instant::now();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));
    handle.await.unwrap();
}

// ============================================================================
// Server role
// ============================================================================

#[tokio::test]
async fn server_connects_to_decoded_target() {
    let config = plain_config(&[]);
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let (mut client, handle) = start(context(&config, Role::Server, dialer.clone()));

    let mut request = vec![0x01, 127, 0, 0, 1, 0x1f, 0x90];
    request.extend_from_slice(b"ping");
    client.write_all(&request).await.unwrap();

    let mut target = dialed.recv().await.unwrap();
    assert_eq!(target.addr, "127.0.0.1:8080".parse().unwrap());
    let mut got = [0u8; 4];
    target.stream.read_exact(&mut got).await.unwrap();
    assert_eq!(&got, b"ping");

    target.stream.write_all(b"pong").await.unwrap();
    client.read_exact(&mut got).await.unwrap();
    assert_eq!(&got, b"pong");

    drop(target);
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    let summary = handle.await.unwrap();
    assert!(summary.handshake_done);
    assert!(!summary.redirected);
}

#[tokio::test]
async fn pipeline_failure_redirects_once() {
    let mut config = plain_config(&[]);
    config.redirect = "127.0.0.2:8080".into();
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let ctx = context(&config, Role::Server, dialer.clone());
    let (mut client, handle) = start(ctx.clone());

    let request = b"GET / HTTP/1.1\r\nHost: fallback.example\r\n\r\n";
    client.write_all(request).await.unwrap();

    let mut fallback = dialed.recv().await.unwrap();
    assert_eq!(fallback.addr, "127.0.0.2:8080".parse().unwrap());
    let mut got = vec![0u8; request.len()];
    fallback.stream.read_exact(&mut got).await.unwrap();
    assert_eq!(&got[..], &request[..]);

    // Later bytes pass through untouched and never trigger a second redirect.
    client.write_all(&[0xff, 0x00, 0xff]).await.unwrap();
    let mut more = [0u8; 3];
    fallback.stream.read_exact(&mut more).await.unwrap();
    assert_eq!(more, [0xff, 0x00, 0xff]);

    fallback.stream.write_all(b"HTTP/1.1 404").await.unwrap();
    let mut reply = [0u8; 12];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"HTTP/1.1 404");

    drop(client);
    let summary = handle.await.unwrap();
    assert!(summary.redirected);
    assert!(dialed.try_recv().is_err());

    let profile = ctx.profile.snapshot();
    assert_eq!(profile.fatals, 1);
    assert_eq!(profile.errors, 1);
}

#[tokio::test]
async fn redirect_replays_bytes_buffered_by_earlier_reads() {
    // Default stages: the aead stage holds the first segment while it waits
    // for a full salt, and only fails once the second one arrives.
    let config: blink_config::Config =
        serde_json::from_str(r#"{"key": "secret", "redirect": "127.0.0.2:8080"}"#).unwrap();
    let (dialer, mut dialed) = PipeDialer::new(64 * 1024);
    let ctx = context(&config, Role::Server, dialer.clone());
    let (mut client, handle) = start(ctx.clone());

    let mut request = b"GET / HTTP/1.1\r\nHost: fallback.example\r\n".to_vec();
    request.resize(74, b'x');
    client.write_all(&request[..10]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(dialed.try_recv().is_err());
    client.write_all(&request[10..]).await.unwrap();

    let mut fallback = dialed.recv().await.unwrap();
    assert_eq!(fallback.addr, "127.0.0.2:8080".parse().unwrap());
    let mut got = vec![0u8; request.len()];
    fallback.stream.read_exact(&mut got).await.unwrap();
    assert_eq!(got, request);

    drop(client);
    let summary = handle.await.unwrap();
    assert!(summary.redirected);
    assert_eq!(ctx.profile.snapshot().fatals, 1);
}

#[tokio::test(start_paused = true)]
async fn pipeline_failure_without_redirect_closes_later() {
    let config = plain_config(&[]);
    let (dialer, mut dialed) = PipeDialer::new(1024);
    let ctx = context(&config, Role::Server, dialer.clone());
    let (mut client, handle) = start(ctx.clone());

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let started = Instant::now();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(10), "closed after {waited:?}");
    assert!(waited <= Duration::from_secs(41), "closed after {waited:?}");

    let summary = handle.await.unwrap();
    assert!(!summary.redirected);
    assert!(dialed.try_recv().is_err());
    assert_eq!(ctx.profile.snapshot().fatals, 1);
}
