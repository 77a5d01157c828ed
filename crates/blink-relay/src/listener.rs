//! Accept loops for the TCP and UDP front-ends.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blink_core::defaults::{DEFAULT_MAX_UDP_PAYLOAD, DEFAULT_UDP_SESSION_QUEUE};
use blink_metrics::{record_connection_accepted, record_connection_closed, record_udp_dropped};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::context::RelayContext;
use crate::error::RelayError;
use crate::transport::Transport;
use crate::util::create_listener;

type Sessions = Arc<Mutex<HashMap<SocketAddr, mpsc::Sender<Bytes>>>>;

/// Bound sockets of one node.
pub struct Listeners {
    tcp: TcpListener,
    udp: Option<Arc<UdpSocket>>,
}

impl Listeners {
    /// Bind TCP on `addr`, and UDP on the same address when `udp` is set.
    pub async fn bind(addr: SocketAddr, backlog: u32, udp: bool) -> io::Result<Self> {
        let tcp = create_listener(addr, backlog)?;
        let udp = if udp {
            // Follow the TCP port when it was picked by the OS.
            let port = tcp.local_addr()?.port();
            let socket = UdpSocket::bind(SocketAddr::new(addr.ip(), port)).await?;
            Some(Arc::new(socket))
        } else {
            None
        };
        Ok(Self { tcp, udp })
    }

    pub fn tcp_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Serve until `shutdown` fires, then wait up to `drain_timeout` for
    /// live connections to finish.
    pub async fn serve(
        self,
        ctx: Arc<RelayContext>,
        max_connections: usize,
        drain_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<(), RelayError> {
        let limit = Arc::new(Semaphore::new(max_connections));
        info!(max_connections, "max_connections set");

        let udp_task = self.udp.map(|socket| {
            if let Ok(addr) = socket.local_addr() {
                info!(address = %addr, "udp listening");
            }
            tokio::spawn(serve_udp(
                socket,
                ctx.clone(),
                limit.clone(),
                shutdown.child_token(),
            ))
        });

        if let Ok(addr) = self.tcp.local_addr() {
            info!(address = %addr, role = ?ctx.role(), "listening");
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }

                result = self.tcp.accept() => {
                    let (tcp, peer) = result?;

                    let permit: OwnedSemaphorePermit = match limit.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            debug!(peer = %peer, reason = "max_connections", "connection rejected");
                            drop(tcp);
                            continue;
                        }
                    };
                    let _ = tcp.set_nodelay(true);
                    debug!(peer = %peer, "new connection");

                    let transport = Transport::stream(tcp, ctx.relay_buffer_size);
                    spawn_connection(ctx.clone(), transport, peer, permit);
                }
            }
        }

        if let Some(task) = udp_task {
            let _ = task.await;
        }

        let active = ctx.tracker.count();
        if active > 0 {
            info!("waiting for {} active connections to drain", active);
            if ctx.tracker.wait_for_zero(drain_timeout).await {
                info!("all connections drained");
            } else {
                warn!(
                    "shutdown timeout, {} connections still active",
                    ctx.tracker.count()
                );
            }
        }

        info!("node stopped");
        Ok(())
    }
}

fn spawn_connection(
    ctx: Arc<RelayContext>,
    transport: Transport,
    peer: SocketAddr,
    permit: OwnedSemaphorePermit,
) -> tokio::task::JoinHandle<()> {
    let guard = ctx.tracker.register();
    tokio::spawn(async move {
        let _guard = guard;
        let _permit = permit;
        record_connection_accepted();
        let start = Instant::now();

        let summary = Connection::new(ctx, transport, peer).run().await;

        let duration_secs = start.elapsed().as_secs_f64();
        record_connection_closed(duration_secs);
        debug!(
            peer = %peer,
            duration_secs,
            up_bytes = summary.track.up_bytes,
            down_bytes = summary.track.down_bytes,
            "connection finished"
        );
    })
}

/// Demultiplex datagrams by peer into per-peer sessions.
async fn serve_udp(
    socket: Arc<UdpSocket>,
    ctx: Arc<RelayContext>,
    limit: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
    let mut buf = BytesMut::with_capacity(DEFAULT_MAX_UDP_PAYLOAD);

    loop {
        buf.clear();
        buf.reserve(DEFAULT_MAX_UDP_PAYLOAD);
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            result = socket.recv_buf_from(&mut buf) => {
                let (n, peer) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "udp receive failed");
                        continue;
                    }
                };
                let datagram = buf.split_to(n).freeze();
                dispatch(&socket, &ctx, &limit, &sessions, peer, datagram);
            }
        }
    }
    sessions.lock().clear();
}

fn dispatch(
    socket: &Arc<UdpSocket>,
    ctx: &Arc<RelayContext>,
    limit: &Arc<Semaphore>,
    sessions: &Sessions,
    peer: SocketAddr,
    datagram: Bytes,
) {
    let existing = sessions.lock().get(&peer).cloned();
    let datagram = match existing {
        Some(tx) => match tx.try_send(datagram) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => {
                debug!(peer = %peer, "udp session queue full, datagram dropped");
                record_udp_dropped("queue_full");
                return;
            }
            Err(TrySendError::Closed(datagram)) => datagram,
        },
        None => datagram,
    };

    let Ok(permit) = limit.clone().try_acquire_owned() else {
        debug!(peer = %peer, reason = "max_connections", "udp session rejected");
        record_udp_dropped("max_connections");
        return;
    };

    let (tx, rx) = mpsc::channel(DEFAULT_UDP_SESSION_QUEUE);
    let _ = tx.try_send(datagram);
    sessions.lock().insert(peer, tx.clone());
    debug!(peer = %peer, "new udp session");

    let transport = Transport::udp_session(rx, socket.clone(), peer);
    let handle = spawn_connection(ctx.clone(), transport, peer, permit);

    let sessions = sessions.clone();
    tokio::spawn(async move {
        let _ = handle.await;
        let mut map = sessions.lock();
        if map.get(&peer).is_some_and(|s| s.same_channel(&tx)) {
            map.remove(&peer);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_follows_tcp_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listeners = Listeners::bind(addr, 16, true).await.unwrap();
        let tcp = listeners.tcp_addr().unwrap();
        let udp = listeners.udp_addr().unwrap();
        assert_ne!(tcp.port(), 0);
        assert_eq!(tcp.port(), udp.port());
    }

    #[tokio::test]
    async fn tcp_only_by_default() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listeners = Listeners::bind(addr, 16, false).await.unwrap();
        assert!(listeners.udp_addr().is_none());
    }
}
