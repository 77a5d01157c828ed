//! One client/upstream pairing.
//!
//! A [`Connection`] owns the client-facing transport and, once the
//! destination is known, the upstream transport. Everything runs on the
//! task that calls [`Connection::run`]: reads from both sides, the pipeline,
//! queued writes and timers are multiplexed in one `select!` loop.
//!
//! Each side has an outbound queue with one write in flight. When the queue
//! towards one side reaches `MAX_BUFFERED_SIZE`, reading from the opposite
//! side stops until the queue drains. Closing one side (EOF, error or idle
//! timeout) destroys it; the other side is shut down once its own queue has
//! been flushed.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use blink_core::defaults::{FAIL_CLOSE_DELAY_MAX, FAIL_CLOSE_DELAY_MIN, MAX_BUFFERED_SIZE};
use blink_lb::Pinned;
use blink_metrics::{
    ERROR_HANDSHAKE, ERROR_IO, ERROR_PIPELINE, record_handshake, record_redirect,
    record_udp_dropped, record_upstream_connect,
};
use blink_pipeline::{
    Direction, Pipeline, PipelineError, PipelineEvent, PipelineFactory, Role, TransportKind,
};
use blink_proto::Address;
use blink_proto::socks5::{self, REPLY_COMMAND_NOT_SUPPORTED, REPLY_SUCCEEDED, UdpRequestMessage};
use bytes::{Bytes, BytesMut};
use rand::Rng;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::context::{NodeMode, RelayContext};
use crate::error::RelayError;
use crate::negotiator::{Ack, ClientHandshakeNegotiator, Handshake, Step, unwrap_datagram};
use crate::track::{TrackDirection, TrackLog, TrackSummary};
use crate::transport::{Transport, TransportRead, TransportWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Handshaking,
    Connecting,
    Relaying,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Upstream,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Upstream => "upstream",
        }
    }
}

/// What a finished connection did.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSummary {
    pub track: TrackSummary,
    pub handshake_done: bool,
    pub redirected: bool,
    /// Largest number of bytes queued towards the client at once.
    pub peak_client_buffer: usize,
    /// Largest number of bytes queued towards the upstream at once.
    pub peak_upstream_buffer: usize,
}

type WriteFuture =
    Pin<Box<dyn Future<Output = (Box<dyn TransportWrite>, usize, io::Result<()>)> + Send>>;

enum Writer {
    Idle(Box<dyn TransportWrite>),
    Busy(WriteFuture),
    Gone,
}

/// Bytes waiting to be written to one side.
struct Outbound {
    writer: Writer,
    queue: VecDeque<Bytes>,
    buffered: usize,
    peak: usize,
}

impl Outbound {
    fn vacant() -> Self {
        Self {
            writer: Writer::Gone,
            queue: VecDeque::new(),
            buffered: 0,
            peak: 0,
        }
    }

    fn attach(&mut self, writer: Box<dyn TransportWrite>) {
        self.writer = Writer::Idle(writer);
    }

    fn push(&mut self, data: Bytes) {
        if data.is_empty() || matches!(self.writer, Writer::Gone) {
            return;
        }
        self.buffered += data.len();
        self.peak = self.peak.max(self.buffered);
        self.queue.push_back(data);
        self.kick();
    }

    /// Start writing the next queued chunk if nothing is in flight.
    fn kick(&mut self) {
        if !matches!(self.writer, Writer::Idle(_)) {
            return;
        }
        let Some(data) = self.queue.pop_front() else {
            return;
        };
        match std::mem::replace(&mut self.writer, Writer::Gone) {
            Writer::Idle(mut writer) => {
                let len = data.len();
                self.writer = Writer::Busy(Box::pin(async move {
                    let res = writer.send(data).await;
                    (writer, len, res)
                }));
            }
            other => {
                self.writer = other;
                self.queue.push_front(data);
            }
        }
    }

    fn is_busy(&self) -> bool {
        matches!(self.writer, Writer::Busy(_))
    }

    fn is_idle(&self) -> bool {
        self.buffered == 0 && !self.is_busy()
    }

    /// Resolves when the write in flight completes. Cancel-safe: the write
    /// itself lives in `self`.
    async fn written(&mut self) -> io::Result<usize> {
        let Writer::Busy(fut) = &mut self.writer else {
            return std::future::pending().await;
        };
        let (writer, len, res) = fut.await;
        self.buffered = self.buffered.saturating_sub(len);
        match res {
            Ok(()) => {
                self.writer = Writer::Idle(writer);
                self.kick();
                Ok(len)
            }
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    fn take_idle_writer(&mut self) -> Option<Box<dyn TransportWrite>> {
        match std::mem::replace(&mut self.writer, Writer::Gone) {
            Writer::Idle(writer) => Some(writer),
            other => {
                self.writer = other;
                None
            }
        }
    }

    fn discard(&mut self) {
        self.writer = Writer::Gone;
        self.queue.clear();
        self.buffered = 0;
    }
}

struct Endpoint {
    label: String,
    reader: Option<Box<dyn TransportRead>>,
    out: Outbound,
    open: bool,
    paused: bool,
    /// Shut down once `out` is flushed.
    draining: bool,
    last_active: Instant,
}

impl Endpoint {
    fn vacant() -> Self {
        Self {
            label: String::new(),
            reader: None,
            out: Outbound::vacant(),
            open: false,
            paused: false,
            draining: false,
            last_active: Instant::now(),
        }
    }

    fn attach(&mut self, transport: Transport, label: String) {
        self.label = label;
        self.reader = Some(transport.reader);
        self.out.attach(transport.writer);
        self.open = true;
        self.last_active = Instant::now();
    }

    fn readable(&self) -> bool {
        self.open && !self.paused && !self.draining && self.reader.is_some()
    }

    fn destroy(&mut self) {
        self.reader = None;
        self.out.discard();
        self.open = false;
        self.paused = false;
        self.draining = false;
    }
}

async fn recv_on(reader: &mut Option<Box<dyn TransportRead>>) -> io::Result<Option<Bytes>> {
    match reader {
        Some(reader) => reader.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolve `host` and dial it, bounded by the idle timeout.
async fn dial(
    ctx: &RelayContext,
    host: &str,
    port: u16,
    kind: TransportKind,
) -> Result<Transport, RelayError> {
    let ip = ctx.dns.resolve(host).await?;
    let addr = SocketAddr::new(ip, port);
    match tokio::time::timeout(ctx.timeout, ctx.dialer.dial(addr, kind)).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(RelayError::Timeout("connect")),
    }
}

pub struct Connection {
    id: u64,
    ctx: Arc<RelayContext>,
    role: Role,
    kind: TransportKind,
    peer: String,
    phase: Phase,
    client: Endpoint,
    upstream: Endpoint,
    pipeline: Option<Pipeline>,
    negotiator: Option<ClientHandshakeNegotiator>,
    pinned: Option<Arc<Pinned<PipelineFactory>>>,
    ack: Ack,
    /// Client UDP sessions: the destination replies are labelled with.
    udp_target: Option<Address>,
    /// Server streams: raw client bytes fed before the destination was
    /// known, replayed to the redirect target if the pipeline fails.
    prelude: Option<BytesMut>,
    handshake_done: bool,
    redirected: bool,
    track: TrackLog,
    fail_at: Option<Instant>,
}

impl Connection {
    pub fn new(ctx: Arc<RelayContext>, client: Transport, peer: impl ToString) -> Self {
        let peer = peer.to_string();
        let kind = client.kind;
        let role = ctx.role();
        let mut conn = Self {
            id: ctx.next_id(),
            role,
            kind,
            peer: peer.clone(),
            phase: Phase::Open,
            client: Endpoint::vacant(),
            upstream: Endpoint::vacant(),
            pipeline: None,
            negotiator: None,
            pinned: None,
            ack: Ack::None,
            udp_target: None,
            prelude: None,
            handshake_done: false,
            redirected: false,
            track: TrackLog::new(),
            fail_at: None,
            ctx,
        };
        conn.client.attach(client, peer.clone());
        match &conn.ctx.mode {
            NodeMode::Client(_) => {
                conn.negotiator = Some(ClientHandshakeNegotiator::new(
                    kind,
                    conn.ctx.max_header_bytes,
                ));
                conn.phase = Phase::Handshaking;
            }
            NodeMode::Server(factory) => {
                conn.pipeline = Some(factory.build(Role::Server, kind, None));
                if kind == TransportKind::Tcp && conn.ctx.redirect.is_some() {
                    conn.prelude = Some(BytesMut::new());
                }
                conn.track.endpoint(&peer);
                conn.phase = Phase::Connecting;
            }
        }
        conn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The upstream this connection was pinned to (client role).
    pub fn pinned(&self) -> Option<&Arc<Pinned<PipelineFactory>>> {
        self.pinned.as_ref()
    }

    /// Drive the connection until both sides are closed.
    pub async fn run(mut self) -> ConnectionSummary {
        debug!(id = self.id, peer = %self.peer, "connection opened");
        loop {
            if !self.client.open && !self.upstream.open {
                break;
            }
            let timeout = self.ctx.timeout;
            let client_deadline = self.client.last_active + timeout;
            let upstream_deadline = self.upstream.last_active + timeout;
            let fail_at = self.fail_at;

            tokio::select! {
                res = recv_on(&mut self.client.reader), if self.client.readable() => {
                    self.on_recv(Side::Client, res).await;
                }
                res = recv_on(&mut self.upstream.reader), if self.upstream.readable() => {
                    self.on_recv(Side::Upstream, res).await;
                }
                res = self.client.out.written(), if self.client.out.is_busy() => {
                    self.on_written(Side::Client, res).await;
                }
                res = self.upstream.out.written(), if self.upstream.out.is_busy() => {
                    self.on_written(Side::Upstream, res).await;
                }
                _ = sleep_until(client_deadline), if self.client.open => {
                    self.on_idle(Side::Client).await;
                }
                _ = sleep_until(upstream_deadline), if self.upstream.open => {
                    self.on_idle(Side::Upstream).await;
                }
                _ = sleep_until(fail_at.unwrap_or(client_deadline)), if fail_at.is_some() => {
                    self.fail_at = None;
                    debug!(peer = %self.peer, "closing failed connection");
                    self.close_all();
                }
                else => break,
            }
        }
        self.finish()
    }

    fn endpoint(&mut self, side: Side) -> &mut Endpoint {
        match side {
            Side::Client => &mut self.client,
            Side::Upstream => &mut self.upstream,
        }
    }

    /// Which side output travelling in `direction` is written to.
    fn sink(&self, direction: Direction) -> Side {
        match (self.role, direction) {
            (Role::Client, Direction::Upward) | (Role::Server, Direction::Downward) => {
                Side::Upstream
            }
            (Role::Client, Direction::Downward) | (Role::Server, Direction::Upward) => {
                Side::Client
            }
        }
    }

    async fn on_recv(&mut self, side: Side, res: io::Result<Option<Bytes>>) {
        match res {
            Ok(Some(data)) => {
                self.endpoint(side).last_active = Instant::now();
                if data.is_empty() {
                    return;
                }
                match side {
                    Side::Client => self.on_client_data(data).await,
                    Side::Upstream => self.on_upstream_data(data).await,
                }
                self.apply_backpressure(side);
            }
            Ok(None) => {
                debug!(peer = %self.peer, side = side.as_str(), "closed by peer");
                self.close_side(side).await;
            }
            Err(e) => {
                warn!(peer = %self.peer, side = side.as_str(), error = %e, "transport error");
                self.ctx.profile.add_error(ERROR_IO);
                self.close_side(side).await;
            }
        }
    }

    async fn on_client_data(&mut self, data: Bytes) {
        if self.negotiator.as_ref().is_some_and(|n| !n.is_done()) {
            self.negotiate(data).await;
            return;
        }
        if self.redirected {
            self.upstream.out.push(data);
            return;
        }
        self.ctx.profile.add_in(data.len());
        match self.role {
            Role::Client => {
                let data = if self.kind == TransportKind::Udp {
                    match unwrap_datagram(&data) {
                        Some((_, payload)) => payload,
                        None => {
                            self.drop_datagram(&data);
                            return;
                        }
                    }
                } else {
                    data
                };
                self.feed(Direction::Upward, data).await;
            }
            Role::Server => {
                self.track.record(TrackDirection::Down, data.len());
                self.keep_prelude(&data);
                self.feed(Direction::Downward, data).await;
            }
        }
    }

    /// Copy `data` into the prelude; a prelude past `max_header_bytes` is
    /// given up.
    fn keep_prelude(&mut self, data: &[u8]) {
        let Some(prelude) = self.prelude.as_mut() else {
            return;
        };
        if prelude.len() + data.len() > self.ctx.max_header_bytes {
            debug!(peer = %self.peer, "prelude exceeds header limit, not kept");
            self.prelude = None;
            return;
        }
        prelude.extend_from_slice(data);
    }

    async fn on_upstream_data(&mut self, data: Bytes) {
        if self.redirected {
            self.client.out.push(data);
            return;
        }
        match self.role {
            Role::Client => {
                self.track.record(TrackDirection::Down, data.len());
                self.feed(Direction::Downward, data).await;
            }
            Role::Server => self.feed(Direction::Upward, data).await,
        }
    }

    fn drop_datagram(&mut self, data: &[u8]) {
        if socks5::check_udp_fragment(data).is_err() {
            warn!(peer = %self.peer, bytes = data.len(), "dropped fragmented udp message");
            record_udp_dropped("fragmented");
            return;
        }
        warn!(peer = %self.peer, bytes = data.len(), "dropped unidentified udp message");
        record_udp_dropped("unidentified");
    }

    async fn feed(&mut self, direction: Direction, data: Bytes) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        match pipeline.feed(direction, data) {
            Ok(events) => {
                for event in events {
                    match event {
                        PipelineEvent::Connect(target) => {
                            if self.upstream.open || self.handshake_done {
                                continue;
                            }
                            self.prelude = None;
                            self.connect_target(target).await;
                            if !self.upstream.open {
                                return;
                            }
                        }
                        PipelineEvent::Data(direction, bytes) => self.emit(direction, bytes),
                    }
                }
            }
            Err(e) => self.on_pipeline_error(e).await,
        }
    }

    /// Queue pipeline output on the side `direction` points at.
    fn emit(&mut self, direction: Direction, data: Bytes) {
        let side = self.sink(direction);
        let len = data.len();
        self.ctx.profile.add_out(len);
        match (self.role, side) {
            (Role::Client, Side::Upstream) | (Role::Server, Side::Client) => {
                self.track.record(TrackDirection::Up, len);
            }
            _ => {}
        }

        let data = match (&self.udp_target, self.role, side) {
            (Some(target), Role::Client, Side::Client) => {
                let message = UdpRequestMessage {
                    address: target.clone(),
                    data,
                };
                let mut buf = BytesMut::new();
                if let Err(e) = message.write(&mut buf) {
                    warn!(peer = %self.peer, error = %e, "cannot frame udp reply");
                    return;
                }
                buf.freeze()
            }
            _ => data,
        };
        self.endpoint(side).out.push(data);
    }

    /// Pause the side that produced data while the opposite queue is full.
    fn apply_backpressure(&mut self, source: Side) {
        let sink = source.other();
        if self.endpoint(sink).out.buffered >= MAX_BUFFERED_SIZE {
            let peer = self.peer.clone();
            let ep = self.endpoint(source);
            if !ep.paused {
                debug!(peer = %peer, side = source.as_str(), "paused");
                ep.paused = true;
            }
        }
    }

    async fn on_written(&mut self, side: Side, res: io::Result<usize>) {
        match res {
            Ok(_) => {
                self.endpoint(side).last_active = Instant::now();
                if self.endpoint(side).out.is_idle() {
                    self.on_drained(side).await;
                }
            }
            Err(e) => {
                warn!(peer = %self.peer, side = side.as_str(), error = %e, "transport error");
                self.ctx.profile.add_error(ERROR_IO);
                self.close_side(side).await;
            }
        }
    }

    /// `side` has nothing left to write.
    async fn on_drained(&mut self, side: Side) {
        let other = self.endpoint(side.other());
        if other.paused {
            other.paused = false;
        }
        if self.endpoint(side).draining {
            self.shutdown(side).await;
        }
    }

    async fn on_idle(&mut self, side: Side) {
        let label = self.endpoint(side).label.clone();
        warn!(
            peer = %self.peer,
            endpoint = %label,
            "timeout: no I/O on the connection for {}s",
            self.ctx.timeout.as_secs()
        );
        self.close_side(side).await;
    }

    /// Destroy `side`; the other side follows once its queue is flushed.
    async fn close_side(&mut self, side: Side) {
        self.endpoint(side).destroy();
        self.phase = Phase::Closing;
        self.drain_then_close(side.other()).await;
    }

    async fn drain_then_close(&mut self, side: Side) {
        if !self.endpoint(side).open {
            return;
        }
        self.phase = Phase::Closing;
        let ep = self.endpoint(side);
        ep.reader = None;
        ep.paused = false;
        ep.draining = true;
        if ep.out.is_idle() {
            self.shutdown(side).await;
        }
    }

    async fn shutdown(&mut self, side: Side) {
        let ep = self.endpoint(side);
        if let Some(mut writer) = ep.out.take_idle_writer() {
            let _ = writer.shutdown().await;
        }
        ep.destroy();
    }

    fn close_all(&mut self) {
        self.phase = Phase::Closing;
        self.client.destroy();
        self.upstream.destroy();
    }

    async fn negotiate(&mut self, data: Bytes) {
        let mut step = match self.negotiator.as_mut() {
            Some(negotiator) if negotiator.is_unmatched() => return,
            Some(negotiator) => negotiator.handshake(&data),
            None => return,
        };
        loop {
            match step {
                Step::Pending => {
                    if self.negotiator.as_ref().is_some_and(|n| n.is_unmatched()) {
                        debug!(
                            peer = %self.peer,
                            "unrecognised handshake, waiting for idle timeout"
                        );
                    }
                    return;
                }
                Step::Reply(reply) => {
                    self.client.out.push(reply);
                    step = match self.negotiator.as_mut() {
                        Some(negotiator) if negotiator.has_buffered() => negotiator.handshake(&[]),
                        _ => return,
                    };
                }
                Step::Associate => {
                    record_handshake("socks5-udp");
                    match self.ctx.udp_relay {
                        Some(relay) => {
                            debug!(peer = %self.peer, relay = %relay, "UDP ASSOCIATE");
                            self.client.out.push(socks5::reply(REPLY_SUCCEEDED, &relay));
                        }
                        None => {
                            warn!(peer = %self.peer, "UDP ASSOCIATE without a udp listener");
                            self.client
                                .out
                                .push(socks5::reply_unspecified(REPLY_COMMAND_NOT_SUPPORTED));
                            self.drain_then_close(Side::Client).await;
                        }
                    }
                    return;
                }
                Step::Discard => {
                    self.drop_datagram(&data);
                    return;
                }
                Step::Rejected { reason, reply } => {
                    warn!(peer = %self.peer, reason = %reason, "handshake rejected");
                    self.ctx.profile.add_error(ERROR_HANDSHAKE);
                    if let Some(reply) = reply {
                        self.client.out.push(reply);
                    }
                    self.drain_then_close(Side::Client).await;
                    return;
                }
                Step::Done(handshake) => {
                    self.on_handshake_done(handshake).await;
                    return;
                }
            }
        }
    }

    /// Client role: pick an upstream, connect, then start relaying.
    async fn on_handshake_done(&mut self, handshake: Handshake) {
        record_handshake(handshake.protocol.as_str());
        self.phase = Phase::Connecting;
        self.ack = handshake.ack;

        let ctx = self.ctx.clone();
        let NodeMode::Client(upstreams) = &ctx.mode else {
            return;
        };
        let pinned = match upstreams.select() {
            Ok(pinned) => pinned,
            Err(e) => {
                error!(peer = %self.peer, error = %e, "no upstream available");
                self.ctx.profile.add_error(e.error_type());
                self.refuse(None).await;
                return;
            }
        };
        let candidate = pinned.candidate.clone();
        if self.kind == TransportKind::Tcp {
            info!(
                peer = %self.peer,
                "request: {}, connecting to: {}",
                handshake.target,
                candidate
            );
        }
        self.track.endpoint(&candidate);

        let started = Instant::now();
        match dial(&ctx, &candidate.host, candidate.port, self.kind).await {
            Ok(transport) => {
                let elapsed = started.elapsed();
                upstreams.selector().update_latency(candidate.index, elapsed);
                upstreams.selector().mark_healthy(candidate.index);
                record_upstream_connect(elapsed.as_secs_f64());
                self.upstream.attach(transport, candidate.to_string());
            }
            Err(e) => {
                upstreams.selector().mark_unhealthy(candidate.index);
                error!(
                    peer = %self.peer,
                    upstream = %candidate,
                    error = %e,
                    "connect to upstream failed"
                );
                self.ctx.profile.add_error(e.error_type());
                let io_err = match &e {
                    RelayError::Io(err) => Some(err),
                    _ => None,
                };
                self.refuse(io_err).await;
                return;
            }
        }

        self.pipeline = Some(pinned.state.build(
            Role::Client,
            self.kind,
            Some(handshake.target.clone()),
        ));
        self.pinned = Some(pinned);
        self.track.endpoint(&handshake.target);
        if self.kind == TransportKind::Udp {
            self.udp_target = Some(handshake.target.clone());
        }
        self.handshake_done = true;
        self.phase = Phase::Relaying;

        if let Some(reply) = self.ack.success() {
            self.client.out.push(reply);
        }
        if !handshake.payload.is_empty() {
            self.ctx.profile.add_in(handshake.payload.len());
            self.feed(Direction::Upward, handshake.payload).await;
        }
    }

    /// Answer a failed handshake and close the client once the answer is out.
    async fn refuse(&mut self, err: Option<&io::Error>) {
        if let Some(reply) = self.ack.failure(err) {
            self.client.out.push(reply);
        }
        self.drain_then_close(Side::Client).await;
    }

    /// Server role: the pipeline named the destination.
    async fn connect_target(&mut self, target: Address) {
        info!(peer = %self.peer, "connecting to: {}", target);
        self.track.endpoint(&target);
        let ctx = self.ctx.clone();
        match dial(&ctx, &target.host_str(), target.port, self.kind).await {
            Ok(transport) => {
                self.upstream.attach(transport, target.to_string());
                self.handshake_done = true;
                self.phase = Phase::Relaying;
            }
            Err(e) => {
                error!(peer = %self.peer, target = %target, error = %e, "connect failed");
                self.ctx.profile.add_error(e.error_type());
                self.close_all();
            }
        }
    }

    async fn on_pipeline_error(&mut self, err: PipelineError) {
        self.ctx.profile.add_error(ERROR_PIPELINE);
        self.ctx.profile.add_fatal(err.stage);

        let redirect = match self.role {
            Role::Server if !self.upstream.open && !self.redirected => self.ctx.redirect.clone(),
            _ => None,
        };
        if let Some(target) = redirect {
            error!(
                peer = %self.peer,
                "connection is redirected to {} due to: {}",
                target,
                err
            );
            record_redirect();
            self.track.endpoint(&target);
            let ctx = self.ctx.clone();
            match dial(&ctx, &target.host_str(), target.port, self.kind).await {
                Ok(transport) => {
                    self.upstream.attach(transport, target.to_string());
                    self.redirected = true;
                    self.pipeline = None;
                    self.phase = Phase::Relaying;
                    let raw = match self.prelude.take() {
                        Some(prelude) => prelude.freeze(),
                        None => err.original,
                    };
                    self.upstream.out.push(raw);
                }
                Err(e) => {
                    error!(peer = %self.peer, redirect = %target, error = %e, "redirect failed");
                    self.ctx.profile.add_error(e.error_type());
                    self.close_all();
                }
            }
            return;
        }

        self.prelude = None;
        if self.fail_at.is_none() {
            let secs = rand::thread_rng()
                .gen_range(FAIL_CLOSE_DELAY_MIN.as_secs()..=FAIL_CLOSE_DELAY_MAX.as_secs());
            error!(
                peer = %self.peer,
                "connection will be closed in {}s due to: {}",
                secs,
                err
            );
            self.fail_at = Some(Instant::now() + Duration::from_secs(secs));
        }
    }

    fn finish(mut self) -> ConnectionSummary {
        self.phase = Phase::Closed;
        let summary = ConnectionSummary {
            track: self.track.summary(),
            handshake_done: self.handshake_done,
            redirected: self.redirected,
            peak_client_buffer: self.client.out.peak,
            peak_upstream_buffer: self.upstream.out.peak,
        };
        if let Some((_, line)) = self.track.take(self.role) {
            info!(peer = %self.peer, "closed with {}", line);
        }
        debug!(id = self.id, peer = %self.peer, "connection closed");
        summary
    }
}
