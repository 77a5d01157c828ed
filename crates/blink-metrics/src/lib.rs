//! Metrics collection and Prometheus exporter for blinksocks-rs.
//!
//! Two layers: the `record_*` functions feed the global `metrics` recorder
//! (exported over HTTP when a Prometheus listener is installed), and
//! [`Profile`] keeps the node's running totals in-process so they can be
//! read back without a recorder.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of client connections accepted.
pub const CONNECTIONS_TOTAL: &str = "blinksocks_connections_total";
/// Number of currently active connections.
pub const CONNECTIONS_ACTIVE: &str = "blinksocks_connections_active";
/// Total bytes read from either endpoint.
pub const BYTES_IN_TOTAL: &str = "blinksocks_bytes_in_total";
/// Total bytes written to either endpoint.
pub const BYTES_OUT_TOTAL: &str = "blinksocks_bytes_out_total";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "blinksocks_errors_total";
/// Total number of fatal pipeline failures.
pub const PIPELINE_FAILURES_TOTAL: &str = "blinksocks_pipeline_failures_total";
/// Total number of connections tunnelled to the redirect target.
pub const REDIRECTS_TOTAL: &str = "blinksocks_redirects_total";
/// Total number of active-upstream switches.
pub const UPSTREAM_SWITCHES_TOTAL: &str = "blinksocks_upstream_switches_total";
/// Total number of front-end handshakes by protocol.
pub const HANDSHAKES_TOTAL: &str = "blinksocks_handshakes_total";
/// Total number of UDP datagrams dropped before relaying.
pub const UDP_DROPPED_TOTAL: &str = "blinksocks_udp_dropped_total";
/// Connection duration histogram (seconds).
pub const CONNECTION_DURATION_SECONDS: &str = "blinksocks_connection_duration_seconds";
/// Upstream connect latency histogram (seconds).
pub const UPSTREAM_CONNECT_SECONDS: &str = "blinksocks_upstream_connect_seconds";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new connection accepted.
#[inline]
pub fn record_connection_accepted() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed.
#[inline]
pub fn record_connection_closed(duration_secs: f64) {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(duration_secs);
}

#[inline]
pub fn record_bytes_in(bytes: u64) {
    counter!(BYTES_IN_TOTAL).increment(bytes);
}

#[inline]
pub fn record_bytes_out(bytes: u64) {
    counter!(BYTES_OUT_TOTAL).increment(bytes);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

#[inline]
pub fn record_pipeline_failure(stage: &'static str) {
    counter!(PIPELINE_FAILURES_TOTAL, "stage" => stage).increment(1);
}

#[inline]
pub fn record_redirect() {
    counter!(REDIRECTS_TOTAL).increment(1);
}

#[inline]
pub fn record_upstream_switch() {
    counter!(UPSTREAM_SWITCHES_TOTAL).increment(1);
}

/// Record a completed front-end handshake (protocol: "socks5", "http", "udp").
#[inline]
pub fn record_handshake(protocol: &'static str) {
    counter!(HANDSHAKES_TOTAL, "protocol" => protocol).increment(1);
}

/// Record a dropped datagram (reason: "unidentified", "overflow").
#[inline]
pub fn record_udp_dropped(reason: &'static str) {
    counter!(UDP_DROPPED_TOTAL, "reason" => reason).increment(1);
}

#[inline]
pub fn record_upstream_connect(duration_secs: f64) {
    histogram!(UPSTREAM_CONNECT_SECONDS).record(duration_secs);
}

// ============================================================================
// In-process Totals
// ============================================================================

/// Running totals for one node: bytes in/out, errors and fatal failures.
///
/// Every increment is also forwarded to the global recorder.
#[derive(Debug, Default)]
pub struct Profile {
    total_in: AtomicU64,
    total_out: AtomicU64,
    errors: AtomicU64,
    fatals: AtomicU64,
}

/// A point-in-time copy of [`Profile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub total_in: u64,
    pub total_out: u64,
    pub errors: u64,
    pub fatals: u64,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_in(&self, bytes: usize) {
        self.total_in.fetch_add(bytes as u64, Ordering::Relaxed);
        record_bytes_in(bytes as u64);
    }

    pub fn add_out(&self, bytes: usize) {
        self.total_out.fetch_add(bytes as u64, Ordering::Relaxed);
        record_bytes_out(bytes as u64);
    }

    pub fn add_error(&self, error_type: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        record_error(error_type);
    }

    /// A pipeline failed at `stage`.
    pub fn add_fatal(&self, stage: &'static str) {
        self.fatals.fetch_add(1, Ordering::Relaxed);
        record_pipeline_failure(stage);
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            total_in: self.total_in.load(Ordering::Relaxed),
            total_out: self.total_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            fatals: self.fatals.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Error Type Constants (re-exported from blink-core)
// ============================================================================

pub use blink_core::{
    ERROR_CONFIG, ERROR_HANDSHAKE, ERROR_IO, ERROR_PIPELINE, ERROR_RESOLVE, ERROR_TIMEOUT,
    ERROR_UPSTREAM,
};
