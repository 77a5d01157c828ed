//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

use std::time::Duration;

// ============================================================================
// Listener Defaults
// ============================================================================

/// Default listen host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default listen port.
pub const DEFAULT_PORT: u16 = 1080;
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Default maximum number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10240;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default idle timeout in seconds, applied to both endpoints of a connection.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// Lower bound of the delayed close after a pipeline failure.
pub const FAIL_CLOSE_DELAY_MIN: Duration = Duration::from_secs(10);
/// Upper bound of the delayed close after a pipeline failure.
pub const FAIL_CLOSE_DELAY_MAX: Duration = Duration::from_secs(40);

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Outbound buffered bytes at which the paired source is paused (1 MiB).
pub const MAX_BUFFERED_SIZE: usize = 1 << 20;
/// Default relay read buffer size (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Default cap on bytes accumulated while waiting for a front-end handshake.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;
/// Smallest usable handshake cap (SOCKS5 greeting plus a full domain request).
pub const MIN_HEADER_BYTES: usize = 2 + 255 + 4 + 1 + 255 + 2;
/// Default TCP socket send buffer size (0 = OS default).
pub const DEFAULT_TCP_SEND_BUFFER: usize = 0;
/// Default TCP socket receive buffer size (0 = OS default).
pub const DEFAULT_TCP_RECV_BUFFER: usize = 0;
/// Default maximum UDP payload size.
pub const DEFAULT_MAX_UDP_PAYLOAD: usize = 65507;
/// Queue depth of a UDP session's inbound datagram channel.
pub const DEFAULT_UDP_SESSION_QUEUE: usize = 256;

// ============================================================================
// Track Log Defaults
// ============================================================================

/// Maximum rendered tokens in a connection trace before abbreviation.
pub const TRACK_MAX_SIZE: usize = 40;

// ============================================================================
// DNS Defaults
// ============================================================================

/// How long a resolved hostname stays cached (ms).
pub const DNS_SURVIVAL_TIME_MS: u64 = 3_600_000;
/// Prefer IPv4 addresses when a hostname has both families.
pub const DEFAULT_DNS_PREFER_IPV4: bool = false;

// ============================================================================
// Logging Defaults
// ============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ============================================================================
// Balancer Defaults
// ============================================================================

/// Cooldown before a failed upstream candidate is retried.
pub const DEFAULT_UPSTREAM_COOLDOWN_SECS: u64 = 30;

// ============================================================================
// Pipeline Defaults
// ============================================================================

/// Name of the addressing stage that is always first in a pipeline.
pub const BASE_STAGE: &str = "base";
/// Default AEAD cipher for the `aead` stage.
pub const DEFAULT_AEAD_METHOD: &str = "chacha20-poly1305";
/// Default HKDF info string for subkey derivation.
pub const DEFAULT_AEAD_INFO: &str = "ss-subkey";

// ============================================================================
// Metrics Defaults
// ============================================================================

/// Default Prometheus exporter listen address.
pub const DEFAULT_METRICS_LISTEN: &str = "127.0.0.1:9100";

// ============================================================================
// Config Generator Defaults
// ============================================================================

/// Length of a generated key.
pub const GENERATED_KEY_LEN: usize = 16;
/// Characters a generated key is drawn from.
pub const KEY_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()_+<>?:|{}ABCDEFGHIJKLMNOPQRSTUVWXYZ";
