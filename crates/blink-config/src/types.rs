//! Configuration types.

use std::collections::HashMap;

use blink_dns::DnsConfig;
use blink_lb::SelectStrategy;
use blink_pipeline::PresetConfig;
use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Node configuration, shared by the client and server roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Role of this node. Inferred from `servers` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    /// Listen host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Also accept UDP on the same address.
    #[serde(default)]
    pub udp: bool,
    /// Upstream nodes (client role only).
    #[serde(default)]
    pub servers: Vec<UpstreamConfig>,
    /// Shared secret for the pipeline stages.
    pub key: String,
    /// Ordered pipeline stage list.
    #[serde(default = "default_presets")]
    pub presets: Vec<PresetConfig>,
    /// `host:port` to tunnel unrecognised traffic to (server role), or empty.
    #[serde(default)]
    pub redirect: String,
    /// Idle timeout in seconds for both endpoints of a connection.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Enable the Prometheus exporter (at `metrics.listen` or its default).
    #[serde(default)]
    pub profile: bool,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Shorthand for `logging.level`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// The configured role, or `Client` when upstream servers are listed.
    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or(if self.servers.is_empty() {
            Mode::Server
        } else {
            Mode::Client
        })
    }

    /// `host:port` the listeners bind to.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Effective log level: `logging.level`, then `log_level`.
    pub fn effective_log_level(&self) -> Option<&str> {
        self.logging
            .level
            .as_deref()
            .or(self.log_level.as_deref())
    }

    /// Metrics listen address when the exporter is enabled.
    pub fn metrics_listen(&self) -> Option<String> {
        match (&self.metrics.listen, self.profile) {
            (Some(listen), _) => Some(listen.clone()),
            (None, true) => Some(default_metrics_listen()),
            (None, false) => None,
        }
    }

    /// Servers that take part in upstream selection, in declaration order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &UpstreamConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Client,
    Server,
}

/// One upstream node. `key` and `presets` override the top-level values
/// while this node is the active upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presets: Option<Vec<PresetConfig>>,
}

impl UpstreamConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            enabled: true,
            key: None,
            presets: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default)]
    pub strategy: SelectStrategy,
    /// Seconds before a failed upstream is tried again.
    #[serde(default = "default_upstream_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: SelectStrategy::default(),
            cooldown_secs: default_upstream_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// TCP listener backlog (pending connections queue size).
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
    /// Read buffer size per endpoint (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// Cap on bytes buffered while a front-end handshake is incomplete.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// TCP socket send buffer size (SO_SNDBUF). If 0, uses OS default.
    #[serde(default = "default_tcp_send_buffer")]
    pub tcp_send_buffer: usize,
    /// TCP socket receive buffer size (SO_RCVBUF). If 0, uses OS default.
    #[serde(default = "default_tcp_recv_buffer")]
    pub tcp_recv_buffer: usize,
    /// Seconds to wait for live connections on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_backlog: default_connection_backlog(),
            relay_buffer_size: default_relay_buffer_size(),
            max_header_bytes: default_max_header_bytes(),
            tcp_send_buffer: default_tcp_send_buffer(),
            tcp_recv_buffer: default_tcp_recv_buffer(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"blink_relay": "debug", "hickory_proto": "warn"}).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub filters: HashMap<String, String>,
}
