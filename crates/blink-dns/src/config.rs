//! DNS configuration.

use blink_core::{DEFAULT_DNS_PREFER_IPV4, DNS_SURVIVAL_TIME_MS};
use serde::{Deserialize, Serialize};

/// DNS configuration.
///
/// When omitted from config files every field falls back to its default:
/// the system resolver, no family preference and a one hour survival time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsConfig {
    /// DNS resolution strategy.
    ///
    /// - `"system"` (default): reads `/etc/resolv.conf` on Unix, system
    ///   DNS settings on Windows.
    /// - `"custom"`: uses the nameservers listed in `servers`.
    #[serde(default)]
    pub strategy: DnsStrategy,

    /// Custom nameservers, only used when `strategy = "custom"`.
    ///
    /// Accepted forms: `"8.8.8.8"`, `"8.8.8.8:53"`, `"[2001:4860:4860::8888]:53"`.
    /// Each server is queried over both UDP and TCP.
    #[serde(default)]
    pub servers: Vec<String>,

    /// Prefer IPv4 addresses when both A and AAAA records exist.
    #[serde(default = "default_prefer_ipv4")]
    pub prefer_ipv4: bool,

    /// How long a resolved hostname stays cached, in milliseconds.
    #[serde(default = "default_survival_ms")]
    pub survival_ms: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            strategy: DnsStrategy::default(),
            servers: Vec::new(),
            prefer_ipv4: default_prefer_ipv4(),
            survival_ms: default_survival_ms(),
        }
    }
}

/// DNS resolution strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsStrategy {
    /// Use the system DNS resolver configuration.
    #[default]
    System,
    /// Use custom nameservers from the `servers` list.
    Custom,
}

fn default_prefer_ipv4() -> bool {
    DEFAULT_DNS_PREFER_IPV4
}

fn default_survival_ms() -> u64 {
    DNS_SURVIVAL_TIME_MS
}
