//! Time-bounded hostname cache.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::lookup::Lookup;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    address: IpAddr,
    expires_at: Instant,
}

/// Resolves hostnames and remembers each answer for `survival` time.
///
/// Shared by every connection on a node. Entries are checked lazily on read;
/// an expired entry is evicted by the read that finds it, which then performs
/// a fresh lookup. Failed lookups are never cached. The lock is never held
/// across a lookup, so resolutions for different hostnames proceed in
/// parallel. Concurrent misses for the same hostname each look up and the
/// last writer wins.
#[derive(Clone)]
pub struct AddressCache {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<HashMap<String, CacheEntry>>,
    lookup: Arc<dyn Lookup>,
    survival: Duration,
}

impl std::fmt::Debug for AddressCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressCache")
            .field("entries", &self.inner.entries.lock().len())
            .field("survival", &self.inner.survival)
            .finish()
    }
}

impl AddressCache {
    pub fn new(lookup: Arc<dyn Lookup>, survival: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                lookup,
                survival,
            }),
        }
    }

    pub fn from_config(config: &DnsConfig, lookup: Arc<dyn Lookup>) -> Self {
        Self::new(lookup, Duration::from_millis(config.survival_ms))
    }

    /// Resolve `host` to an IP address.
    ///
    /// IPv4/IPv6 literals (IPv6 optionally bracketed) are returned unchanged
    /// without touching the cache.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr, DnsError> {
        if let Some(ip) = parse_ip_literal(host) {
            return Ok(ip);
        }

        let now = Instant::now();
        {
            let mut entries = self.inner.entries.lock();
            if let Some(entry) = entries.get(host) {
                if now < entry.expires_at {
                    trace!(host = %host, address = %entry.address, "dns cache hit");
                    return Ok(entry.address);
                }
                trace!(host = %host, "dns cache entry expired");
                entries.remove(host);
            }
        }

        let address = self.inner.lookup.lookup(host).await?;
        let entry = CacheEntry {
            address,
            expires_at: Instant::now() + self.inner.survival,
        };
        self.inner.entries.lock().insert(host.to_string(), entry);
        Ok(address)
    }

    /// Number of cached hostnames, including expired entries not yet read.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    host.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<IpAddr>().ok())
}
