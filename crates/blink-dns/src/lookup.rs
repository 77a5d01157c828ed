//! Uncached hostname lookups.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_resolver::Resolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use tracing::debug;

use crate::config::{DnsConfig, DnsStrategy};
use crate::error::DnsError;

/// A single hostname-to-address query with no caching of its own.
#[async_trait]
pub trait Lookup: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<IpAddr, DnsError>;
}

/// Lookup backed by hickory-resolver.
pub struct SystemLookup {
    resolver: Resolver<TokioConnectionProvider>,
    prefer_ipv4: bool,
}

impl std::fmt::Debug for SystemLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemLookup")
            .field("prefer_ipv4", &self.prefer_ipv4)
            .finish()
    }
}

impl SystemLookup {
    /// Build a lookup from configuration.
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let resolver = match config.strategy {
            DnsStrategy::System => {
                let mut builder = Resolver::builder_tokio()
                    .map_err(|e| DnsError::InvalidServer(format!("system config: {e}")))?;
                // AddressCache owns caching; hickory's own cache is kept minimal.
                builder.options_mut().cache_size = 0;
                builder.build()
            }
            DnsStrategy::Custom => {
                let name_servers = parse_servers(&config.servers)?;
                let resolver_config = ResolverConfig::from_parts(None, vec![], name_servers);
                let mut opts = ResolverOpts::default();
                opts.cache_size = 0;
                let mut builder = Resolver::builder_with_config(
                    resolver_config,
                    TokioConnectionProvider::default(),
                );
                *builder.options_mut() = opts;
                builder.build()
            }
        };

        Ok(Self {
            resolver,
            prefer_ipv4: config.prefer_ipv4,
        })
    }
}

#[async_trait]
impl Lookup for SystemLookup {
    async fn lookup(&self, host: &str) -> Result<IpAddr, DnsError> {
        let response = self.resolver.lookup_ip(host).await?;

        let ip = if self.prefer_ipv4 {
            response
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| response.iter().next())
        } else {
            response.iter().next()
        };

        match ip {
            Some(ip) => {
                debug!(host = %host, resolved = %ip, "dns resolved");
                Ok(ip)
            }
            None => Err(DnsError::NoResults(host.to_string())),
        }
    }
}

/// Parse nameserver strings (`ip` or `ip:port`) into a hickory group.
fn parse_servers(servers: &[String]) -> Result<NameServerConfigGroup, DnsError> {
    let mut group = NameServerConfigGroup::new();

    for server in servers {
        let addr = parse_server(server)?;
        group.merge(NameServerConfigGroup::from_ips_clear(
            &[addr.ip()],
            addr.port(),
            true,
        ));
    }

    if group.is_empty() {
        return Err(DnsError::InvalidServer(
            "no dns servers configured".to_string(),
        ));
    }

    Ok(group)
}

fn parse_server(s: &str) -> Result<SocketAddr, DnsError> {
    if let Ok(sa) = s.parse::<SocketAddr>() {
        return Ok(sa);
    }
    let trimmed = s.trim_start_matches('[').trim_end_matches(']');
    trimmed
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| DnsError::InvalidServer(s.to_string()))
}
