//! State shared by every connection of one node.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use blink_config::{Config, PresetConfig};
use blink_dns::{AddressCache, Lookup, SystemLookup};
use blink_lb::{ActiveUpstream, Pinned, UpstreamCandidate, UpstreamSelector};
use blink_metrics::{Profile, record_upstream_switch};
use blink_pipeline::{PipelineFactory, Role};
use blink_proto::Address;

use crate::error::RelayError;
use crate::transport::{Dialer, NetDialer};
use crate::util::ConnectionTracker;

/// Stage list and key used while one upstream is active.
#[derive(Debug, Clone)]
pub struct UpstreamProfile {
    pub key: String,
    pub presets: Vec<PresetConfig>,
}

/// Client-side upstream choice: the selector, the active pin and the
/// per-candidate pipeline settings (indexed by candidate index).
pub struct Upstreams {
    selector: UpstreamSelector,
    active: ActiveUpstream<PipelineFactory>,
    profiles: Vec<UpstreamProfile>,
}

impl Upstreams {
    pub fn new(selector: UpstreamSelector, profiles: Vec<UpstreamProfile>) -> Self {
        Self {
            selector,
            active: ActiveUpstream::new(),
            profiles,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let (candidates, profiles): (Vec<_>, Vec<_>) = config
            .enabled_servers()
            .enumerate()
            .map(|(index, server)| {
                (
                    UpstreamCandidate::new(index, server.host.clone(), server.port),
                    UpstreamProfile {
                        key: server.key.clone().unwrap_or_else(|| config.key.clone()),
                        presets: server
                            .presets
                            .clone()
                            .unwrap_or_else(|| config.presets.clone()),
                    },
                )
            })
            .unzip();
        let selector = UpstreamSelector::new(
            candidates,
            config.balancer.strategy,
            Duration::from_secs(config.balancer.cooldown_secs),
        );
        Self::new(selector, profiles)
    }

    /// Pick the best candidate and pin new connections to it, rebuilding the
    /// pipeline factory only when the choice changed.
    pub fn select(&self) -> Result<Arc<Pinned<PipelineFactory>>, RelayError> {
        let candidate = self.selector.best()?;
        let (pinned, switched) = self.active.apply(&candidate, |c| {
            let profile = self.profiles.get(c.index).ok_or_else(|| {
                RelayError::Config(format!("no pipeline settings for upstream {c}"))
            })?;
            Ok::<_, RelayError>(PipelineFactory::new(&profile.key, &profile.presets)?)
        })?;
        if switched {
            record_upstream_switch();
        }
        Ok(pinned)
    }

    pub fn selector(&self) -> &UpstreamSelector {
        &self.selector
    }

    pub fn active(&self) -> &ActiveUpstream<PipelineFactory> {
        &self.active
    }
}

impl std::fmt::Debug for Upstreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstreams")
            .field("selector", &self.selector)
            .field("active", &self.active)
            .finish()
    }
}

/// What the node does with accepted connections.
#[derive(Debug)]
pub enum NodeMode {
    /// Negotiate front-end protocols and tunnel to an upstream node.
    Client(Upstreams),
    /// Decode the tunnel and connect to the destination it names.
    Server(PipelineFactory),
}

pub struct RelayContext {
    pub mode: NodeMode,
    /// Idle timeout for both endpoints; also bounds upstream connects.
    pub timeout: Duration,
    pub relay_buffer_size: usize,
    pub max_header_bytes: usize,
    /// Server only: where undecodable traffic is tunnelled.
    pub redirect: Option<Address>,
    /// Client only: UDP relay address handed out for SOCKS5 UDP ASSOCIATE.
    pub udp_relay: Option<SocketAddr>,
    pub dns: AddressCache,
    pub dialer: Arc<dyn Dialer>,
    pub profile: Arc<Profile>,
    pub tracker: ConnectionTracker,
    next_id: AtomicU64,
}

impl RelayContext {
    pub fn new(
        mode: NodeMode,
        timeout: Duration,
        dns: AddressCache,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            mode,
            timeout,
            relay_buffer_size: blink_core::defaults::DEFAULT_RELAY_BUFFER_SIZE,
            max_header_bytes: blink_core::defaults::DEFAULT_MAX_HEADER_BYTES,
            redirect: None,
            udp_relay: None,
            dns,
            dialer,
            profile: Arc::new(Profile::new()),
            tracker: ConnectionTracker::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build the context for `role` from a validated config.
    pub fn from_config(config: &Config, role: Role) -> Result<Self, RelayError> {
        let lookup: Arc<dyn Lookup> = Arc::new(SystemLookup::new(&config.dns)?);
        Self::from_config_with(config, role, lookup)
    }

    /// Like [`from_config`](Self::from_config) with an explicit lookup.
    pub fn from_config_with(
        config: &Config,
        role: Role,
        lookup: Arc<dyn Lookup>,
    ) -> Result<Self, RelayError> {
        let mode = match role {
            Role::Client => NodeMode::Client(Upstreams::from_config(config)),
            Role::Server => {
                NodeMode::Server(PipelineFactory::new(&config.key, &config.presets)?)
            }
        };
        let dialer = Arc::new(NetDialer {
            relay_buffer_size: config.limits.relay_buffer_size,
            tcp_send_buffer: config.limits.tcp_send_buffer,
            tcp_recv_buffer: config.limits.tcp_recv_buffer,
        });
        let redirect = match config.redirect.as_str() {
            "" => None,
            r => Some(
                r.parse::<Address>()
                    .map_err(|e| RelayError::Config(e.to_string()))?,
            ),
        };

        let mut ctx = Self::new(
            mode,
            Duration::from_secs(config.timeout),
            AddressCache::from_config(&config.dns, lookup),
            dialer,
        );
        ctx.relay_buffer_size = config.limits.relay_buffer_size;
        ctx.max_header_bytes = config.limits.max_header_bytes;
        ctx.redirect = redirect;
        Ok(ctx)
    }

    pub fn role(&self) -> Role {
        match self.mode {
            NodeMode::Client(_) => Role::Client,
            NodeMode::Server(_) => Role::Server,
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("redirect", &self.redirect)
            .finish()
    }
}
