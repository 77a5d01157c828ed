//! Upstream selection for blinksocks-rs.
//!
//! [`UpstreamSelector`] holds the configured upstream candidates together
//! with their measured latency and health, and answers "which candidate is
//! best right now" through a pluggable [`SelectPolicy`]. Two strategies are
//! built in: fastest (lowest measured latency) and failover (first healthy).
//!
//! [`ActiveUpstream`] is the single coordination point that remembers which
//! candidate new connections are currently pinned to, and rebuilds the
//! per-upstream state only when the choice changes.

pub mod active;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use active::{ActiveUpstream, Pinned};

// ── Errors ──

#[derive(Error, Debug)]
pub enum LbError {
    #[error("no upstream servers configured")]
    NoUpstreams,

    #[error("no usable upstream available")]
    NoUsableUpstream,
}

// ── Strategy enum (for serde config) ──

/// Upstream selection strategy identifier, used in configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectStrategy {
    #[default]
    Fastest,
    Failover,
}

// ── Candidate ──

/// One configured upstream node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamCandidate {
    /// Position in the configured list; also the tie-breaker.
    pub index: usize,
    pub host: String,
    pub port: u16,
}

impl UpstreamCandidate {
    pub fn new(index: usize, host: impl Into<String>, port: u16) -> Self {
        Self {
            index,
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for UpstreamCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── Policy trait ──

/// Trait for selection policies.
///
/// Implementations receive the backends in declaration order and return the
/// index of the chosen one, or `None` when nothing is usable.
pub trait SelectPolicy: Send + Sync + 'static {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<usize>;
}

// ── Backend ──

const UNMEASURED: u64 = u64::MAX;

/// A candidate with its latency and health state.
pub struct Backend {
    candidate: UpstreamCandidate,
    /// Last measured latency in microseconds; `UNMEASURED` until first sample.
    latency_us: AtomicU64,
    healthy: AtomicBool,
    last_failure: RwLock<Option<Instant>>,
}

impl Backend {
    fn new(candidate: UpstreamCandidate) -> Self {
        Self {
            candidate,
            latency_us: AtomicU64::new(UNMEASURED),
            healthy: AtomicBool::new(true),
            last_failure: RwLock::new(None),
        }
    }

    pub fn candidate(&self) -> &UpstreamCandidate {
        &self.candidate
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Last measured latency, `None` if never measured.
    pub fn latency(&self) -> Option<Duration> {
        match self.latency_us.load(Ordering::Relaxed) {
            UNMEASURED => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    /// Healthy, or unhealthy for longer than `cooldown` (in which case it is
    /// marked healthy again).
    fn usable(&self, cooldown: Duration) -> bool {
        if self.is_healthy() {
            return true;
        }
        if let Some(when) = *self.last_failure.read()
            && when.elapsed() >= cooldown
        {
            self.healthy.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("candidate", &self.candidate)
            .field("latency", &self.latency())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

// ── UpstreamSelector ──

/// Upstream candidates plus a selection policy.
pub struct UpstreamSelector {
    backends: Vec<Arc<Backend>>,
    policy: Box<dyn SelectPolicy>,
    strategy: SelectStrategy,
}

impl UpstreamSelector {
    pub fn new(
        candidates: Vec<UpstreamCandidate>,
        strategy: SelectStrategy,
        cooldown: Duration,
    ) -> Self {
        let policy: Box<dyn SelectPolicy> = match strategy {
            SelectStrategy::Fastest => Box::new(Fastest { cooldown }),
            SelectStrategy::Failover => Box::new(Failover { cooldown }),
        };
        Self::with_policy(candidates, policy, strategy)
    }

    /// Create a selector with a custom policy.
    pub fn with_policy(
        candidates: Vec<UpstreamCandidate>,
        policy: Box<dyn SelectPolicy>,
        strategy: SelectStrategy,
    ) -> Self {
        let backends = candidates
            .into_iter()
            .map(|c| Arc::new(Backend::new(c)))
            .collect();
        Self {
            backends,
            policy,
            strategy,
        }
    }

    /// The currently best candidate.
    ///
    /// Deterministic for a given set of measurements; ties go to the
    /// candidate declared first.
    pub fn best(&self) -> Result<UpstreamCandidate, LbError> {
        if self.backends.is_empty() {
            return Err(LbError::NoUpstreams);
        }
        let idx = self
            .policy
            .select(&self.backends)
            .ok_or(LbError::NoUsableUpstream)?;
        Ok(self.backends[idx].candidate.clone())
    }

    /// Record a latency sample for the candidate at `index`.
    pub fn update_latency(&self, index: usize, latency: Duration) {
        if let Some(backend) = self.backends.get(index) {
            let us = u64::try_from(latency.as_micros()).unwrap_or(UNMEASURED - 1);
            backend.latency_us.store(us.min(UNMEASURED - 1), Ordering::Relaxed);
        }
    }

    pub fn mark_unhealthy(&self, index: usize) {
        if let Some(backend) = self.backends.get(index) {
            backend.healthy.store(false, Ordering::Relaxed);
            *backend.last_failure.write() = Some(Instant::now());
        }
    }

    pub fn mark_healthy(&self, index: usize) {
        if let Some(backend) = self.backends.get(index) {
            backend.healthy.store(true, Ordering::Relaxed);
        }
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn strategy(&self) -> SelectStrategy {
        self.strategy
    }
}

impl fmt::Debug for UpstreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSelector")
            .field("backends", &self.backends)
            .field("strategy", &self.strategy)
            .finish()
    }
}

// ── Built-in policies ──

/// Picks the usable backend with the lowest measured latency.
///
/// Unmeasured backends rank after every measured one. When every backend is
/// unhealthy and still cooling down, the first one is returned.
pub struct Fastest {
    pub cooldown: Duration,
}

impl SelectPolicy for Fastest {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<usize> {
        if backends.is_empty() {
            return None;
        }
        let mut best: Option<(usize, u64)> = None;
        for (i, b) in backends.iter().enumerate() {
            if !b.usable(self.cooldown) {
                continue;
            }
            let latency = b.latency_us.load(Ordering::Relaxed);
            match best {
                Some((_, min)) if latency >= min => {}
                _ => best = Some((i, latency)),
            }
        }
        Some(best.map_or(0, |(i, _)| i))
    }
}

/// Always picks the first usable backend.
pub struct Failover {
    pub cooldown: Duration,
}

impl SelectPolicy for Failover {
    fn select(&self, backends: &[Arc<Backend>]) -> Option<usize> {
        if backends.is_empty() {
            return None;
        }
        backends
            .iter()
            .position(|b| b.usable(self.cooldown))
            .or(Some(0))
    }
}

// ── Tests ──
