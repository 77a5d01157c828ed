//! # blinksocks-rs
//!
//! A lightweight tunnelling proxy: a client node accepts SOCKS5, HTTP proxy
//! and raw UDP traffic and forwards it through a configurable stage pipeline
//! to a server node, which decodes it and connects to the destination.
//!
//! ## Crates
//!
//! - [`blink_core`] - Default constants and error labels
//! - [`blink_proto`] - Address, SOCKS5 and HTTP message parsing
//! - [`blink_dns`] - Hostname resolution with a TTL cache
//! - [`blink_lb`] - Upstream selection and the active-upstream coordinator
//! - [`blink_pipeline`] - Stage trait, pipeline and built-in stages
//! - [`blink_config`] - Configuration loading and validation
//! - [`blink_metrics`] - Counters and the Prometheus exporter
//! - [`blink_relay`] - Connections, listeners and the CLI runner

pub use blink_config as config;
pub use blink_core as core;
pub use blink_dns as dns;
pub use blink_lb as lb;
pub use blink_metrics as metrics;
pub use blink_pipeline as pipeline;
pub use blink_proto as proto;
pub use blink_relay as relay;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use blink_config::{Config, Mode, load_config, validate_config};
    pub use blink_pipeline::{Direction, Pipeline, PipelineFactory, Role, TransportKind};
    pub use blink_relay::{CancellationToken, Connection, Listeners, RelayContext, RelayError};
}
