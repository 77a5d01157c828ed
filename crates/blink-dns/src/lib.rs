//! Hostname resolution for blinksocks-rs.
//!
//! [`AddressCache`] resolves hostnames to a single IP address and keeps each
//! answer for a fixed survival time. IP literals pass straight through. The
//! actual lookup is pluggable via [`Lookup`]; [`SystemLookup`] is backed by
//! [`hickory-resolver`](https://crates.io/crates/hickory-resolver) and
//! supports the system configuration or custom UDP/TCP nameservers.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blink_dns::{AddressCache, DnsConfig, SystemLookup};
//!
//! # async fn example() -> Result<(), blink_dns::DnsError> {
//! let config = DnsConfig::default();
//! let cache = AddressCache::from_config(&config, Arc::new(SystemLookup::new(&config)?));
//!
//! let ip = cache.resolve("example.com").await?;
//! println!("resolved: {ip}");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod lookup;

pub use cache::AddressCache;
pub use config::{DnsConfig, DnsStrategy};
pub use error::DnsError;
pub use lookup::{Lookup, SystemLookup};
