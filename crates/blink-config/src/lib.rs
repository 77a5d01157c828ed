//! Configuration loading, CLI overrides, validation and generation.

pub mod cli;
pub mod defaults;
pub mod init;
pub mod loader;
pub mod types;
pub mod validate;

pub use blink_dns::{DnsConfig, DnsStrategy};
pub use blink_lb::SelectStrategy;
pub use blink_pipeline::PresetConfig;
pub use cli::{CliOverrides, apply_overrides};
pub use init::{default_config, generate_key, write_default_config};
pub use loader::{ConfigError, load_config};
pub use types::*;
pub use validate::{validate_client, validate_config};
