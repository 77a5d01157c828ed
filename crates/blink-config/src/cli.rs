//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;
use crate::types::UpstreamConfig;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override listen host, e.g. 0.0.0.0
    #[arg(long)]
    pub host: Option<String>,
    /// Override listen port
    #[arg(long)]
    pub port: Option<u16>,
    /// Override shared key
    #[arg(long)]
    pub key: Option<String>,
    /// Override redirect target for unrecognised traffic, e.g. 127.0.0.1:80
    #[arg(long)]
    pub redirect: Option<String>,
    /// Override idle timeout (seconds)
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Replace upstream servers (repeatable or comma-separated host:port)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub servers: Option<Vec<String>>,
    /// Enable or disable the UDP front-end
    #[arg(long)]
    pub udp: Option<bool>,
    /// Override maximum concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Apply `overrides` on top of a loaded config. Malformed `--servers`
/// entries are reported as validation errors.
pub fn apply_overrides(
    config: &mut Config,
    overrides: &CliOverrides,
) -> Result<(), crate::ConfigError> {
    if let Some(v) = &overrides.host {
        config.host = v.clone();
    }
    if let Some(v) = overrides.port {
        config.port = v;
    }
    if let Some(v) = &overrides.key {
        config.key = v.clone();
    }
    if let Some(v) = &overrides.redirect {
        config.redirect = v.clone();
    }
    if let Some(v) = overrides.timeout {
        config.timeout = v;
    }
    if let Some(list) = &overrides.servers {
        config.servers = list
            .iter()
            .map(|s| {
                let addr: blink_proto::Address = s.parse().map_err(|_| {
                    crate::ConfigError::Validation(format!("--servers: invalid host:port {s:?}"))
                })?;
                Ok(UpstreamConfig::new(addr.host_str(), addr.port))
            })
            .collect::<Result<_, crate::ConfigError>>()?;
    }
    if let Some(v) = overrides.udp {
        config.udp = v;
    }
    if let Some(v) = overrides.max_connections {
        config.limits.max_connections = v;
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        serde_json::from_str(r#"{"key": "secret"}"#).unwrap()
    }

    #[test]
    fn overrides_replace_fields() {
        let mut cfg = base();
        let overrides = CliOverrides::parse_from([
            "test",
            "--port",
            "2080",
            "--servers",
            "a.example:1,[::1]:2",
            "--log-level",
            "trace",
        ]);
        apply_overrides(&mut cfg, &overrides).unwrap();
        assert_eq!(cfg.port, 2080);
        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.servers[0].host, "a.example");
        assert_eq!(cfg.servers[1].host, "::1");
        assert_eq!(cfg.servers[1].port, 2);
        assert_eq!(cfg.logging.level.as_deref(), Some("trace"));
    }

    #[test]
    fn malformed_server_is_an_error() {
        let mut cfg = base();
        let overrides = CliOverrides::parse_from(["test", "--servers", "nope"]);
        assert!(apply_overrides(&mut cfg, &overrides).is_err());
    }

    #[test]
    fn empty_overrides_keep_config() {
        let mut cfg = base();
        apply_overrides(&mut cfg, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.port, 1080);
        assert_eq!(cfg.key, "secret");
    }
}
