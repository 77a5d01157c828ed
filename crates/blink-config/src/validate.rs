//! Configuration validation logic.

use blink_pipeline::validate_presets;
use blink_proto::Address;

use crate::Config;
use crate::defaults::min_header_bytes;
use crate::loader::ConfigError;

/// Checks shared by both roles.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.host.trim().is_empty() {
        return Err(ConfigError::Validation("host is empty".into()));
    }
    if config.key.is_empty() {
        return Err(ConfigError::Validation("key is empty".into()));
    }
    if config.timeout == 0 {
        return Err(ConfigError::Validation("timeout must be > 0".into()));
    }
    if !config.redirect.is_empty() && config.redirect.parse::<Address>().is_err() {
        return Err(ConfigError::Validation(format!(
            "redirect must be host:port, got {:?}",
            config.redirect
        )));
    }
    validate_presets(&config.key, &config.presets)
        .map_err(|e| ConfigError::Validation(format!("presets: {e}")))?;

    for (i, server) in config.servers.iter().enumerate() {
        if server.host.trim().is_empty() {
            return Err(ConfigError::Validation(format!("servers[{i}].host is empty")));
        }
        if server.port == 0 {
            return Err(ConfigError::Validation(format!("servers[{i}].port must be > 0")));
        }
        let key = server.key.as_deref().unwrap_or(&config.key);
        let presets = server.presets.as_deref().unwrap_or(&config.presets);
        validate_presets(key, presets)
            .map_err(|e| ConfigError::Validation(format!("servers[{i}]: {e}")))?;
    }

    if config.limits.max_header_bytes < min_header_bytes() {
        return Err(ConfigError::Validation(format!(
            "limits.max_header_bytes too small (min {})",
            min_header_bytes()
        )));
    }
    if config.limits.relay_buffer_size < 1024 || config.limits.relay_buffer_size > 1024 * 1024 {
        return Err(ConfigError::Validation(
            "limits.relay_buffer_size must be 1024..=1048576".into(),
        ));
    }
    if config.limits.connection_backlog == 0 {
        return Err(ConfigError::Validation(
            "limits.connection_backlog must be > 0".into(),
        ));
    }
    if config.limits.max_connections == 0 {
        return Err(ConfigError::Validation(
            "limits.max_connections must be > 0".into(),
        ));
    }
    if let Some(listen) = config.metrics_listen()
        && listen.parse::<std::net::SocketAddr>().is_err()
    {
        return Err(ConfigError::Validation(format!(
            "metrics.listen is not a socket address: {listen}"
        )));
    }
    Ok(())
}

/// Client role additionally needs at least one usable upstream.
pub fn validate_client(config: &Config) -> Result<(), ConfigError> {
    validate_config(config)?;
    if config.enabled_servers().next().is_none() {
        return Err(ConfigError::Validation(
            "servers: at least one enabled server is required".into(),
        ));
    }
    Ok(())
}
