//! Default config generation for the `init` subcommand.

use std::{fs, path::Path};

use blink_core::defaults::{GENERATED_KEY_LEN, KEY_ALPHABET};
use rand::Rng;

use crate::loader::{ConfigError, Format};
use crate::types::*;
use crate::{Config, defaults::*};

/// A random key drawn from [`KEY_ALPHABET`].
pub fn generate_key() -> String {
    let alphabet = KEY_ALPHABET.as_bytes();
    let mut rng = rand::thread_rng();
    (0..GENERATED_KEY_LEN)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// A complete config with every default spelled out and a fresh key.
pub fn default_config() -> Config {
    Config {
        mode: None,
        host: default_host(),
        port: default_port(),
        udp: false,
        servers: Vec::new(),
        key: generate_key(),
        presets: default_presets(),
        redirect: String::new(),
        timeout: default_timeout_secs(),
        balancer: BalancerConfig::default(),
        dns: Default::default(),
        limits: LimitsConfig::default(),
        profile: false,
        metrics: MetricsConfig::default(),
        log_level: None,
        logging: LoggingConfig {
            level: Some(blink_core::defaults::DEFAULT_LOG_LEVEL.to_string()),
            ..Default::default()
        },
    }
}

/// Serialize [`default_config`] to `path`, picking the format from the
/// extension. Refuses to overwrite unless `force` is set.
pub fn write_default_config(path: impl AsRef<Path>, force: bool) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    if path.exists() && !force {
        return Err(ConfigError::Exists(path.display().to_string()));
    }
    let config = default_config();
    let body = match Format::from_path(path)? {
        Format::Json => serde_json::to_string_pretty(&config)?,
        Format::Yaml => serde_yaml::to_string(&config)?,
        Format::Toml => toml::to_string_pretty(&config)?,
    };
    fs::write(path, body)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{load_config, validate_config};

    #[test]
    fn generated_key_uses_alphabet() {
        let key = generate_key();
        assert_eq!(key.len(), GENERATED_KEY_LEN);
        assert!(key.chars().all(|c| KEY_ALPHABET.contains(c)));
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn written_json_loads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blinksocks.json");
        let written = write_default_config(&path, false).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.key, written.key);
        assert_eq!(loaded.presets, written.presets);
        validate_config(&loaded).unwrap();
    }

    #[test]
    fn written_yaml_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blinksocks.yaml");
        let written = write_default_config(&path, false).unwrap();
        assert_eq!(load_config(&path).unwrap().key, written.key);
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blinksocks.json");
        write_default_config(&path, false).unwrap();
        assert!(matches!(
            write_default_config(&path, false),
            Err(ConfigError::Exists(_))
        ));
        write_default_config(&path, true).unwrap();
    }
}
