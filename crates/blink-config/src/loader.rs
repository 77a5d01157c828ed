//! Configuration file loading and error types.

use std::{fs, path::Path};

use crate::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("toml: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("validation: {0}")]
    Validation(String),
    #[error("{0} already exists")]
    Exists(String),
}

/// Config format inferred from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
            "json" | "jsonc" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    let mut config: Config = match Format::from_path(path)? {
        Format::Json => {
            let stripped = json_comments::StripComments::new(data.as_bytes());
            serde_json::from_reader(stripped)?
        }
        Format::Yaml => serde_yaml::from_str(&data)?,
        Format::Toml => toml::from_str(&data)?,
    };
    normalize(&mut config);
    Ok(config)
}

/// Fold shorthand fields into their canonical place and put `base` first.
pub(crate) fn normalize(config: &mut Config) {
    if config.logging.level.is_none() {
        config.logging.level = config.log_level.take();
    }
    ensure_base(&mut config.presets);
    for server in &mut config.servers {
        if let Some(presets) = server.presets.as_mut() {
            ensure_base(presets);
        }
    }
}

fn ensure_base(presets: &mut Vec<blink_pipeline::PresetConfig>) {
    let base = blink_core::defaults::BASE_STAGE;
    if !presets.iter().any(|p| p.name == base) {
        presets.insert(0, blink_pipeline::PresetConfig::new(base));
    }
}
