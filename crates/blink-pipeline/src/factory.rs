//! Stage registry and per-connection pipeline construction.

use std::sync::Arc;

use blink_core::{BASE_STAGE, DEFAULT_AEAD_INFO, DEFAULT_AEAD_METHOD};
use blink_proto::Address;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BuildError;
use crate::pipeline::Pipeline;
use crate::stage::{Role, Stage, TransportKind};
use crate::stages::aead::{self, AeadMethod, AeadParams, AeadStage};
use crate::stages::base::BaseStage;

/// One entry of the configured stage list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl PresetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// The stage list used when none is configured.
pub fn default_presets() -> Vec<PresetConfig> {
    vec![
        PresetConfig::new(BASE_STAGE),
        PresetConfig::new(aead::NAME)
            .with_param("method", DEFAULT_AEAD_METHOD)
            .with_param("info", DEFAULT_AEAD_INFO),
    ]
}

#[derive(Debug, Clone)]
enum StageSpec {
    Base,
    Aead(Arc<AeadParams>),
}

/// Builds a fresh [`Pipeline`] for every connection from a validated stage
/// list. Shared read-only across connections.
#[derive(Debug, Clone)]
pub struct PipelineFactory {
    specs: Vec<StageSpec>,
}

impl PipelineFactory {
    /// Validate `presets` against the registry.
    ///
    /// A `base` stage is inserted first when the list lacks one; a `base`
    /// anywhere but first is rejected.
    pub fn new(key: &str, presets: &[PresetConfig]) -> Result<Self, BuildError> {
        if key.is_empty() {
            return Err(BuildError::EmptyKey);
        }
        let mut specs = Vec::with_capacity(presets.len() + 1);
        if presets.first().is_none_or(|p| p.name != BASE_STAGE) {
            specs.push(StageSpec::Base);
        }
        for (i, preset) in presets.iter().enumerate() {
            let spec = parse_stage(preset, key)?;
            if matches!(spec, StageSpec::Base) && i != 0 {
                return Err(BuildError::InvalidParams {
                    stage: preset.name.clone(),
                    message: "must be the first stage".into(),
                });
            }
            specs.push(spec);
        }
        Ok(Self { specs })
    }

    /// Build the pipeline for one connection.
    ///
    /// `target` is the destination on the client and `None` on the server,
    /// where the pipeline reports it through a `Connect` event.
    pub fn build(&self, role: Role, kind: TransportKind, target: Option<Address>) -> Pipeline {
        let stages = self
            .specs
            .iter()
            .map(|spec| -> Box<dyn Stage> {
                match spec {
                    StageSpec::Base => Box::new(BaseStage::new(role, kind, target.clone())),
                    StageSpec::Aead(params) => Box::new(AeadStage::new(params.clone(), kind)),
                }
            })
            .collect();
        Pipeline::new(stages)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Check a stage list without keeping the result.
pub fn validate_presets(key: &str, presets: &[PresetConfig]) -> Result<(), BuildError> {
    PipelineFactory::new(key, presets).map(|_| ())
}

fn parse_stage(preset: &PresetConfig, key: &str) -> Result<StageSpec, BuildError> {
    match preset.name.as_str() {
        BASE_STAGE => Ok(StageSpec::Base),
        aead::NAME => {
            let method_name = str_param(preset, "method")?.unwrap_or(DEFAULT_AEAD_METHOD);
            let method =
                AeadMethod::from_name(method_name).ok_or_else(|| BuildError::InvalidParams {
                    stage: preset.name.clone(),
                    message: format!("unsupported method '{method_name}'"),
                })?;
            let info = str_param(preset, "info")?.unwrap_or(DEFAULT_AEAD_INFO);
            Ok(StageSpec::Aead(Arc::new(AeadParams::new(method, info, key)?)))
        }
        other => Err(BuildError::UnknownStage(other.to_string())),
    }
}

fn str_param<'a>(preset: &'a PresetConfig, name: &str) -> Result<Option<&'a str>, BuildError> {
    match preset.params.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(BuildError::InvalidParams {
            stage: preset.name.clone(),
            message: format!("'{name}' must be a string"),
        }),
    }
}
