//! Relay error types.

use blink_dns::DnsError;
use blink_lb::LbError;
use blink_metrics::{
    ERROR_CONFIG, ERROR_HANDSHAKE, ERROR_IO, ERROR_PIPELINE, ERROR_RESOLVE, ERROR_TIMEOUT,
    ERROR_UPSTREAM,
};
use blink_pipeline::{BuildError, PipelineError};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("resolve: {0}")]
    Resolve(#[from] DnsError),
    #[error("upstream: {0}")]
    Upstream(#[from] LbError),
    #[error("pipeline build: {0}")]
    Build(#[from] BuildError),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("config: {0}")]
    Config(String),
}

impl RelayError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Io(_) => ERROR_IO,
            RelayError::Resolve(_) => ERROR_RESOLVE,
            RelayError::Upstream(_) => ERROR_UPSTREAM,
            RelayError::Build(_) | RelayError::Config(_) => ERROR_CONFIG,
            RelayError::Pipeline(_) => ERROR_PIPELINE,
            RelayError::Handshake(_) => ERROR_HANDSHAKE,
            RelayError::Timeout(_) => ERROR_TIMEOUT,
        }
    }
}

impl From<blink_config::ConfigError> for RelayError {
    fn from(err: blink_config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}
