//! Pipeline errors.

use bytes::Bytes;

/// A single stage failed to transform its input.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("authentication failed")]
    Authentication,

    #[error("crypto: {0}")]
    Crypto(&'static str),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// The pipeline failed; it will process nothing further.
#[derive(Debug, thiserror::Error)]
#[error("stage '{stage}' failed: {message}")]
pub struct PipelineError {
    pub stage: &'static str,
    pub message: String,
    /// The buffer handed to `feed` when the failure happened, untouched.
    pub original: Bytes,
}

/// A pipeline description could not be turned into stages.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("stage '{stage}': {message}")]
    InvalidParams { stage: String, message: String },

    #[error("key is empty")]
    EmptyKey,
}
