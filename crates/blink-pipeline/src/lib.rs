//! Bidirectional transform pipeline for relayed traffic.
//!
//! A [`Pipeline`] is an ordered chain of [`Stage`]s built per connection by a
//! [`PipelineFactory`]. Upward traffic (client side towards upstream) runs the
//! stages in declaration order; downward traffic runs them in reverse. Each
//! call to [`Pipeline::feed`] returns the resulting events: data ready to be
//! written in a given direction and, on the server side, the destination
//! learned from the stream.
//!
//! Built-in stages:
//! - `base`: carries the destination address in front of the stream (or of
//!   every datagram) and recovers it on the server.
//! - `aead`: authenticated encryption with a per-session salt and HKDF-SHA256
//!   subkeys (chacha20-poly1305, aes-128-gcm, aes-256-gcm).

pub mod error;
pub mod factory;
pub mod pipeline;
pub mod stage;
pub mod stages;

pub use error::{BuildError, PipelineError, StageError};
pub use factory::{PipelineFactory, PresetConfig, validate_presets};
pub use pipeline::{Pipeline, PipelineEvent};
pub use stage::{Direction, Role, Stage, StageOutput, TransportKind};
