//! Built-in stages.

pub mod aead;
pub mod base;

pub use aead::{AeadMethod, AeadStage};
pub use base::BaseStage;
