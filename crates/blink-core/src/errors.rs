//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// Handshake parsing/negotiation error.
pub const ERROR_HANDSHAKE: &str = "handshake";
/// Pipeline stage failure (decrypt/verify/decode).
pub const ERROR_PIPELINE: &str = "pipeline";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// DNS/address resolution error.
pub const ERROR_RESOLVE: &str = "resolve";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Upstream selection error (no usable candidate).
pub const ERROR_UPSTREAM: &str = "upstream";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
