//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `blink_core::defaults`.

use blink_core::defaults;
use blink_pipeline::PresetConfig;

/// Generate default value functions that forward to blink_core::defaults constants.
macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_port                  => DEFAULT_PORT: u16,
    default_timeout_secs          => DEFAULT_TIMEOUT_SECS: u64,
    default_max_connections       => DEFAULT_MAX_CONNECTIONS: usize,
    default_connection_backlog    => DEFAULT_CONNECTION_BACKLOG: u32,
    default_relay_buffer_size     => DEFAULT_RELAY_BUFFER_SIZE: usize,
    default_max_header_bytes      => DEFAULT_MAX_HEADER_BYTES: usize,
    min_header_bytes              => MIN_HEADER_BYTES: usize,
    default_tcp_send_buffer       => DEFAULT_TCP_SEND_BUFFER: usize,
    default_tcp_recv_buffer       => DEFAULT_TCP_RECV_BUFFER: usize,
    default_upstream_cooldown_secs => DEFAULT_UPSTREAM_COOLDOWN_SECS: u64,
    default_shutdown_timeout_secs => DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64,
}

default_string_fns! {
    default_host          => DEFAULT_HOST,
    default_metrics_listen => DEFAULT_METRICS_LISTEN,
}

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_presets() -> Vec<PresetConfig> {
    blink_pipeline::factory::default_presets()
}
