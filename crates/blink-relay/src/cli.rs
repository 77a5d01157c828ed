//! Command-line runners for the client and server roles and `init`.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use blink_config::{
    CliOverrides, Config, LoggingConfig, Mode, apply_overrides, load_config, validate_client,
    validate_config, write_default_config,
};
use blink_core::defaults::DEFAULT_LOG_LEVEL;
use blink_pipeline::Role;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{CancellationToken, Listeners, RelayContext, RelayError};

/// Arguments shared by `client` and `server`.
#[derive(Parser, Debug, Clone)]
pub struct NodeArgs {
    /// Config file path (json/jsonc/yaml/toml)
    #[arg(short, long, default_value = "blinksocks.json")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Where to write the generated config; the extension picks the format
    #[arg(default_value = "blinksocks.json")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Load, validate and run a node until SIGINT/SIGTERM.
///
/// `mode` forces the role; `None` uses the config's `mode` (or infers it).
pub async fn run(args: NodeArgs, mode: Option<Mode>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides)?;
    if mode.is_some() {
        config.mode = mode;
    }
    let role = match config.mode() {
        Mode::Client => {
            validate_client(&config)?;
            Role::Client
        }
        Mode::Server => {
            validate_config(&config)?;
            Role::Server
        }
    };

    init_tracing(&config.logging);

    if let Some(listen) = config.metrics_listen() {
        match blink_metrics::init_prometheus(&listen) {
            Ok(()) => info!("metrics exporter listening on {}", listen),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    serve(&config, role, shutdown).await?;
    Ok(())
}

/// Bind the configured listeners and serve `role` until `shutdown` fires.
pub async fn serve(
    config: &Config,
    role: Role,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let addr = resolve_listen(config).await?;
    let listeners = Listeners::bind(addr, config.limits.connection_backlog, config.udp).await?;

    let mut ctx = RelayContext::from_config(config, role)?;
    ctx.udp_relay = listeners.udp_addr();
    let ctx = Arc::new(ctx);

    listeners
        .serve(
            ctx.clone(),
            config.limits.max_connections,
            Duration::from_secs(config.limits.shutdown_timeout_secs),
            shutdown,
        )
        .await?;

    let profile = ctx.profile.snapshot();
    info!(
        total_in = profile.total_in,
        total_out = profile.total_out,
        errors = profile.errors,
        fatals = profile.fatals,
        "profile"
    );
    Ok(())
}

async fn resolve_listen(config: &Config) -> Result<SocketAddr, RelayError> {
    let listen = config.listen_addr();
    tokio::net::lookup_host(&listen)
        .await?
        .next()
        .ok_or_else(|| RelayError::Config(format!("cannot resolve listen address {listen}")))
}

/// Write a default config file and print the generated key.
pub fn init(args: InitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = write_default_config(&args.path, args.force)?;
    println!("generated {} (key: {})", args.path.display(), config.key);
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Install the global subscriber.
///
/// - `level`: base level, default `info`
/// - `format`: `json`, `compact` or `pretty` (default)
/// - `output`: `stdout` or `stderr` (default)
/// - `filters`: per-module overrides, e.g. `blink_dns = "debug"`
pub fn init_tracing(config: &LoggingConfig) {
    let mut directives = config
        .level
        .as_deref()
        .unwrap_or(DEFAULT_LOG_LEVEL)
        .to_string();
    for (module, level) in &config.filters {
        directives.push_str(&format!(",{module}={level}"));
    }
    let filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let writer = match config.output.as_deref() {
        Some("stdout") => BoxMakeWriter::new(io::stdout),
        _ => BoxMakeWriter::new(io::stderr),
    };
    let layer = match config.format.as_deref() {
        Some("json") => fmt::layer().json().with_writer(writer).boxed(),
        Some("compact") => fmt::layer().compact().with_writer(writer).boxed(),
        _ => fmt::layer().with_writer(writer).boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init();
}
