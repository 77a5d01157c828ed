//! Unified blinksocks CLI.
//!
//! - `blinksocks client` - SOCKS5/HTTP/UDP front-end tunnelling to a server
//! - `blinksocks server` - decode the tunnel and connect to destinations
//! - `blinksocks run` - pick the role from the config file
//! - `blinksocks init` - write a default config with a fresh key

use std::process::ExitCode;

use blink_config::Mode;
use blink_relay::cli::{InitArgs, NodeArgs};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blinksocks",
    version,
    about = "A lightweight tunnelling proxy",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a client node.
    #[command(name = "client")]
    Client(Box<NodeArgs>),

    /// Run a server node.
    #[command(name = "server", alias = "serve")]
    Server(Box<NodeArgs>),

    /// Run the role named by the config (`mode`, or inferred from `servers`).
    #[command(name = "run")]
    Run(Box<NodeArgs>),

    /// Generate a config file.
    #[command(name = "init")]
    Init(InitArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Client(args) => blink_relay::cli::run(*args, Some(Mode::Client)).await,
        Commands::Server(args) => blink_relay::cli::run(*args, Some(Mode::Server)).await,
        Commands::Run(args) => blink_relay::cli::run(*args, None).await,
        Commands::Init(args) => blink_relay::cli::init(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
