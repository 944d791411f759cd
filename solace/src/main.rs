//! Solace - anonymous AI support conversation relay.
//!
//! The binary runs the relay server (`solace serve`) and a terminal chat
//! client for it (`solace chat`).

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use solace::cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v when set
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    execute(cli).await
}
