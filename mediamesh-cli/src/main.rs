//! Mediamesh CLI - Command-line interface
//!
//! Runs a relay, edits the shared catalog and resolves streams from the
//! terminal.

mod commands;

use clap::Parser;
use mediamesh_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "mediamesh")]
#[command(about = "A peer-to-peer media catalog")]
struct Cli {
    /// Console log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), None) {
        eprintln!("Failed to initialize logging: {e}");
    }

    commands::handle_command(cli.command).await
}
