//! GasWatch CLI - Command-line interface for the GasWatch live-query layer
//!
//! Provides commands for:
//! - One-shot reads of sensor, device and alert records
//! - Watching a live query and printing every state it publishes
//! - Writing records (which notifies live queries)
//! - Viewing and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gaswatch_core::config::Config;

mod commands;
mod output;

use commands::{
    config::ConfigCommand,
    query::QueryCommand,
    records::{DeleteCommand, InsertCommand, UpdateCommand},
    watch::WatchCommand,
    CommandContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "gaswatch", version, about = "Live queries over gas-leak sensor data")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read a collection or document once
    Query(QueryCommand),
    /// Keep a query live and print every state change
    Watch(WatchCommand),
    /// Insert a record
    Insert(InsertCommand),
    /// Merge fields into a record
    Update(UpdateCommand),
    /// Delete a record
    Delete(DeleteCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Sets up tracing from the config, overridden by `-v` and `RUST_LOG`
fn init_tracing(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout stays parseable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);
    init_tracing(&config, cli.verbose);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CommandContext::new(format, config_path, config);

    match cli.command {
        Commands::Query(cmd) => cmd.execute(&ctx).await,
        Commands::Watch(cmd) => cmd.execute(&ctx).await,
        Commands::Insert(cmd) => cmd.execute(&ctx).await,
        Commands::Update(cmd) => cmd.execute(&ctx).await,
        Commands::Delete(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
    }
}
