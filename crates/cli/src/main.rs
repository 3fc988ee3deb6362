//! toolweave CLI: the main entry point.
//!
//! Commands:
//! - `run`: play a scripted model through the run loop, frames to stdout
//! - `decode`: rebuild a run's aggregate from a frame stream
//! - `config`: inspect and validate configuration
//!
//! Frames go to stdout and logs to stderr, so `toolweave run ... | toolweave decode`
//! works as a pipeline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use toolweave_config::{AppConfig, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "toolweave",
    about = "toolweave: multi-step tool-calling runs as framed streams",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.toolweave/config.toml
    #[arg(short, long, global = true, env = "TOOLWEAVE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted model through the step loop
    Run(commands::run::RunArgs),

    /// Decode NDJSON frames into the run aggregate
    Decode {
        /// Read frames from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging, cli.verbose);

    match cli.command {
        Commands::Run(args) => commands::run::run(config?, args).await?,
        Commands::Decode { input } => commands::decode::run(input).await?,
        Commands::Config { action } => commands::config_cmd::run(config, action)?,
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` means debug, else the configured level.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
