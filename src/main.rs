//! Porchlet - package orchestration over OCI registries
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use porchlet::cli::{Cli, Commands};
use porchlet::config::{Config, ConfigManager};
use porchlet::error::PorchletResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PorchletResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;

    init_logging(cli.verbose, &config);
    debug!("Loaded config from {}", manager.path().display());

    match cli.command {
        Commands::Function(args) => porchlet::cli::commands::function(args, &config).await,
        Commands::Runtime(args) => porchlet::cli::commands::runtime(args, &config).await,
        Commands::Rpkg(args) => porchlet::cli::commands::rpkg(args, &config, &manager).await,
        Commands::Config(args) => porchlet::cli::commands::config(args, &config, &manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `general.verbose` counts as one `-v`
fn init_logging(verbose: u8, config: &Config) {
    let level = verbose.max(u8::from(config.general.verbose));
    let filter = match level {
        0 => EnvFilter::new("porchlet=warn"),
        1 => EnvFilter::new("porchlet=info"),
        _ => EnvFilter::new("porchlet=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
}
