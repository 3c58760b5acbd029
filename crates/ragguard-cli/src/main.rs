//! RagGuard CLI
//!
//! Inspect configuration and drive probe traffic through the guarded LLM
//! query path.

use anyhow::Result;
use clap::Parser;
use ragguard_core::error::exit_codes;
use ragguard_core::{Config, RagGuardError};

mod app;
mod commands;
mod output;

use app::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Config(args) => commands::config::run(args, &config_path, cli.format).await,
        Commands::Probe(args) => {
            let config = Config::load_from(&config_path)?;
            commands::probe::run(args, config, cli.format).await
        }
        Commands::Status => {
            let config = Config::load_from(&config_path)?;
            commands::status::run(config, cli.format).await
        }
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<RagGuardError>()
        .map_or(exit_codes::GENERAL_ERROR, RagGuardError::exit_code)
}
