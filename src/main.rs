use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{LevelFilter, info};
use std::fs;
use std::path::PathBuf;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use cli::replay::{self, ReplayOptions};
use config::Config;

fn setup_logging(level: Option<LevelFilter>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("callstream")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("callstream.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Verbose wins, then RUST_LOG, then the configured level
fn log_level(cli: &Cli, config: &Config) -> Option<LevelFilter> {
    if cli.is_verbose() {
        return Some(LevelFilter::Debug);
    }
    if std::env::var_os("RUST_LOG").is_some() {
        return None;
    }
    config.log_level.as_deref().and_then(|level| level.parse().ok())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Replay {
            log,
            format,
            content_target,
            no_record,
        } => {
            let options = ReplayOptions {
                format: format.map(Into::into).unwrap_or(config.replay.format),
                content_target: content_target.clone().or_else(|| config.replay.content_target.clone()),
                show_record: config.replay.show_record && !no_record,
            };
            info!("Replaying {} with {:?}", log.display(), options);
            replay::replay(log, &options).await
        }
        Commands::Print { log } => {
            info!("Printing {}", log.display());
            replay::print(log)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(log_level(&cli, &config)).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
