//! Jobtrack CLI - job application tracker client

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use std::path::PathBuf;
use tokio::task::LocalSet;
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Track your job applications from the terminal")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Data directory for the stored session, configuration and logs
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (defaults to <data-dir>/config.toml)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = config::resolve_data_dir(cli.data_dir);

    let component = match &cli.command {
        Commands::Watch { .. } => "watch",
        _ => "cli",
    };
    logging::init_logging(cli.log_level.into(), &data_dir, component, cli.no_file_log)?;

    info!("Starting Jobtrack CLI");

    // Session types are single-threaded; their timers need a LocalSet.
    let outcome = LocalSet::new()
        .run_until(cli.command.execute(data_dir, cli.config))
        .await;

    match outcome {
        Ok(()) => {
            info!("Command completed successfully");
        }
        Err(e) => {
            error!("Command failed: {e:#}");
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }

    Ok(())
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}
