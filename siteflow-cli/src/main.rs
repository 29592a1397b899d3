//! Siteflow CLI
//!
//! Drives the orchestrator against the HTTP services configured through
//! `SITEFLOW_*` variables or a JSON config file.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use siteflow::config::OrchestratorConfig;
use siteflow::observability::{init_tracing, LogFormat};
use std::path::PathBuf;

use commands::{handle_command, Commands};

#[derive(Parser)]
#[command(name = "siteflow")]
#[command(about = "Generate, deploy, and modify web projects", long_about = None)]
struct Cli {
    /// JSON config file. Defaults to SITEFLOW_* environment variables.
    #[arg(long, env = "SITEFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (pretty or json)
    #[arg(long, env = "SITEFLOW_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, "info").context("Failed to initialize logging")?;

    let config = match cli.config {
        Some(ref path) => OrchestratorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => OrchestratorConfig::from_env().context("Failed to load config from environment")?,
    };

    handle_command(cli.command, config, cli.json).await
}
