//! # faultline
//!
//! CLI for running simulated degraded-mode scenarios.
//!
//! ## Commands
//!
//! - `run`: Preload objects, run background reads, writes and deletes, delete a
//!   simulated pod inside the fault window, then report and judge the results
//! - `check-config`: Validate a configuration file and print the effective values
//!
//! ## Example
//!
//! ```bash
//! # Run with defaults
//! faultline run
//!
//! # Run from a config file, logging events as JSON lines
//! faultline --config faultline.toml run --json-log events.jsonl
//!
//! # Show the effective configuration
//! faultline --config faultline.toml check-config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faultline_core::HarnessConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{check_config, run};

/// Fault-window workload harness.
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulated pod-failure scenario
    Run {
        /// Scenario name used in events and the run record
        #[arg(long, default_value = "multi-data-pod-failure")]
        name: String,

        /// Component to delete inside the fault window
        #[arg(long, default_value = "data-pod-0")]
        component: String,

        /// Number of objects written before the scenario starts
        #[arg(long, default_value = "100")]
        preload: u64,

        /// Append events and the run record to this file as JSON lines
        #[arg(long)]
        json_log: Option<PathBuf>,
    },

    /// Validate configuration and print the effective values
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            name,
            component,
            preload,
            json_log,
        } => {
            let options = run::RunOptions {
                name,
                component,
                preload,
                json_log,
            };
            let passed = run::run(&config, &options).await?;
            if !passed {
                anyhow::bail!("scenario {} failed", options.name);
            }
        }
        Commands::CheckConfig => {
            check_config::run(&config)?;
        }
    }

    Ok(())
}

/// Load and validate the config file, or fall back to defaults.
fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(HarnessConfig::default()),
    }
}
