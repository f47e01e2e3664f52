//! CLI for the pullarr sync engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pullarr_core::config;

use commands::{run_check, run_engine, run_status};

/// Top-level CLI for the pullarr sync engine.
#[derive(Debug, Parser)]
#[command(name = "pullarr")]
#[command(about = "pullarr: seedbox-to-library sync and import orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the poll/sync/move/notify loop until interrupted.
    Run {
        /// Run a single reconciliation cycle, wait for it to settle, and exit.
        #[arg(long)]
        once: bool,
    },

    /// Show the pipeline state of every tracked download.
    Status,

    /// Verify connectivity to every configured source and app.
    Check,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run { once } => run_engine(cfg, once).await?,
            CliCommand::Status => run_status().await?,
            CliCommand::Check => run_check(&cfg).await?,
        }

        Ok(())
    }
}
