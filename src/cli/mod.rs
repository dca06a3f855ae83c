//! Command-line interface.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::adapters::WorkerRegistry;
use crate::domain::models::Roster;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::events::JsonlEventSink;
use crate::infrastructure::logging;
use crate::services::QueueDispatcher;

#[derive(Parser)]
#[command(name = "switchboard", about = "File-queue orchestrator for agent CLIs", version)]
pub struct Cli {
    /// Path to a configuration file (defaults to switchboard.yaml discovery).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the queue dispatcher.
    Serve,
    /// Validate the configuration and exit.
    Check,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Command::Check => {
            println!(
                "Configuration OK: {} agents, {} teams, {} swarms",
                config.agents.len(),
                config.teams.len(),
                config.swarms.len()
            );
            Ok(())
        }
        Command::Serve => {
            let _log_guard = logging::init(&config.logging)?;

            let config = Arc::new(config);
            let roster = Arc::new(Roster::from_config(&config).context("Invalid roster")?);
            let worker = Arc::new(WorkerRegistry::new(config.worker.clone()));
            let events = Arc::new(JsonlEventSink::new(config.events_dir()));

            info!(
                workspace = %config.workspace_root.display(),
                agents = config.agents.len(),
                "starting queue dispatcher"
            );

            let mut dispatcher = QueueDispatcher::new(config, roster, worker, events);
            dispatcher.run().await
        }
    }
}
