//! sigmad — the SigmaGrid fleet orchestrator.
//!
//! Reads a fleet document, places training and selfplay jobs on the
//! configured workers over ssh, and keeps them running: dead jobs are
//! respawned, replay bytes flow from selfplay to training through local
//! pipes, and every new trainer checkpoint is pushed back out to the
//! selfplay workers.
//!
//! # Usage
//!
//! ```text
//! sigmad /etc/sigmagrid/fleet.toml
//! RUST_LOG=info,sigma_scheduler=trace sigmad fleet.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sigma_core::FleetConfig;
use sigma_remote::{Executor, SshExecutor};
use sigma_scheduler::Scheduler;
use tokio::sync::watch;
use tracing::{error, info};

const DEFAULT_FILTER: &str = "info,sigmad=debug,sigma=debug";

#[derive(Debug, Parser)]
#[command(name = "sigmad", about = "SigmaGrid self-play fleet orchestrator", version)]
struct Cli {
    /// Path to the fleet configuration (TOML).
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(&cli.config)?;
    std::fs::create_dir_all(&config.workdir)
        .with_context(|| format!("creating workdir {}", config.workdir.display()))?;
    info!(
        config = %cli.config.display(),
        workers = config.workers.len(),
        "SigmaGrid orchestrator starting"
    );

    let executor: Arc<dyn Executor> = Arc::new(SshExecutor::new());
    let mut scheduler = Scheduler::from_config(&config, executor)?;

    // ── Initial placement ──────────────────────────────────────

    match scheduler.start().await {
        Ok(started) => info!(jobs = started.len(), "initial placement done"),
        Err(e) => {
            scheduler.shutdown().await;
            return Err(e).context("initial placement failed");
        }
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "cannot listen for ctrl-c, running until killed");
                // Dropping the sender would read as a shutdown request.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    // ── Control loop ───────────────────────────────────────────

    scheduler
        .run(config.tick_interval(), shutdown_rx)
        .await
        .context("scheduler loop failed")?;

    info!("SigmaGrid orchestrator stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_path_is_positional() {
        let cli = Cli::try_parse_from(["sigmad", "fleet.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("fleet.toml"));
    }

    #[test]
    fn config_path_is_required() {
        assert!(Cli::try_parse_from(["sigmad"]).is_err());
    }

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<tracing_subscriber::EnvFilter>().is_ok());
    }
}
