use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn, Level};

use keepsake_core::{run_scheduled, KeepsakeConfig, MemorySystem, METRICS};

#[derive(Parser)]
#[command(name = "keepsaked")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keepsake maintenance daemon", long_about = None)]
struct Cli {
    /// Config file (default: ./keepsake.toml if present)
    #[arg(short, long, env = "KEEPSAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    keepsake_core::init_tracing(cli.json, level);

    let config = KeepsakeConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let system = tokio::task::spawn_blocking(move || MemorySystem::open(config))
        .await
        .context("Open task panicked")?
        .context("Failed to open memory store")?;
    let system = Arc::new(system);

    let repaired = system.store().check_integrity();
    if repaired > 0 {
        warn!(repaired, "tag index repaired at startup");
    }
    info!(
        version = keepsake_core::VERSION,
        memories = system.store().len(),
        "keepsaked started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_scheduled(system.clone(), shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();

    let summary = scheduler.await.context("Scheduler task panicked")?;
    METRICS.flush();
    match &summary.final_snapshot {
        Some(id) => info!(
            snapshot = %id,
            backups = summary.backups,
            tiering_passes = summary.tiering_passes,
            failures = summary.failures,
            "keepsaked stopped"
        ),
        None => warn!(failures = summary.failures, "keepsaked stopped without a final snapshot"),
    }
    Ok(())
}
