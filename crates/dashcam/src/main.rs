//! Dashcam Recorder - Main Entry Point
//!
//! Usage: `dashcam [CONFIG_FILE]` (default `dashcam.toml`, optional)

use std::path::PathBuf;

use anyhow::Context;
use dashcam::config::DEFAULT_CONFIG_FILE;
use dashcam::{init_logging, DashcamConfig, Orchestrator};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let config = DashcamConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    init_logging(config.debug).context("installing log subscriber")?;

    info!("=== Dashcam Recorder v{} ===", env!("CARGO_PKG_VERSION"));
    if config.debug {
        info!("Debug mode: fixed ignition, dry-run eviction, no power-off");
    }

    let orchestrator = Orchestrator::from_config(config)?;
    let report = orchestrator.run().await?;
    info!(
        "Shutdown complete: {} frames in final recording {}",
        report.frames,
        report.archived.display()
    );

    Ok(())
}
