//! tradecore state engine - entry point.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use tc_engine::{Engine, EngineConfig, EngineDeps};
use tc_persistence::JsonlPositionStore;

/// tradecore account and market state engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TRADECORE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tc_telemetry::init_logging()?;

    info!("Starting tradecore v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TRADECORE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TRADECORE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = EngineConfig::from_file(&config_path)?;
    info!(
        dry_run = config.dry_run,
        data_dir = %config.persistence.data_dir,
        "Configuration loaded"
    );

    if !config.dry_run {
        bail!("live mode needs an exchange balance source; this binary only runs dry_run = true");
    }

    let store = Arc::new(JsonlPositionStore::open(&config.persistence.data_dir)?);
    let engine = Engine::new(config, EngineDeps::new(store))?;
    engine.run().await?;

    Ok(())
}
