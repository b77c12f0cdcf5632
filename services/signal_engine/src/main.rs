//! Signal engine service entry point
//!
//! Ticks arrive as JSON lines on stdin (one `{symbol, bid, ask, volume,
//! timestamp}` record per line) from the external feed bridge; orders go
//! to the paper sink unless a broker client is wired in. Configuration
//! resolves from `VIGIL_CONFIG_PATH`, falling back to defaults with
//! environment overrides.

use anyhow::{Context, Result};
use config::EngineConfig;
use signal_engine::execution::PaperSink;
use signal_engine::Engine;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::Tick;

const TICK_CHANNEL_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("starting vigil signal engine");

    let config = load_config().context("failed to load engine configuration")?;
    config
        .validate()
        .context("engine configuration is invalid")?;
    info!(
        timeframes = ?config.aggregator.timeframes,
        min_score = config.scorer.min_score,
        scan_interval_secs = config.detectors.scan_interval_secs,
        "configuration loaded"
    );

    let engine = Engine::new(config, Arc::new(PaperSink))?;

    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(TICK_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let feed = tokio::spawn(read_tick_feed(tick_tx));
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(tick_rx, shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    feed.abort();
    runner.await.context("engine task failed")?;

    info!("vigil signal engine stopped");
    Ok(())
}

fn load_config() -> Result<EngineConfig> {
    match std::env::var("VIGIL_CONFIG_PATH") {
        Ok(path) => EngineConfig::from_file(&path),
        Err(_) => Ok(EngineConfig::from_env()),
    }
}

/// Bridge the external feed into the tick channel; malformed lines are
/// logged and skipped, never fatal
async fn read_tick_feed(tick_tx: mpsc::Sender<Tick>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Tick>(&line) {
                    Ok(tick) => {
                        if tick_tx.send(tick).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed tick line skipped"),
                }
            }
            Ok(None) => {
                info!("tick feed reached end of input");
                break;
            }
            Err(e) => {
                warn!(error = %e, "tick feed read error");
                break;
            }
        }
    }
}
