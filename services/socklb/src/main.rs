//! socklb
//!
//! Replays recorded socket events through the load-balancer engine.
//!
//! This binary:
//! - Loads feature switches and the state file location from the environment
//! - Builds service, backend and identity tables from the state file
//! - Reads one JSON socket event per line from stdin
//! - Writes one JSON decision per line to stdout

use std::sync::Arc;

use anyhow::{Context, Result};
use socklb::lb::SockLb;
use socklb::maps::LbMaps;
use socklb::metrics::LbMetrics;
use socklb::persistence::StatePersistence;
use socklb::replay::evaluate_line;
use socklb::Config;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SOCKLB_LOG_LEVEL).
    // Logs go to stderr; stdout carries decisions.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting socklb replay");
    info!(
        state_file = ?config.state_file,
        host_only = config.lb.host_only,
        nodeport_range = %config.lb.nodeport_range,
        "Configuration loaded"
    );

    let metrics = Arc::new(LbMetrics::new());
    let lb = match &config.state_file {
        Some(path) => {
            let state = StatePersistence::new(path.clone()).load()?;
            let loaded = state.load_tables().context("Failed to build tables from state")?;
            SockLb::new(config.lb.clone(), loaded.maps)
                .with_ipcache(loaded.ipcache)
                .with_sockets(loaded.listeners)
        }
        None => {
            warn!("No state file configured, every socket passes through");
            SockLb::new(config.lb.clone(), LbMaps::in_memory())
        }
    }
    .with_metrics(metrics.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut processed = 0u64;
    let mut skipped = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        match evaluate_line(&lb, &line) {
            Ok(decision) => {
                let mut out = serde_json::to_vec(&decision).context("Failed to encode decision")?;
                out.push(b'\n');
                stdout.write_all(&out).await.context("Failed to write stdout")?;
                processed += 1;
            }
            Err(e) => {
                warn!(error = ?e, "Skipping malformed event");
                skipped += 1;
            }
        }
    }
    stdout.flush().await.context("Failed to flush stdout")?;

    let snapshot = metrics.snapshot();
    for (direction, reason, count) in &snapshot.entries {
        info!(direction = ?direction, reason = %reason, count, "Drop counter");
    }
    info!(processed, skipped, drops = snapshot.total(), "Replay finished");

    Ok(())
}
