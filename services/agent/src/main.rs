//! Conflux Agent
//!
//! Runs a component graph described by a JSON configuration file.
//!
//! ## Signals
//!
//! - **SIGHUP**: re-read the configuration file and reload the graph; a
//!   rejected configuration leaves the running graph untouched
//! - **SIGINT / SIGTERM**: stop every node and service task, bounded by the
//!   shutdown grace period

use anyhow::{Context, Result};
use conflux_agent::{Agent, Config};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        config_file = %config.config_file.display(),
        data_dir = %config.data_dir.display(),
        node_name = %config.node_name,
        shutdown_grace_ms = config.shutdown_grace.as_millis() as u64,
        "Starting conflux agent"
    );

    let agent = Agent::new(config)?;
    let summary = agent
        .reload()
        .await
        .context("initial configuration load failed")?;
    info!(
        generation = summary.generation,
        nodes = summary.added.len(),
        unhealthy = summary.unhealthy.len(),
        "Initial configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let run = agent.run(shutdown_rx);
    tokio::pin!(run);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                let _ = shutdown_tx.send(true);
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                let _ = shutdown_tx.send(true);
            }
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                match agent.reload().await {
                    Ok(summary) => info!(
                        reload_id = %summary.reload_id,
                        generation = summary.generation,
                        added = summary.added.len(),
                        removed = summary.removed.len(),
                        "Configuration reloaded"
                    ),
                    Err(e) => error!(error = %format!("{e:#}"), "Configuration reload failed, keeping previous graph"),
                }
            }
        }
    };

    match result {
        Ok(report) => {
            info!(
                stopped = report.stopped,
                abandoned = report.abandoned.len(),
                "Conflux agent shutdown complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Conflux agent stopped with error");
            Err(e)
        }
    }
}
