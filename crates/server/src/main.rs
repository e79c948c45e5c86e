mod bootstrap;
mod health;
mod tasks;

use std::time::Duration;

use anyhow::Result;
use closer_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use closer_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let mut app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState::new(app.engine.clone(), app.storage.pool.clone()),
    )
    .await?;

    let autosave = tasks::spawn_autosave(
        app.engine.clone(),
        app.storage.state.clone(),
        Duration::from_secs(app.config.engine.autosave_secs),
        shutdown_rx.clone(),
    );
    let allocation = tasks::spawn_allocation(
        app.engine.clone(),
        app.config.allocation.strategy,
        Duration::from_secs(app.config.allocation.interval_secs),
        shutdown_rx,
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        autosave_secs = app.config.engine.autosave_secs,
        allocation_interval_secs = app.config.allocation.interval_secs,
        restored_documents = app.restore.loaded.len(),
        "closer-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "closer-server stopping"
    );

    // Tickers stop first so the final flush sees no concurrent writer.
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let stopped = tokio::time::timeout(grace, async {
        let _ = autosave.await;
        if let Some(allocation) = allocation {
            let _ = allocation.await;
        }
    })
    .await;
    if stopped.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "background tasks did not stop within the grace period"
        );
    }

    let report = app.engine.flush(app.storage.state.as_ref(), true).await;
    tracing::info!(
        event_name = "system.server.final_flush",
        correlation_id = "shutdown",
        saved = report.saved.len(),
        failed = report.failed.len(),
        "final state flush completed"
    );

    // The anomaly writer shares the pool, so it drains before the pool closes.
    app.drain_anomalies(grace).await;
    if let Some(pool) = app.storage.pool {
        pool.close().await;
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
