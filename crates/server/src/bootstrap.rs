use std::sync::Arc;
use std::time::Duration;

use closer_core::config::{AppConfig, ConfigError, LoadOptions};
use closer_core::engine::{DecisionEngine, EngineSettings, RestoreReport};
use closer_db::repositories::anomaly::DEFAULT_SINK_CAPACITY;
use closer_db::{SqlAnomalySink, Storage, StorageError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub storage: Storage,
    pub engine: Arc<DecisionEngine>,
    pub restore: RestoreReport,
    /// Background writer draining the durable anomaly sink, when one exists.
    pub anomaly_writer: Option<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage initialization failed: {0}")]
    Storage(#[from] StorageError),
}

impl Application {
    /// Closes the durable anomaly sink and waits up to `grace` for the
    /// writer to store what was already queued. Returns false when the
    /// writer had to be aborted.
    pub async fn drain_anomalies(&mut self, grace: Duration) -> bool {
        let Some(mut writer) = self.anomaly_writer.take() else {
            return true;
        };
        self.engine.close_anomaly_sink();

        match tokio::time::timeout(grace, &mut writer).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(
                    event_name = "system.shutdown.anomaly_writer_failed",
                    correlation_id = "shutdown",
                    error = %error,
                    "anomaly writer ended abnormally"
                );
                false
            }
            Err(_) => {
                writer.abort();
                warn!(
                    event_name = "system.shutdown.anomaly_drain_timeout",
                    correlation_id = "shutdown",
                    "queued anomaly records were not stored within the grace period"
                );
                false
            }
        }
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        backend = ?config.storage.backend,
        "starting application bootstrap"
    );

    let storage = closer_db::open(&config).await?;
    let settings = EngineSettings::from_config(&config);

    let (engine, anomaly_writer) = match &storage.anomalies {
        Some(repository) => {
            let (sink, writer) = SqlAnomalySink::spawn(repository.clone(), DEFAULT_SINK_CAPACITY);
            (DecisionEngine::with_anomaly_sink(settings, Arc::new(sink)), Some(writer))
        }
        None => (DecisionEngine::new(settings), None),
    };

    let restore = engine.restore(storage.state.as_ref()).await;
    if !restore.failed.is_empty() {
        warn!(
            event_name = "system.bootstrap.partial_restore",
            correlation_id = "bootstrap",
            failed = restore.failed.len(),
            "some engine documents could not be restored; defaults kept"
        );
    }
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        arms = engine.bandit().arm_count(),
        campaigns = engine.allocator().campaigns().len(),
        restored = restore.loaded.len(),
        "decision engine ready"
    );

    Ok(Application { config, storage, engine: Arc::new(engine), restore, anomaly_writer })
}
