//! Opens the state store selected by configuration.

use std::sync::Arc;

use closer_core::config::{AppConfig, StorageBackend};
use closer_core::persistence::StateStore;
use tracing::info;

use crate::repositories::{
    AnomalyRepository, InMemoryStateStore, JsonDirStateStore, RepositoryError,
    SqlAnomalyRepository, SqlStateStore,
};
use crate::{connect_with_settings, migrations, DbPool};

pub struct Storage {
    pub backend: StorageBackend,
    pub state: Arc<dyn StateStore>,
    /// Present only for the SQLite backend.
    pub anomalies: Option<Arc<dyn AnomalyRepository>>,
    pub pool: Option<DbPool>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StorageError {
    fn from(value: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(value))
    }
}

/// SQLite stores are migrated before they are handed out.
pub async fn open(config: &AppConfig) -> Result<Storage, StorageError> {
    let storage = match config.storage.backend {
        StorageBackend::Sqlite => {
            let pool = connect_with_settings(
                &config.database.url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await?;
            migrations::run_pending(&pool).await?;

            Storage {
                backend: StorageBackend::Sqlite,
                state: Arc::new(SqlStateStore::new(pool.clone())),
                anomalies: Some(Arc::new(SqlAnomalyRepository::new(pool.clone()))),
                pool: Some(pool),
            }
        }
        StorageBackend::JsonDir => Storage {
            backend: StorageBackend::JsonDir,
            state: Arc::new(JsonDirStateStore::new(config.storage.data_dir.clone())),
            anomalies: None,
            pool: None,
        },
        StorageBackend::Memory => Storage {
            backend: StorageBackend::Memory,
            state: Arc::new(InMemoryStateStore::default()),
            anomalies: None,
            pool: None,
        },
    };

    info!(
        event_name = "db.storage.opened",
        backend = ?storage.backend,
        "state storage opened"
    );
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use closer_core::config::{AppConfig, StorageBackend};
    use closer_core::persistence::DocumentKind;
    use tempfile::TempDir;

    use super::open;

    #[tokio::test]
    async fn sqlite_backend_is_migrated_and_usable() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;

        let storage = open(&config).await.expect("open sqlite storage");
        assert!(storage.anomalies.is_some());
        storage.state.save(DocumentKind::Arms, "[]").await.expect("save");
        assert_eq!(storage.state.load(DocumentKind::Arms).await.expect("load").as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn json_dir_backend_uses_data_dir() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::JsonDir;
        config.storage.data_dir = dir.path().to_path_buf();

        let storage = open(&config).await.expect("open json storage");
        storage.state.save(DocumentKind::Drift, "{}").await.expect("save");

        assert!(storage.pool.is_none());
        assert!(dir.path().join("drift.json").exists());
    }
}
