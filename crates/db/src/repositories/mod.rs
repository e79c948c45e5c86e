use async_trait::async_trait;
use thiserror::Error;

use closer_core::anomaly::AnomalyRecord;
use closer_core::errors::PersistenceError;

pub mod anomaly;
pub mod document;
pub mod json_dir;
pub mod memory;

pub use anomaly::{SqlAnomalyRepository, SqlAnomalySink};
pub use document::SqlStateStore;
pub use json_dir::JsonDirStateStore;
pub use memory::{InMemoryAnomalyRepository, InMemoryStateStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for PersistenceError {
    fn from(value: RepositoryError) -> Self {
        PersistenceError::Storage(value.to_string())
    }
}

/// Durable history of flagged anomalies, beyond the in-memory ring buffer.
#[async_trait]
pub trait AnomalyRepository: Send + Sync {
    /// Returns `false` when a record with the same id was already stored.
    async fn insert(&self, record: &AnomalyRecord) -> Result<bool, RepositoryError>;
    /// Newest first.
    async fn list(
        &self,
        metric: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnomalyRecord>, RepositoryError>;
}

pub(crate) fn checksum(body: &str) -> String {
    blake3::hash(body.as_bytes()).to_hex().to_string()
}
