use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use closer_core::errors::PersistenceError;
use closer_core::persistence::{DocumentKind, StateStore};

use super::checksum;

/// One `<name>.json` file per document under a data directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
pub struct JsonDirStateStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    checksum: String,
    saved_at: DateTime<Utc>,
    body: String,
}

impl JsonDirStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, kind: DocumentKind) -> PathBuf {
        self.root.join(format!("{}.json", kind.as_str()))
    }
}

fn io_error(kind: DocumentKind, error: std::io::Error) -> PersistenceError {
    PersistenceError::Io { document: kind.as_str().to_string(), message: error.to_string() }
}

#[async_trait]
impl StateStore for JsonDirStateStore {
    async fn load(&self, kind: DocumentKind) -> Result<Option<String>, PersistenceError> {
        let raw = match tokio::fs::read_to_string(self.path_for(kind)).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(io_error(kind, error)),
        };

        let stored: StoredDocument =
            serde_json::from_str(&raw).map_err(|error| PersistenceError::Serialization {
                document: kind.as_str().to_string(),
                message: error.to_string(),
            })?;

        if stored.checksum != checksum(&stored.body) {
            return Err(PersistenceError::Checksum { document: kind.as_str().to_string() });
        }
        Ok(Some(stored.body))
    }

    async fn save(&self, kind: DocumentKind, body: &str) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|error| io_error(kind, error))?;

        let stored =
            StoredDocument { checksum: checksum(body), saved_at: Utc::now(), body: body.to_string() };
        let encoded = serde_json::to_string_pretty(&stored).map_err(|error| {
            PersistenceError::Serialization {
                document: kind.as_str().to_string(),
                message: error.to_string(),
            }
        })?;

        let target = self.path_for(kind);
        let staging = target.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded).await.map_err(|error| io_error(kind, error))?;
        tokio::fs::rename(&staging, &target).await.map_err(|error| io_error(kind, error))
    }
}
