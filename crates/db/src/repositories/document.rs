use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use closer_core::errors::PersistenceError;
use closer_core::persistence::{DocumentKind, StateStore};

use super::{checksum, RepositoryError};
use crate::DbPool;

/// One row per engine document in `engine_document`.
pub struct SqlStateStore {
    pool: DbPool,
}

impl SqlStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, kind: DocumentKind) -> Result<Option<(String, String)>, RepositoryError> {
        let row = sqlx::query("SELECT body, checksum FROM engine_document WHERE name = ?")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String =
                    row.try_get("body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let stored: String =
                    row.try_get("checksum").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(Some((body, stored)))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, kind: DocumentKind, body: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO engine_document (name, body, checksum, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                 body = excluded.body,
                 checksum = excluded.checksum,
                 updated_at = excluded.updated_at",
        )
        .bind(kind.as_str())
        .bind(body)
        .bind(checksum(body))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqlStateStore {
    async fn load(&self, kind: DocumentKind) -> Result<Option<String>, PersistenceError> {
        match self.fetch(kind).await? {
            Some((body, stored)) if stored == checksum(&body) => Ok(Some(body)),
            Some(_) => Err(PersistenceError::Checksum { document: kind.as_str().to_string() }),
            None => Ok(None),
        }
    }

    async fn save(&self, kind: DocumentKind, body: &str) -> Result<(), PersistenceError> {
        self.upsert(kind, body).await.map_err(PersistenceError::from)
    }
}
