use std::collections::HashMap;

use tokio::sync::RwLock;

use closer_core::anomaly::AnomalyRecord;
use closer_core::errors::PersistenceError;
use closer_core::persistence::{DocumentKind, StateStore};

use super::{AnomalyRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryStateStore {
    documents: RwLock<HashMap<DocumentKind, String>>,
}

impl InMemoryStateStore {
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, kind: DocumentKind) -> Result<Option<String>, PersistenceError> {
        let documents = self.documents.read().await;
        Ok(documents.get(&kind).cloned())
    }

    async fn save(&self, kind: DocumentKind, body: &str) -> Result<(), PersistenceError> {
        let mut documents = self.documents.write().await;
        documents.insert(kind, body.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAnomalyRepository {
    records: RwLock<Vec<AnomalyRecord>>,
}

#[async_trait::async_trait]
impl AnomalyRepository for InMemoryAnomalyRepository {
    async fn insert(&self, record: &AnomalyRecord) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        if records.iter().any(|existing| existing.id == record.id) {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn list(
        &self,
        metric: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnomalyRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<AnomalyRecord> = records
            .iter()
            .filter(|record| metric.map_or(true, |metric| record.metric == metric))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }
}
