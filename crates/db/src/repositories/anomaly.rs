use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use closer_core::anomaly::{AnomalyRecord, AnomalySink, Severity};
use closer_core::errors::PersistenceError;

use super::{AnomalyRepository, RepositoryError};
use crate::DbPool;

pub const DEFAULT_SINK_CAPACITY: usize = 256;

pub struct SqlAnomalyRepository {
    pool: DbPool,
}

impl SqlAnomalyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_severity(value: &str) -> Result<Severity, RepositoryError> {
    match value {
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        other => Err(RepositoryError::Decode(format!("unknown severity `{other}`"))),
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<AnomalyRecord, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());
    let severity: String = row.try_get("severity").map_err(decode)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(decode)?;
    let timestamp = DateTime::parse_from_rfc3339(&recorded_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(AnomalyRecord {
        id: row.try_get("id").map_err(decode)?,
        metric: row.try_get("metric").map_err(decode)?,
        value: row.try_get("value").map_err(decode)?,
        severity: parse_severity(&severity)?,
        timestamp,
        mean: row.try_get("mean").map_err(decode)?,
        std: row.try_get("std").map_err(decode)?,
        z: row.try_get("z").map_err(decode)?,
        note: row.try_get("note").map_err(decode)?,
    })
}

#[async_trait]
impl AnomalyRepository for SqlAnomalyRepository {
    async fn insert(&self, record: &AnomalyRecord) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO anomaly_record
                 (id, metric, value, severity, mean, std, z, note, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.metric)
        .bind(record.value)
        .bind(record.severity.as_str())
        .bind(record.mean)
        .bind(record.std)
        .bind(record.z)
        .bind(&record.note)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        metric: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnomalyRecord>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match metric {
            Some(metric) => {
                sqlx::query(
                    "SELECT id, metric, value, severity, mean, std, z, note, recorded_at
                     FROM anomaly_record WHERE metric = ?
                     ORDER BY recorded_at DESC, rowid DESC LIMIT ?",
                )
                .bind(metric)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, metric, value, severity, mean, std, z, note, recorded_at
                     FROM anomaly_record
                     ORDER BY recorded_at DESC, rowid DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }
}

/// Bridges the detector's synchronous sink to an async repository.
///
/// Records are queued on a bounded channel and written by a background task,
/// so `persist` never blocks the caller. A full queue is reported as an error
/// and the record is dropped from the durable log only. Closing the sink
/// drops the sender; the writer finishes the queue and exits.
pub struct SqlAnomalySink {
    sender: Mutex<Option<mpsc::Sender<AnomalyRecord>>>,
}

impl SqlAnomalySink {
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        repository: Arc<dyn AnomalyRepository>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AnomalyRecord>(capacity.max(1));

        let writer = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(error) = repository.insert(&record).await {
                    warn!(
                        event_name = "db.anomaly.insert_failed",
                        anomaly_id = %record.id,
                        metric = %record.metric,
                        error = %error,
                        "anomaly record could not be stored"
                    );
                }
            }
        });

        (Self { sender: Mutex::new(Some(sender)) }, writer)
    }
}

impl AnomalySink for SqlAnomalySink {
    fn persist(&self, record: &AnomalyRecord) -> Result<(), PersistenceError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = sender
            .as_ref()
            .ok_or_else(|| PersistenceError::Storage("anomaly sink closed".to_string()))?;
        sender.try_send(record.clone()).map_err(|error| {
            PersistenceError::Storage(format!("anomaly sink unavailable: {error}"))
        })
    }

    fn close(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use closer_core::anomaly::{AnomalyRecord, AnomalySink, Severity};

    use super::{SqlAnomalyRepository, SqlAnomalySink};
    use crate::repositories::AnomalyRepository;
    use crate::{connect_with_settings, migrations};

    async fn repository() -> SqlAnomalyRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlAnomalyRepository::new(pool)
    }

    fn record(id: &str, metric: &str, minutes_ago: i64) -> AnomalyRecord {
        AnomalyRecord {
            id: id.to_string(),
            metric: metric.to_string(),
            value: 42.0,
            severity: Severity::High,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            mean: 10.0,
            std: 5.0,
            z: 6.4,
            note: Some("cpl spike".to_string()),
        }
    }

    #[tokio::test]
    async fn duplicate_ids_are_ignored() {
        let repository = repository().await;
        assert!(repository.insert(&record("a-1", "spend", 0)).await.expect("insert"));
        assert!(!repository.insert(&record("a-1", "spend", 0)).await.expect("insert again"));

        assert_eq!(repository.list(None, 10).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_metric_newest_first() {
        let repository = repository().await;
        repository.insert(&record("old", "spend", 30)).await.expect("insert");
        repository.insert(&record("new", "spend", 1)).await.expect("insert");
        repository.insert(&record("other", "conversion_rate", 5)).await.expect("insert");

        let spend = repository.list(Some("spend"), 10).await.expect("list");
        let ids: Vec<&str> = spend.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(spend[0].note.as_deref(), Some("cpl spike"));
        assert_eq!(repository.list(None, 1).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn sink_writes_through_background_task() {
        let repository = Arc::new(repository().await);
        let (sink, writer) = SqlAnomalySink::spawn(repository.clone(), 8);

        sink.persist(&record("queued", "spend", 0)).expect("queue record");
        drop(sink);
        writer.await.expect("writer task");

        let stored = repository.list(Some("spend"), 10).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "queued");
    }

    #[tokio::test]
    async fn closed_sink_drains_queue_and_refuses_new_records() {
        let repository = Arc::new(repository().await);
        let (sink, writer) = SqlAnomalySink::spawn(repository.clone(), 8);

        for id in ["first", "second", "third"] {
            sink.persist(&record(id, "spend", 0)).expect("queue record");
        }
        sink.close();
        assert!(sink.persist(&record("late", "spend", 0)).is_err());

        // The sink itself is still alive; closing alone lets the writer finish.
        tokio::time::timeout(std::time::Duration::from_secs(5), writer)
            .await
            .expect("writer drained")
            .expect("writer task");

        let stored = repository.list(Some("spend"), 10).await.expect("list");
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|r| r.id != "late"));
    }
}
