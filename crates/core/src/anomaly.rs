//! Rolling z-score anomaly detection over named metric streams.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::PersistenceError;
use crate::persistence::DirtyFlag;
use crate::stats::RollingWindow;
use crate::sync;

pub const DEFAULT_WINDOW_SIZE: usize = 500;
pub const DEFAULT_RETENTION: usize = 2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    /// Open intervals: `|z| == 2.0` is not an anomaly.
    pub fn classify(z: f64) -> Option<Self> {
        let magnitude = z.abs();
        if magnitude > 3.0 {
            Some(Self::High)
        } else if magnitude > 2.0 {
            Some(Self::Medium)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub id: String,
    pub metric: String,
    pub value: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub mean: f64,
    pub std: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyMetrics {
    pub total: usize,
    pub last: Option<AnomalyRecord>,
    pub high: usize,
    pub metrics: usize,
}

/// Durable destination for flagged records. Failures are logged by the
/// detector and never reach the caller.
pub trait AnomalySink: Send + Sync {
    fn persist(&self, record: &AnomalyRecord) -> Result<(), PersistenceError>;

    /// Stops accepting records. Records already accepted may still be written.
    fn close(&self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnomalySettings {
    pub window_size: usize,
    pub retention: usize,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self { window_size: DEFAULT_WINDOW_SIZE, retention: DEFAULT_RETENTION }
    }
}

pub struct AnomalyDetector {
    settings: AnomalySettings,
    windows: RwLock<HashMap<String, Mutex<RollingWindow>>>,
    records: Mutex<VecDeque<AnomalyRecord>>,
    sink: Option<Arc<dyn AnomalySink>>,
    dirty: DirtyFlag,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(AnomalySettings::default())
    }
}

impl AnomalyDetector {
    pub fn new(settings: AnomalySettings) -> Self {
        Self {
            settings: AnomalySettings {
                window_size: settings.window_size.max(2),
                retention: settings.retention.max(1),
            },
            windows: RwLock::new(HashMap::new()),
            records: Mutex::new(VecDeque::new()),
            sink: None,
            dirty: DirtyFlag::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AnomalySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Adds `value` to the metric's window and flags it when the z-score over
    /// the window (including `value`) leaves the `[-2, 2]` band.
    pub fn record(&self, metric: &str, value: f64, note: Option<&str>) -> Option<AnomalyRecord> {
        if !value.is_finite() {
            debug!(event_name = "engine.anomaly.non_finite_skipped", metric, "non-finite value skipped");
            return None;
        }

        let (mean, std) = self.observe(metric, value);
        let z = if std > 0.0 { (value - mean) / std } else { 0.0 };
        let severity = Severity::classify(z)?;

        let record = AnomalyRecord {
            id: Uuid::new_v4().to_string(),
            metric: metric.to_string(),
            value,
            severity,
            timestamp: Utc::now(),
            mean,
            std,
            z,
            note: note.map(str::to_string),
        };

        {
            let mut records = sync::lock(&self.records);
            records.push_back(record.clone());
            while records.len() > self.settings.retention {
                records.pop_front();
            }
        }
        self.dirty.mark();

        warn!(
            event_name = "engine.anomaly.detected",
            metric,
            value,
            z,
            severity = severity.as_str(),
            "metric anomaly detected"
        );

        if let Some(sink) = &self.sink {
            if let Err(error) = sink.persist(&record) {
                warn!(
                    event_name = "engine.anomaly.sink_failed",
                    metric,
                    error = %error,
                    "anomaly sink write failed"
                );
            }
        }

        Some(record)
    }

    /// Newest first.
    pub fn get_anomalies(&self, metric: &str, limit: usize) -> Vec<AnomalyRecord> {
        sync::lock(&self.records)
            .iter()
            .rev()
            .filter(|record| record.metric == metric)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn close_sink(&self) {
        if let Some(sink) = &self.sink {
            sink.close();
        }
    }

    /// Newest first.
    pub fn get_all(&self, limit: usize) -> Vec<AnomalyRecord> {
        sync::lock(&self.records).iter().rev().take(limit).cloned().collect()
    }

    pub fn metrics(&self) -> AnomalyMetrics {
        let records = sync::lock(&self.records);
        let distinct: BTreeSet<&str> = records.iter().map(|record| record.metric.as_str()).collect();

        AnomalyMetrics {
            total: records.len(),
            last: records.back().cloned(),
            high: records.iter().filter(|record| record.severity == Severity::High).count(),
            metrics: distinct.len(),
        }
    }

    /// Oldest first, as held in the ring buffer.
    pub fn export_records(&self) -> Vec<AnomalyRecord> {
        sync::lock(&self.records).iter().cloned().collect()
    }

    pub fn import_records(&self, records: Vec<AnomalyRecord>) {
        let skip = records.len().saturating_sub(self.settings.retention);
        *sync::lock(&self.records) = records.into_iter().skip(skip).collect();
    }

    pub fn dirty(&self) -> &DirtyFlag {
        &self.dirty
    }

    fn observe(&self, metric: &str, value: f64) -> (f64, f64) {
        {
            let windows = sync::read(&self.windows);
            if let Some(window) = windows.get(metric) {
                let mut window = sync::lock(window);
                window.push(value);
                return (window.mean(), window.std_dev());
            }
        }

        let mut windows = sync::write(&self.windows);
        let window = windows
            .entry(metric.to_string())
            .or_insert_with(|| Mutex::new(RollingWindow::new(self.settings.window_size)));
        let mut window = sync::lock(window);
        window.push(value);
        (window.mean(), window.std_dev())
    }
}
