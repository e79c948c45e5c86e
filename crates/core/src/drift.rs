//! Mean-shift drift detection between a baseline and the current sample.
//!
//! The detector is feature-agnostic: callers pass samples plus a closure that
//! extracts the numeric feature to compare.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::persistence::DirtyFlag;
use crate::stats::Summary;
use crate::sync;

/// z-score that maps to a drift score of 1.
pub const SATURATION_Z: f64 = 5.0;
pub const DRIFT_THRESHOLD: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Stable,
    Watch,
    Drift,
}

impl DriftStatus {
    pub fn from_score(score: f64) -> Self {
        if score < 0.4 {
            Self::Stable
        } else if score <= 0.7 {
            Self::Watch
        } else {
            Self::Drift
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftBaseline {
    pub sample_size: usize,
    pub mean: f64,
    pub variance: f64,
    pub built_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftEvaluation {
    pub sample_size: usize,
    pub mean: f64,
    pub variance: f64,
    pub z: f64,
    pub drift_score: f64,
    pub has_drift: bool,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftCheck {
    pub drift_score: f64,
    pub has_drift: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftMetrics {
    pub drift_score: f64,
    pub status: DriftStatus,
    pub baseline: Option<DriftBaseline>,
    pub last_evaluation: Option<DriftEvaluation>,
}

/// Persisted detector state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftDocument {
    pub baseline: Option<DriftBaseline>,
    pub last_evaluation: Option<DriftEvaluation>,
}

#[derive(Default)]
pub struct DriftDetector {
    state: Mutex<DriftDocument>,
    dirty: DirtyFlag,
}

impl DriftDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_baseline<T>(&self, samples: &[T], feature: impl Fn(&T) -> f64) -> DriftBaseline {
        let summary = summarize(samples, feature);
        let baseline = DriftBaseline {
            sample_size: summary.count,
            mean: summary.mean,
            variance: summary.variance(),
            built_at: Utc::now(),
        };

        sync::lock(&self.state).baseline = Some(baseline);
        self.dirty.mark();
        info!(
            event_name = "engine.drift.baseline_built",
            sample_size = baseline.sample_size,
            mean = baseline.mean,
            "drift baseline built"
        );
        baseline
    }

    /// Compares the current samples against the baseline. Without a baseline
    /// the result is a zero score and nothing is stored.
    pub fn evaluate_current<T>(&self, samples: &[T], feature: impl Fn(&T) -> f64) -> DriftCheck {
        let mut state = sync::lock(&self.state);
        let Some(baseline) = state.baseline else {
            return DriftCheck::default();
        };

        let current = summarize(samples, feature);
        let pooled = pooled_std(baseline.sample_size, baseline.variance, current.count, current.variance());
        let z = (current.mean - baseline.mean).abs() / pooled;
        let drift_score = (z / SATURATION_Z).min(1.0);
        let has_drift = drift_score > DRIFT_THRESHOLD;

        state.last_evaluation = Some(DriftEvaluation {
            sample_size: current.count,
            mean: current.mean,
            variance: current.variance(),
            z,
            drift_score,
            has_drift,
            evaluated_at: Utc::now(),
        });
        self.dirty.mark();

        if has_drift {
            warn!(
                event_name = "engine.drift.detected",
                drift_score,
                baseline_mean = baseline.mean,
                current_mean = current.mean,
                "feature drift detected"
            );
        }
        DriftCheck { drift_score, has_drift }
    }

    /// Result of the last evaluation.
    pub fn check_drift(&self) -> DriftCheck {
        sync::lock(&self.state)
            .last_evaluation
            .map(|evaluation| DriftCheck {
                drift_score: evaluation.drift_score,
                has_drift: evaluation.has_drift,
            })
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> DriftMetrics {
        let state = sync::lock(&self.state);
        let drift_score = state.last_evaluation.map_or(0.0, |evaluation| evaluation.drift_score);
        DriftMetrics {
            drift_score,
            status: DriftStatus::from_score(drift_score),
            baseline: state.baseline,
            last_evaluation: state.last_evaluation,
        }
    }

    pub fn export_document(&self) -> DriftDocument {
        sync::lock(&self.state).clone()
    }

    pub fn import_document(&self, document: DriftDocument) {
        *sync::lock(&self.state) = document;
    }

    pub fn dirty(&self) -> &DirtyFlag {
        &self.dirty
    }
}

/// Non-finite feature values are dropped.
fn summarize<T>(samples: &[T], feature: impl Fn(&T) -> f64) -> Summary {
    let mut summary = Summary::default();
    for value in samples.iter().map(feature).filter(|value| value.is_finite()) {
        summary.push(value);
    }
    summary
}

/// Falls back to 1 when the pooled estimate is degenerate.
fn pooled_std(n1: usize, var1: f64, n2: usize, var2: f64) -> f64 {
    let dof = (n1 + n2) as f64 - 2.0;
    if dof <= 0.0 {
        return 1.0;
    }
    let weighted = n1.saturating_sub(1) as f64 * var1 + n2.saturating_sub(1) as f64 * var2;
    let pooled = (weighted / dof).sqrt();
    if pooled.is_finite() && pooled > 0.0 {
        pooled
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::{DriftCheck, DriftDetector, DriftStatus};

    fn identity(value: &f64) -> f64 {
        *value
    }

    #[test]
    fn identical_distributions_score_zero() {
        let detector = DriftDetector::new();
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0];
        detector.build_baseline(&samples, identity);

        let check = detector.evaluate_current(&samples, identity);

        assert_eq!(check, DriftCheck { drift_score: 0.0, has_drift: false });
        assert_eq!(detector.metrics().status, DriftStatus::Stable);
    }

    #[test]
    fn extreme_shift_saturates_at_one() {
        let detector = DriftDetector::new();
        detector.build_baseline(&[1.0, 2.0, 3.0, 4.0, 5.0], identity);

        let check = detector.evaluate_current(&[1001.0, 1002.0, 1003.0, 1004.0, 1005.0], identity);

        assert_eq!(check.drift_score, 1.0);
        assert!(check.has_drift);
        assert_eq!(detector.check_drift(), check);
        assert_eq!(detector.metrics().status, DriftStatus::Drift);
    }

    #[test]
    fn missing_baseline_reports_no_drift() {
        let detector = DriftDetector::new();
        let check = detector.evaluate_current(&[10.0, 20.0], identity);

        assert_eq!(check, DriftCheck::default());
        assert!(detector.metrics().last_evaluation.is_none());
    }

    #[test]
    fn constant_samples_use_unit_pooled_std() {
        let detector = DriftDetector::new();
        detector.build_baseline(&[2.0, 2.0, 2.0], identity);

        let check = detector.evaluate_current(&[4.0, 4.0, 4.0], identity);

        // z = |4 - 2| / 1
        assert!((check.drift_score - 0.4).abs() < 1e-12);
        assert!(!check.has_drift);
    }

    #[test]
    fn feature_closure_extracts_from_arbitrary_samples() {
        struct Lead {
            messages: u32,
        }

        let detector = DriftDetector::new();
        let baseline: Vec<Lead> = (0..10).map(|i| Lead { messages: 5 + i % 2 }).collect();
        detector.build_baseline(&baseline, |lead| f64::from(lead.messages));

        let metrics = detector.metrics();
        assert_eq!(metrics.baseline.map(|b| b.sample_size), Some(10));
        assert!((metrics.baseline.map_or(0.0, |b| b.mean) - 5.5).abs() < 1e-12);
    }

    #[test]
    fn status_tiers_follow_score_boundaries() {
        assert_eq!(DriftStatus::from_score(0.39), DriftStatus::Stable);
        assert_eq!(DriftStatus::from_score(0.4), DriftStatus::Watch);
        assert_eq!(DriftStatus::from_score(0.7), DriftStatus::Watch);
        assert_eq!(DriftStatus::from_score(0.71), DriftStatus::Drift);
    }
}
