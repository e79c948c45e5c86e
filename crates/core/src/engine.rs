//! Composition root wiring the bandit, allocator, guardrails and observers.
//!
//! One `DecisionEngine` is built per process and shared behind an `Arc`. It
//! owns no I/O: durable state moves through [`StateStore`] in [`restore`] and
//! [`flush`], which the server drives from its own tasks.
//!
//! [`restore`]: DecisionEngine::restore
//! [`flush`]: DecisionEngine::flush

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocator::{AllocatorHealth, AllocatorMetrics, AllocatorSettings, BudgetAllocator};
use crate::anomaly::{AnomalyDetector, AnomalyMetrics, AnomalyRecord, AnomalySettings, AnomalySink};
use crate::bandit::{BanditEngine, BanditMetrics, PerformanceSignal, RecalibrationReport, Selection};
use crate::config::{AppConfig, MAX_GUARDRAIL_WINDOW_HOURS};
use crate::domain::allocation::{
    AllocationDecision, AllocationPlan, AllocationStrategy, DecisionId,
};
use crate::domain::arm::{ArmCategory, ArmId};
use crate::domain::campaign::{Campaign, CampaignId, CampaignPatch};
use crate::domain::context::DecisionContext;
use crate::domain::outcome::Outcome;
use crate::drift::{DriftBaseline, DriftCheck, DriftDetector, DriftMetrics};
use crate::errors::{ApplicationError, DomainError, PersistenceError};
use crate::guardrails::{
    GuardrailSettings, GuardrailSnapshot, GuardrailState, GuardrailThresholds, Guardrails,
};
use crate::persistence::{decode, encode, DirtyFlag, DocumentKind, StateStore};

/// Reward fed to the bandit for an order that was created but not yet paid.
pub const DEFAULT_CREATED_ORDER_REWARD: f64 = 0.3;

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub guardrails: GuardrailSettings,
    pub anomaly: AnomalySettings,
    pub allocator: AllocatorSettings,
    pub created_order_reward: f64,
    pub recalibration_strength: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            guardrails: GuardrailSettings::default(),
            anomaly: AnomalySettings::default(),
            allocator: AllocatorSettings::default(),
            created_order_reward: DEFAULT_CREATED_ORDER_REWARD,
            recalibration_strength: crate::bandit::DEFAULT_RECALIBRATION_STRENGTH,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        // Validation bounds the window; the clamp keeps unvalidated configs from overflowing.
        let window_hours = config.guardrails.window_hours.min(MAX_GUARDRAIL_WINDOW_HOURS) as i64;
        Self {
            guardrails: GuardrailSettings {
                thresholds: GuardrailThresholds {
                    min_conversions: config.guardrails.min_conversions,
                    max_spend_without_conversion: config.guardrails.max_spend_without_conversion,
                },
                window: Duration::hours(window_hours),
                event_log_limit: config.guardrails.event_log_limit,
            },
            anomaly: AnomalySettings {
                window_size: config.anomaly.window_size,
                retention: config.anomaly.retention,
            },
            allocator: AllocatorSettings {
                approvals_enabled: config.engine.approvals_enabled,
                history_limit: config.engine.decision_history_limit,
            },
            created_order_reward: config.engine.created_order_reward,
            recalibration_strength: config.engine.recalibration_strength,
        }
    }
}

/// What `record_outcome` did with one outcome event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub reward: Option<f64>,
    pub arms_updated: usize,
    pub unknown_arms: Vec<ArmId>,
    pub campaign: Option<Campaign>,
    pub guardrails_frozen: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub bandit: BanditMetrics,
    pub allocator: AllocatorMetrics,
    pub health: AllocatorHealth,
    pub guardrails: GuardrailState,
    pub anomalies: AnomalyMetrics,
    pub drift: DriftMetrics,
    pub approvals_enabled: bool,
    pub pending_decisions: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestoreReport {
    pub loaded: Vec<DocumentKind>,
    pub missing: Vec<DocumentKind>,
    pub failed: Vec<(DocumentKind, PersistenceError)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushReport {
    pub saved: Vec<DocumentKind>,
    pub skipped: Vec<DocumentKind>,
    pub failed: Vec<(DocumentKind, PersistenceError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct DecisionEngine {
    settings: EngineSettings,
    bandit: Arc<BanditEngine>,
    guardrails: Arc<Guardrails>,
    allocator: BudgetAllocator,
    anomaly: AnomalyDetector,
    drift: DriftDetector,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl DecisionEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::assemble(settings, BanditEngine::with_default_catalog(), None)
    }

    pub fn with_bandit(settings: EngineSettings, bandit: BanditEngine) -> Self {
        Self::assemble(settings, bandit, None)
    }

    pub fn with_anomaly_sink(settings: EngineSettings, sink: Arc<dyn AnomalySink>) -> Self {
        Self::assemble(settings, BanditEngine::with_default_catalog(), Some(sink))
    }

    fn assemble(
        settings: EngineSettings,
        bandit: BanditEngine,
        sink: Option<Arc<dyn AnomalySink>>,
    ) -> Self {
        let bandit = Arc::new(bandit);
        let guardrails = Arc::new(Guardrails::new(settings.guardrails.clone()));
        let signal: Arc<dyn PerformanceSignal> = bandit.clone();
        let allocator = BudgetAllocator::new(settings.allocator)
            .with_signal(signal)
            .with_guardrails(guardrails.clone());

        let mut anomaly = AnomalyDetector::new(settings.anomaly);
        if let Some(sink) = sink {
            anomaly = anomaly.with_sink(sink);
        }

        Self { settings, bandit, guardrails, allocator, anomaly, drift: DriftDetector::new() }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn bandit(&self) -> &BanditEngine {
        &self.bandit
    }

    pub fn allocator(&self) -> &BudgetAllocator {
        &self.allocator
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    pub fn anomaly_detector(&self) -> &AnomalyDetector {
        &self.anomaly
    }

    pub fn drift_detector(&self) -> &DriftDetector {
        &self.drift
    }

    pub fn select(
        &self,
        category: ArmCategory,
        context: &DecisionContext,
    ) -> Result<Selection, DomainError> {
        self.bandit.select(category, context)
    }

    pub fn select_by_name(
        &self,
        category: &str,
        context: &DecisionContext,
    ) -> Result<Selection, DomainError> {
        self.bandit.select_by_name(category, context)
    }

    /// Fans one outcome out to every selected arm, the guardrail windows and
    /// the attributed campaign. Unknown arms are skipped and reported.
    pub fn record_outcome(&self, arm_ids: &[ArmId], outcome: &Outcome) -> OutcomeReport {
        let reward = outcome.bandit_reward(self.settings.created_order_reward);
        let revenue = if outcome.revenue.is_finite() { outcome.revenue.max(0.0) } else { 0.0 };
        let cost = if outcome.cost.is_finite() { outcome.cost.max(0.0) } else { 0.0 };
        // An unpaid order earns partial reward but no revenue credit on the arms.
        let arm_revenue = if outcome.created && !outcome.conversion { 0.0 } else { revenue };
        let mut report = OutcomeReport { reward, ..OutcomeReport::default() };

        for arm_id in arm_ids {
            let applied = match reward {
                Some(reward) => self.bandit.update(arm_id, reward, arm_revenue).map(|_| ()),
                None => Ok(()),
            }
            .and_then(|()| {
                if outcome.impression || outcome.interaction {
                    self.bandit.record_exposure(arm_id, outcome.impression, outcome.interaction)
                } else {
                    Ok(())
                }
            });

            match applied {
                Ok(()) if reward.is_some() => report.arms_updated += 1,
                Ok(()) => {}
                Err(error) => {
                    warn!(
                        event_name = "engine.outcome.unknown_arm",
                        arm_id = %arm_id,
                        error = %error,
                        "outcome referenced an unknown arm"
                    );
                    report.unknown_arms.push(arm_id.clone());
                }
            }
        }

        let mut guardrails_touched = false;
        if outcome.conversion {
            self.guardrails.record_conversion();
            guardrails_touched = true;
        }
        if outcome.created {
            self.guardrails.record_created();
            guardrails_touched = true;
        }
        if cost > 0.0 {
            self.guardrails.record_spend(cost);
            guardrails_touched = true;
        }
        report.guardrails_frozen = if guardrails_touched {
            self.guardrails.check(&GuardrailSnapshot::default()).frozen
        } else {
            self.guardrails.is_frozen()
        };

        if let Some(campaign_id) = &outcome.campaign_id {
            let conversions = u64::from(outcome.conversion);
            report.campaign =
                Some(self.allocator.record_result(campaign_id, cost, conversions, revenue));
        }

        debug!(
            event_name = "engine.outcome.recorded",
            arms = arm_ids.len(),
            arms_updated = report.arms_updated,
            reward = ?report.reward,
            cost,
            revenue,
            "outcome recorded"
        );
        report
    }

    pub fn add_or_update_campaign(&self, id: CampaignId, patch: CampaignPatch) -> Campaign {
        self.allocator.add_or_update_campaign(id, patch)
    }

    pub fn allocate(
        &self,
        strategy: AllocationStrategy,
    ) -> Result<AllocationDecision, ApplicationError> {
        self.allocator.allocate(strategy)
    }

    pub fn preview_allocate(
        &self,
        strategy: AllocationStrategy,
    ) -> Result<AllocationPlan, DomainError> {
        self.allocator.preview(strategy)
    }

    pub fn approve(&self, id: &DecisionId) -> Result<AllocationDecision, DomainError> {
        self.allocator.approve(id)
    }

    pub fn list_pending(&self) -> Vec<AllocationDecision> {
        self.allocator.list_pending()
    }

    pub fn guardrail_status(&self) -> GuardrailState {
        self.guardrails.state()
    }

    pub fn check_guardrails(&self, snapshot: &GuardrailSnapshot) -> GuardrailState {
        self.guardrails.check(snapshot)
    }

    pub fn force_freeze(&self, reason: Option<&str>) -> GuardrailState {
        self.guardrails.force_freeze(reason)
    }

    pub fn unfreeze(&self, reason: Option<&str>) -> GuardrailState {
        self.guardrails.unfreeze(reason)
    }

    pub fn recalibrate(&self) -> RecalibrationReport {
        self.bandit.recalibrate_priors(self.settings.recalibration_strength)
    }

    pub fn record_metric(&self, name: &str, value: f64, note: Option<&str>) -> Option<AnomalyRecord> {
        self.anomaly.record(name, value, note)
    }

    /// Detaches the durable anomaly log so its writer can drain and stop.
    /// Anomalies flagged afterwards are kept in memory only.
    pub fn close_anomaly_sink(&self) {
        self.anomaly.close_sink();
    }

    /// Newest first; `None` lists every metric.
    pub fn anomalies(&self, metric: Option<&str>, limit: usize) -> Vec<AnomalyRecord> {
        match metric {
            Some(metric) => self.anomaly.get_anomalies(metric, limit),
            None => self.anomaly.get_all(limit),
        }
    }

    pub fn build_drift_baseline<T>(
        &self,
        samples: &[T],
        feature: impl Fn(&T) -> f64,
    ) -> DriftBaseline {
        self.drift.build_baseline(samples, feature)
    }

    pub fn evaluate_drift<T>(&self, samples: &[T], feature: impl Fn(&T) -> f64) -> DriftCheck {
        self.drift.evaluate_current(samples, feature)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            bandit: self.bandit.metrics(),
            allocator: self.allocator.metrics(),
            health: self.allocator.health(),
            guardrails: self.guardrails.state(),
            anomalies: self.anomaly.metrics(),
            drift: self.drift.metrics(),
            approvals_enabled: self.allocator.approvals_enabled(),
            pending_decisions: self.allocator.list_pending().len(),
        }
    }

    pub fn has_dirty_state(&self) -> bool {
        DocumentKind::ALL.iter().any(|kind| self.dirty_flag(*kind).is_set())
    }

    /// Loads every document independently. Missing documents keep defaults;
    /// unreadable ones are logged and also keep defaults.
    pub async fn restore(&self, store: &dyn StateStore) -> RestoreReport {
        let mut report = RestoreReport::default();

        for kind in DocumentKind::ALL {
            let loaded = match store.load(kind).await {
                Ok(Some(body)) => self.apply_document(kind, &body).map(|()| true),
                Ok(None) => Ok(false),
                Err(error) => Err(error),
            };

            match loaded {
                Ok(true) => report.loaded.push(kind),
                Ok(false) => report.missing.push(kind),
                Err(error) => {
                    warn!(
                        event_name = "engine.persistence.load_failed",
                        document = kind.as_str(),
                        error = %error,
                        "document could not be restored; keeping defaults"
                    );
                    report.failed.push((kind, error));
                }
            }
        }

        info!(
            event_name = "engine.persistence.restored",
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "engine state restored"
        );
        report
    }

    /// Saves dirty documents, or all of them when `force` is set. A failed
    /// save re-marks its document so the next flush retries it.
    pub async fn flush(&self, store: &dyn StateStore, force: bool) -> FlushReport {
        let mut report = FlushReport::default();

        for kind in DocumentKind::ALL {
            let flag = self.dirty_flag(kind);
            if !flag.take() && !force {
                report.skipped.push(kind);
                continue;
            }

            let saved = match self.encode_document(kind) {
                Ok(body) => store.save(kind, &body).await,
                Err(error) => Err(error),
            };

            match saved {
                Ok(()) => report.saved.push(kind),
                Err(error) => {
                    flag.mark();
                    warn!(
                        event_name = "engine.persistence.save_failed",
                        document = kind.as_str(),
                        error = %error,
                        "document save failed; will retry"
                    );
                    report.failed.push((kind, error));
                }
            }
        }

        if !report.saved.is_empty() {
            debug!(
                event_name = "engine.persistence.flushed",
                saved = report.saved.len(),
                failed = report.failed.len(),
                force,
                "engine state flushed"
            );
        }
        report
    }

    fn dirty_flag(&self, kind: DocumentKind) -> &DirtyFlag {
        match kind {
            DocumentKind::Arms => self.bandit.dirty(),
            DocumentKind::Campaigns => self.allocator.campaigns_dirty(),
            DocumentKind::Decisions => self.allocator.decisions_dirty(),
            DocumentKind::Guardrails => self.guardrails.dirty(),
            DocumentKind::Anomalies => self.anomaly.dirty(),
            DocumentKind::Drift => self.drift.dirty(),
        }
    }

    fn encode_document(&self, kind: DocumentKind) -> Result<String, PersistenceError> {
        match kind {
            DocumentKind::Arms => encode(kind, &self.bandit.export_arms()),
            DocumentKind::Campaigns => encode(kind, &self.allocator.export_campaigns()),
            DocumentKind::Decisions => encode(kind, &self.allocator.export_decisions()),
            DocumentKind::Guardrails => encode(kind, &self.guardrails.export_document()),
            DocumentKind::Anomalies => encode(kind, &self.anomaly.export_records()),
            DocumentKind::Drift => encode(kind, &self.drift.export_document()),
        }
    }

    fn apply_document(&self, kind: DocumentKind, body: &str) -> Result<(), PersistenceError> {
        match kind {
            DocumentKind::Arms => {
                self.bandit.import_arms(decode(kind, body)?);
            }
            DocumentKind::Campaigns => self.allocator.import_campaigns(decode(kind, body)?),
            DocumentKind::Decisions => self.allocator.import_decisions(decode(kind, body)?),
            DocumentKind::Guardrails => self.guardrails.import_document(decode(kind, body)?),
            DocumentKind::Anomalies => self.anomaly.import_records(decode(kind, body)?),
            DocumentKind::Drift => self.drift.import_document(decode(kind, body)?),
        }
        Ok(())
    }
}
