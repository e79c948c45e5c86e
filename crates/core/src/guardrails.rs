//! Spend-versus-conversion safety switch for budget allocation.
//!
//! Three timestamped event logs (spend, conversions, created orders) are
//! pruned to a rolling window on every mutating call. `check` recomputes the
//! windows and drives the `Active`/`Frozen` state machine.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::persistence::DirtyFlag;
use crate::sync;

pub const MANUAL_FREEZE_REASON: &str = "manual-freeze";
pub const MANUAL_UNFREEZE_REASON: &str = "manual-unfreeze";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardrailThresholds {
    pub min_conversions: u64,
    pub max_spend_without_conversion: f64,
}

impl Default for GuardrailThresholds {
    fn default() -> Self {
        Self { min_conversions: 1, max_spend_without_conversion: 150.0 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GuardrailSettings {
    pub thresholds: GuardrailThresholds,
    pub window: Duration,
    /// Newest events kept per log when the state is exported.
    pub event_log_limit: usize,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            thresholds: GuardrailThresholds::default(),
            window: Duration::hours(24),
            event_log_limit: 500,
        }
    }
}

/// Caller-supplied 24h figures, used for any window whose log is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailSnapshot {
    pub spend: f64,
    pub conversions: u64,
    pub created: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailMode {
    Active,
    Frozen,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailState {
    pub last_check: Option<DateTime<Utc>>,
    pub frozen: bool,
    pub spend_window: f64,
    pub conversions_window: u64,
    pub created_window: u64,
    pub reason: Option<String>,
}

impl GuardrailState {
    pub fn mode(&self) -> GuardrailMode {
        if self.frozen {
            GuardrailMode::Frozen
        } else {
            GuardrailMode::Active
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpendEvent {
    pub at: DateTime<Utc>,
    pub amount: f64,
}

/// Persisted form: state plus the bounded event logs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailDocument {
    pub state: GuardrailState,
    pub spend: Vec<SpendEvent>,
    pub conversions: Vec<DateTime<Utc>>,
    pub created: Vec<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    state: GuardrailState,
    spend: VecDeque<SpendEvent>,
    conversions: VecDeque<DateTime<Utc>>,
    created: VecDeque<DateTime<Utc>>,
}

impl Inner {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        // A cutoff before the representable range means every event is in the window.
        let Some(cutoff) = now.checked_sub_signed(window) else {
            return;
        };
        self.spend.retain(|event| event.at >= cutoff);
        self.conversions.retain(|at| *at >= cutoff);
        self.created.retain(|at| *at >= cutoff);
    }

    fn logged_spend(&self) -> f64 {
        self.spend.iter().map(|event| event.amount).sum()
    }
}

pub struct Guardrails {
    settings: GuardrailSettings,
    inner: Mutex<Inner>,
    dirty: DirtyFlag,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::new(GuardrailSettings::default())
    }
}

impl Guardrails {
    pub fn new(settings: GuardrailSettings) -> Self {
        Self { settings, inner: Mutex::new(Inner::default()), dirty: DirtyFlag::default() }
    }

    pub fn thresholds(&self) -> GuardrailThresholds {
        self.settings.thresholds
    }

    /// Non-positive or non-finite amounts are ignored.
    pub fn record_spend(&self, amount: f64) {
        self.record_spend_at(amount, Utc::now());
    }

    pub fn record_spend_at(&self, amount: f64, now: DateTime<Utc>) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        let mut inner = sync::lock(&self.inner);
        inner.spend.push_back(SpendEvent { at: now, amount });
        inner.prune(now, self.settings.window);
        inner.state.spend_window = inner.logged_spend();
        self.dirty.mark();
    }

    pub fn record_conversion(&self) {
        self.record_conversion_at(Utc::now());
    }

    pub fn record_conversion_at(&self, now: DateTime<Utc>) {
        let mut inner = sync::lock(&self.inner);
        inner.conversions.push_back(now);
        inner.prune(now, self.settings.window);
        inner.state.conversions_window = inner.conversions.len() as u64;
        self.dirty.mark();
    }

    pub fn record_created(&self) {
        self.record_created_at(Utc::now());
    }

    pub fn record_created_at(&self, now: DateTime<Utc>) {
        let mut inner = sync::lock(&self.inner);
        inner.created.push_back(now);
        inner.prune(now, self.settings.window);
        inner.state.created_window = inner.created.len() as u64;
        self.dirty.mark();
    }

    pub fn check_budget_guardrails(
        &self,
        snapshot: &GuardrailSnapshot,
        thresholds: &GuardrailThresholds,
    ) -> GuardrailState {
        self.check_at(snapshot, thresholds, Utc::now())
    }

    /// Check against the configured thresholds.
    pub fn check(&self, snapshot: &GuardrailSnapshot) -> GuardrailState {
        self.check_at(snapshot, &self.settings.thresholds, Utc::now())
    }

    pub fn check_at(
        &self,
        snapshot: &GuardrailSnapshot,
        thresholds: &GuardrailThresholds,
        now: DateTime<Utc>,
    ) -> GuardrailState {
        let mut inner = sync::lock(&self.inner);
        inner.prune(now, self.settings.window);
        inner.state.last_check = Some(now);

        inner.state.spend_window =
            if inner.spend.is_empty() { snapshot.spend.max(0.0) } else { inner.logged_spend() };
        inner.state.conversions_window = if inner.conversions.is_empty() {
            snapshot.conversions
        } else {
            inner.conversions.len() as u64
        };
        inner.state.created_window = if inner.created.is_empty() {
            snapshot.created.unwrap_or(inner.state.created_window)
        } else {
            inner.created.len() as u64
        };

        let spend = inner.state.spend_window;
        let conversions = inner.state.conversions_window;

        if conversions < thresholds.min_conversions
            && spend >= thresholds.max_spend_without_conversion
        {
            if !inner.state.frozen {
                warn!(
                    event_name = "engine.guardrails.frozen",
                    spend,
                    conversions,
                    "budget allocation frozen"
                );
            }
            inner.state.frozen = true;
            inner.state.reason = Some(format!("no conversions with spend {spend:.2}"));
        } else if inner.state.frozen && conversions >= thresholds.min_conversions {
            inner.state.frozen = false;
            inner.state.reason = None;
            info!(
                event_name = "engine.guardrails.unfrozen",
                spend,
                conversions,
                "budget allocation resumed"
            );
        }

        self.dirty.mark();
        inner.state.clone()
    }

    pub fn force_freeze(&self, reason: Option<&str>) -> GuardrailState {
        self.set_manual(true, reason.unwrap_or(MANUAL_FREEZE_REASON))
    }

    pub fn unfreeze(&self, reason: Option<&str>) -> GuardrailState {
        self.set_manual(false, reason.unwrap_or(MANUAL_UNFREEZE_REASON))
    }

    pub fn state(&self) -> GuardrailState {
        sync::lock(&self.inner).state.clone()
    }

    pub fn is_frozen(&self) -> bool {
        sync::lock(&self.inner).state.frozen
    }

    /// Logs are pruned and truncated to the newest `event_log_limit` entries.
    pub fn export_document(&self) -> GuardrailDocument {
        let mut inner = sync::lock(&self.inner);
        inner.prune(Utc::now(), self.settings.window);
        let limit = self.settings.event_log_limit;

        GuardrailDocument {
            state: inner.state.clone(),
            spend: newest(&inner.spend, limit),
            conversions: newest(&inner.conversions, limit),
            created: newest(&inner.created, limit),
        }
    }

    pub fn import_document(&self, document: GuardrailDocument) {
        let mut inner = sync::lock(&self.inner);
        inner.state = document.state;
        inner.spend = document.spend.into_iter().collect();
        inner.conversions = document.conversions.into_iter().collect();
        inner.created = document.created.into_iter().collect();
    }

    pub fn dirty(&self) -> &DirtyFlag {
        &self.dirty
    }

    fn set_manual(&self, frozen: bool, reason: &str) -> GuardrailState {
        let mut inner = sync::lock(&self.inner);
        inner.state.frozen = frozen;
        inner.state.reason = Some(reason.to_string());
        inner.state.last_check = Some(Utc::now());
        self.dirty.mark();

        let event_name = if frozen {
            "engine.guardrails.manual_freeze"
        } else {
            "engine.guardrails.manual_unfreeze"
        };
        info!(
            event_name,
            reason,
            "guardrail state overridden"
        );
        inner.state.clone()
    }
}

fn newest<T: Clone>(log: &VecDeque<T>, limit: usize) -> Vec<T> {
    log.iter().skip(log.len().saturating_sub(limit)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        GuardrailMode, GuardrailSettings, GuardrailSnapshot, GuardrailThresholds, Guardrails,
    };

    fn thresholds(max_spend: f64) -> GuardrailThresholds {
        GuardrailThresholds { min_conversions: 1, max_spend_without_conversion: max_spend }
    }

    #[test]
    fn spend_at_threshold_without_conversions_freezes() {
        let guardrails = Guardrails::default();
        guardrails.record_spend(80.0);

        let state = guardrails.check_budget_guardrails(&GuardrailSnapshot::default(), &thresholds(80.0));

        assert!(state.frozen);
        assert_eq!(state.mode(), GuardrailMode::Frozen);
        assert_eq!(state.reason.as_deref(), Some("no conversions with spend 80.00"));
    }

    #[test]
    fn spend_below_threshold_stays_active() {
        let guardrails = Guardrails::default();
        guardrails.record_spend(79.0);

        let state = guardrails.check_budget_guardrails(&GuardrailSnapshot::default(), &thresholds(80.0));
        assert!(!state.frozen);
    }

    #[test]
    fn conversion_unfreezes_on_next_check() {
        let guardrails = Guardrails::default();
        guardrails.record_spend(80.0);
        assert!(guardrails.check_budget_guardrails(&GuardrailSnapshot::default(), &thresholds(80.0)).frozen);

        guardrails.record_conversion();
        let state = guardrails.check_budget_guardrails(&GuardrailSnapshot::default(), &thresholds(80.0));

        assert!(!state.frozen);
        assert_eq!(state.reason, None);
        assert_eq!(state.conversions_window, 1);
    }

    #[test]
    fn empty_logs_fall_back_to_snapshot() {
        let guardrails = Guardrails::default();
        let snapshot = GuardrailSnapshot { spend: 200.0, conversions: 0, created: Some(3) };

        let state = guardrails.check(&snapshot);

        assert!(state.frozen);
        assert_eq!(state.spend_window, 200.0);
        assert_eq!(state.created_window, 3);
    }

    #[test]
    fn events_older_than_window_are_pruned() {
        let guardrails = Guardrails::default();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).single().expect("timestamp");
        guardrails.record_spend_at(120.0, start);
        guardrails.record_spend_at(40.0, start + Duration::hours(20));

        let state = guardrails.check_at(
            &GuardrailSnapshot::default(),
            &thresholds(150.0),
            start + Duration::hours(25),
        );

        assert_eq!(state.spend_window, 40.0);
        assert!(!state.frozen);
    }

    #[test]
    fn window_reaching_past_calendar_range_keeps_every_event() {
        let guardrails = Guardrails::new(GuardrailSettings {
            window: Duration::days(100_000_000),
            ..GuardrailSettings::default()
        });

        guardrails.record_spend(90.0);
        guardrails.record_conversion();
        let state = guardrails.check_budget_guardrails(&GuardrailSnapshot::default(), &thresholds(80.0));

        assert_eq!(state.spend_window, 90.0);
        assert_eq!(state.conversions_window, 1);
        assert!(!state.frozen);
    }

    #[test]
    fn invalid_spend_amounts_are_ignored() {
        let guardrails = Guardrails::default();
        guardrails.record_spend(-5.0);
        guardrails.record_spend(f64::NAN);
        guardrails.record_spend(0.0);

        assert!(!guardrails.dirty().is_set());
        assert_eq!(guardrails.export_document().spend.len(), 0);
    }

    #[test]
    fn manual_override_records_reason() {
        let guardrails = Guardrails::default();

        let frozen = guardrails.force_freeze(Some("campaign audit"));
        assert!(frozen.frozen);
        assert_eq!(frozen.reason.as_deref(), Some("campaign audit"));

        let active = guardrails.unfreeze(None);
        assert!(!active.frozen);
        assert_eq!(active.reason.as_deref(), Some("manual-unfreeze"));
    }

    #[test]
    fn export_keeps_newest_events_up_to_limit() {
        let guardrails =
            Guardrails::new(GuardrailSettings { event_log_limit: 3, ..GuardrailSettings::default() });
        let now = Utc::now();
        for minute in 0..5 {
            guardrails.record_spend_at(1.0 + minute as f64, now + Duration::minutes(minute));
        }

        let document = guardrails.export_document();
        let amounts: Vec<f64> = document.spend.iter().map(|event| event.amount).collect();
        assert_eq!(amounts, vec![3.0, 4.0, 5.0]);

        let restored = Guardrails::default();
        restored.import_document(document.clone());
        assert_eq!(restored.export_document().spend, document.spend);
    }
}
