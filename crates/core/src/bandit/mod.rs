//! Contextual Thompson Sampling over the tactic catalog.

pub mod catalog;
pub mod report;
pub mod weights;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::arm::{Arm, ArmCategory, ArmId};
use crate::domain::context::DecisionContext;
use crate::errors::DomainError;
use crate::persistence::DirtyFlag;
use crate::stats::sample_beta;
use crate::sync;

pub use report::{
    ArmSummary, BanditInsights, BanditMetrics, CampaignForecast, CategorySummary,
    LearningProgress, MaturityLevel, RiskLevel,
};
pub use weights::contextual_weight;

/// Default strength for [`BanditEngine::recalibrate_priors`].
pub const DEFAULT_RECALIBRATION_STRENGTH: f64 = 30.0;

/// Outcome of a single selection, with the numbers that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub arm: Arm,
    pub sample: f64,
    pub weight: f64,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecalibrationReport {
    pub arms: usize,
    pub base_strength: f64,
}

/// Read-only performance signal consumed by the budget allocator.
pub trait PerformanceSignal: Send + Sync {
    fn top_performers(&self, limit: usize) -> Vec<Arm>;
    /// Share of plays in `category` that produced a reward.
    fn category_conversion_rate(&self, category: ArmCategory) -> f64;
}

struct ArmSlot {
    category: ArmCategory,
    state: Mutex<Arm>,
}

/// Owns the arm catalog.
///
/// The map lock is only taken for writing when arms are added or the whole
/// catalog is replaced; per-arm updates lock the arm's own slot.
pub struct BanditEngine {
    arms: RwLock<BTreeMap<ArmId, ArmSlot>>,
    total_plays: AtomicU64,
    dirty: DirtyFlag,
}

impl Default for BanditEngine {
    fn default() -> Self {
        Self::with_default_catalog()
    }
}

impl BanditEngine {
    pub fn new(arms: Vec<Arm>) -> Self {
        let engine = Self {
            arms: RwLock::new(BTreeMap::new()),
            total_plays: AtomicU64::new(0),
            dirty: DirtyFlag::default(),
        };
        engine.replace_all(arms);
        engine.dirty.take();
        engine
    }

    pub fn with_default_catalog() -> Self {
        Self::new(catalog::default_arms())
    }

    pub fn select(
        &self,
        category: ArmCategory,
        context: &DecisionContext,
    ) -> Result<Selection, DomainError> {
        self.select_with_rng(category, context, &mut rand::thread_rng())
    }

    /// Accepts the textual category, including the `price` alias.
    pub fn select_by_name(
        &self,
        category: &str,
        context: &DecisionContext,
    ) -> Result<Selection, DomainError> {
        self.select(category.parse()?, context)
    }

    /// Samples every candidate under the read lock, then commits `last_used`
    /// on the winner only.
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        category: ArmCategory,
        context: &DecisionContext,
        rng: &mut R,
    ) -> Result<Selection, DomainError> {
        let arms = sync::read(&self.arms);
        let mut best: Option<(&ArmSlot, f64, f64, f64)> = None;

        for slot in arms.values().filter(|slot| slot.category == category) {
            let (sample, weight) = {
                let arm = sync::lock(&slot.state);
                (sample_beta(rng, arm.alpha, arm.beta), contextual_weight(&arm, context))
            };
            let score = weight * sample;
            if best.map_or(true, |(_, _, _, top)| score > top) {
                best = Some((slot, sample, weight, score));
            }
        }

        let Some((slot, sample, weight, score)) = best else {
            return Err(DomainError::UnknownCategory(category.to_string()));
        };

        let arm = {
            let mut arm = sync::lock(&slot.state);
            arm.last_used = Utc::now();
            arm.clone()
        };
        self.dirty.mark();

        debug!(
            event_name = "engine.bandit.arm_selected",
            arm_id = %arm.id,
            category = %category,
            sample,
            weight,
            "arm selected"
        );
        Ok(Selection { arm, sample, weight, score })
    }

    /// Applies a reward in `[0, 1]` and revenue to one arm.
    pub fn update(&self, arm_id: &ArmId, reward: f64, revenue: f64) -> Result<Arm, DomainError> {
        let arms = sync::read(&self.arms);
        let slot = arms.get(arm_id).ok_or_else(|| DomainError::UnknownArm(arm_id.to_string()))?;
        let plays = self.total_plays.fetch_add(1, Ordering::AcqRel) + 1;

        let updated = {
            let mut arm = sync::lock(&slot.state);
            arm.apply_reward(reward, revenue, plays);
            arm.clone()
        };
        self.dirty.mark();

        debug!(
            event_name = "engine.bandit.arm_updated",
            arm_id = %arm_id,
            reward,
            revenue,
            alpha = updated.alpha,
            beta = updated.beta,
            "arm posterior updated"
        );
        Ok(updated)
    }

    pub fn record_conversion(&self, arm_id: &ArmId, value: f64) -> Result<Arm, DomainError> {
        self.update(arm_id, 1.0, value)
    }

    /// Counts exposure without touching the posterior.
    pub fn record_exposure(
        &self,
        arm_id: &ArmId,
        impression: bool,
        interaction: bool,
    ) -> Result<(), DomainError> {
        self.with_arm(arm_id, |arm| {
            if impression {
                arm.impressions += 1;
            }
            if interaction {
                arm.interactions += 1;
            }
        })
    }

    pub fn reset_arm(&self, arm_id: &ArmId) -> Result<(), DomainError> {
        let mut removed_plays = 0;
        self.with_arm(arm_id, |arm| {
            removed_plays = arm.total_plays;
            arm.reset();
        })?;
        self.total_plays.fetch_sub(removed_plays.min(self.total_plays()), Ordering::AcqRel);
        info!(event_name = "engine.bandit.arm_reset", arm_id = %arm_id, "arm reset to uniform prior");
        Ok(())
    }

    /// Rebuilds every prior from the empirical success rate so long-lived
    /// arms keep adapting. Counters are preserved.
    pub fn recalibrate_priors(&self, base_strength: f64) -> RecalibrationReport {
        let base_strength = if base_strength.is_finite() && base_strength > 0.0 {
            base_strength
        } else {
            DEFAULT_RECALIBRATION_STRENGTH
        };
        let arms = sync::read(&self.arms);

        for slot in arms.values() {
            let mut arm = sync::lock(&slot.state);
            let empirical = arm.empirical_rate().clamp(0.0, 1.0);
            arm.alpha = 1.0 + (empirical * base_strength).round().max(0.0);
            arm.beta = 1.0 + ((1.0 - empirical) * base_strength).round().max(0.0);
            arm.refresh_posterior();
        }
        self.dirty.mark();

        info!(
            event_name = "engine.bandit.priors_recalibrated",
            arms = arms.len(),
            base_strength,
            "priors recalibrated"
        );
        RecalibrationReport { arms: arms.len(), base_strength }
    }

    /// Adds an arm referenced for the first time. Returns `false` when the id
    /// already exists; the existing arm is left untouched.
    pub fn register_arm(&self, arm: Arm) -> bool {
        let mut arms = sync::write(&self.arms);
        if arms.contains_key(&arm.id) {
            return false;
        }
        self.total_plays.fetch_add(arm.total_plays, Ordering::AcqRel);
        arms.insert(arm.id.clone(), ArmSlot { category: arm.category, state: Mutex::new(arm) });
        self.dirty.mark();
        true
    }

    pub fn arm(&self, arm_id: &ArmId) -> Option<Arm> {
        sync::read(&self.arms).get(arm_id).map(|slot| sync::lock(&slot.state).clone())
    }

    /// Consistent copy of the catalog, ordered by id.
    pub fn export_arms(&self) -> Vec<Arm> {
        sync::read(&self.arms).values().map(|slot| sync::lock(&slot.state).clone()).collect()
    }

    /// Restores persisted arms over the current catalog. Catalog arms missing
    /// from the snapshot keep their defaults.
    pub fn import_arms(&self, arms: Vec<Arm>) -> usize {
        let mut current = sync::write(&self.arms);
        let count = arms.len();
        for arm in arms {
            current.insert(arm.id.clone(), ArmSlot { category: arm.category, state: Mutex::new(arm) });
        }
        let plays = current.values().map(|slot| sync::lock(&slot.state).total_plays).sum();
        self.total_plays.store(plays, Ordering::Release);
        count
    }

    pub fn arm_count(&self) -> usize {
        sync::read(&self.arms).len()
    }

    pub fn total_plays(&self) -> u64 {
        self.total_plays.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> BanditMetrics {
        report::metrics(&self.export_arms())
    }

    pub fn insights(&self) -> BanditInsights {
        report::insights(&self.export_arms())
    }

    pub fn predict_campaign_performance(
        &self,
        budget: f64,
        audience: &str,
        objective: &str,
    ) -> CampaignForecast {
        report::forecast(&self.export_arms(), budget, audience, objective)
    }

    pub fn dirty(&self) -> &DirtyFlag {
        &self.dirty
    }

    fn replace_all(&self, arms: Vec<Arm>) {
        let mut map = BTreeMap::new();
        let mut plays = 0;
        for arm in arms {
            plays += arm.total_plays;
            map.insert(arm.id.clone(), ArmSlot { category: arm.category, state: Mutex::new(arm) });
        }
        *sync::write(&self.arms) = map;
        self.total_plays.store(plays, Ordering::Release);
        self.dirty.mark();
    }

    fn with_arm(&self, arm_id: &ArmId, apply: impl FnOnce(&mut Arm)) -> Result<(), DomainError> {
        let arms = sync::read(&self.arms);
        let slot = arms.get(arm_id).ok_or_else(|| DomainError::UnknownArm(arm_id.to_string()))?;
        apply(&mut sync::lock(&slot.state));
        self.dirty.mark();
        Ok(())
    }
}

impl PerformanceSignal for BanditEngine {
    fn top_performers(&self, limit: usize) -> Vec<Arm> {
        let mut arms = self.export_arms();
        arms.sort_by(|a, b| b.expected_reward.total_cmp(&a.expected_reward));
        arms.truncate(limit);
        arms
    }

    fn category_conversion_rate(&self, category: ArmCategory) -> f64 {
        let (plays, rewards) = self
            .export_arms()
            .iter()
            .filter(|arm| arm.category == category)
            .fold((0u64, 0.0), |(plays, rewards), arm| {
                (plays + arm.total_plays, rewards + arm.total_rewards)
            });
        if plays == 0 {
            0.0
        } else {
            rewards / plays as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{BanditEngine, PerformanceSignal};
    use crate::domain::arm::{Arm, ArmCategory, ArmId, TacticPayload};
    use crate::domain::context::{ConversationStage, DecisionContext};
    use crate::errors::DomainError;

    fn script_arm(id: &str, alpha: f64, beta: f64) -> Arm {
        Arm::new(id, id, TacticPayload::Script { name: id.to_string() }, alpha, beta)
    }

    #[test]
    fn select_returns_requested_category_only() {
        let engine = BanditEngine::with_default_catalog();
        let mut rng = StdRng::seed_from_u64(7);
        let context = DecisionContext::default();

        for category in ArmCategory::ALL {
            for _ in 0..50 {
                let selection =
                    engine.select_with_rng(category, &context, &mut rng).expect("selection");
                assert_eq!(selection.arm.category, category);
            }
        }
    }

    #[test]
    fn price_alias_resolves_to_pricing() {
        let engine = BanditEngine::with_default_catalog();
        let selection =
            engine.select_by_name("price", &DecisionContext::default()).expect("selection");
        assert_eq!(selection.arm.category, ArmCategory::Pricing);
    }

    #[test]
    fn empty_category_fails_with_unknown_category() {
        let engine = BanditEngine::new(vec![script_arm("script_only", 1.0, 1.0)]);
        let error = engine
            .select(ArmCategory::Media, &DecisionContext::default())
            .expect_err("no media arms");
        assert_eq!(error, DomainError::UnknownCategory("media".to_string()));
    }

    #[test]
    fn update_increments_plays_and_never_decreases_parameters() {
        let engine = BanditEngine::new(vec![script_arm("a", 2.0, 2.0)]);
        let id = ArmId::new("a");
        let mut previous = engine.arm(&id).expect("arm");

        for (step, reward) in [1.0, 0.0, 0.3, 0.0, 0.7].into_iter().enumerate() {
            let updated = engine.update(&id, reward, 5.0).expect("update");
            assert_eq!(updated.total_plays, step as u64 + 1);
            assert!(updated.alpha >= previous.alpha);
            assert!(updated.beta >= previous.beta);
            previous = updated;
        }
        assert_eq!(engine.total_plays(), 5);
    }

    #[test]
    fn unknown_arm_update_does_not_count_a_play() {
        let engine = BanditEngine::new(vec![script_arm("a", 1.0, 1.0)]);
        assert!(engine.update(&ArmId::new("missing"), 1.0, 0.0).is_err());
        assert_eq!(engine.total_plays(), 0);
    }

    #[test]
    fn recalibration_rebuilds_priors_from_empirical_rate() {
        let engine = BanditEngine::new(vec![script_arm("a", 5.0, 1.0)]);
        let id = ArmId::new("a");
        for reward in [1.0, 1.0, 1.0, 0.0] {
            engine.update(&id, reward, 0.0).expect("update");
        }

        let report = engine.recalibrate_priors(20.0);
        let arm = engine.arm(&id).expect("arm");

        assert_eq!(report.arms, 1);
        assert_eq!(arm.alpha, 16.0);
        assert_eq!(arm.beta, 6.0);
        assert_eq!(arm.total_plays, 4);
    }

    #[test]
    fn reset_zeroes_counters_and_global_plays() {
        let engine = BanditEngine::new(vec![script_arm("a", 3.0, 1.0), script_arm("b", 1.0, 1.0)]);
        engine.update(&ArmId::new("a"), 1.0, 10.0).expect("update a");
        engine.update(&ArmId::new("b"), 1.0, 10.0).expect("update b");

        engine.reset_arm(&ArmId::new("a")).expect("reset");

        let arm = engine.arm(&ArmId::new("a")).expect("arm");
        assert_eq!((arm.alpha, arm.beta, arm.total_plays), (1.0, 1.0, 0));
        assert_eq!(engine.total_plays(), 1);
    }

    #[test]
    fn closing_stage_tilts_selection_towards_weighted_arms() {
        let engine = BanditEngine::with_default_catalog();
        let mut rng = StdRng::seed_from_u64(11);
        let context = DecisionContext {
            conversation_stage: ConversationStage::Closing,
            ..DecisionContext::default()
        };
        let selection =
            engine.select_with_rng(ArmCategory::Closing, &context, &mut rng).expect("selection");

        assert!((selection.weight - 1.4).abs() < 1e-12);
        assert!((selection.score - selection.weight * selection.sample).abs() < 1e-12);
    }

    #[test]
    fn export_import_preserves_learned_state() {
        let source = BanditEngine::with_default_catalog();
        let id = ArmId::new("price_2un_169");
        source.update(&id, 1.0, 169.9).expect("update");

        let target = BanditEngine::with_default_catalog();
        target.import_arms(source.export_arms());

        assert_eq!(target.arm(&id), source.arm(&id));
        assert_eq!(target.total_plays(), 1);
    }

    #[test]
    fn register_arm_adds_unknown_ids_once() {
        let engine = BanditEngine::new(Vec::new());
        assert!(engine.register_arm(script_arm("fresh", 1.0, 1.0)));
        assert!(!engine.register_arm(script_arm("fresh", 9.0, 1.0)));
        assert_eq!(engine.arm(&ArmId::new("fresh")).expect("arm").alpha, 1.0);
    }

    #[test]
    fn category_conversion_rate_uses_rewards_per_play() {
        let engine = BanditEngine::new(vec![
            script_arm("a", 1.0, 1.0),
            Arm::new(
                "p",
                "p",
                TacticPayload::Pricing { units: 1, price: 10.0, discounted: false },
                1.0,
                1.0,
            ),
        ]);
        for reward in [1.0, 1.0, 0.0] {
            engine.update(&ArmId::new("p"), reward, 10.0).expect("update");
        }

        let rate = engine.category_conversion_rate(ArmCategory::Pricing);
        assert!((rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(engine.category_conversion_rate(ArmCategory::Script), 0.0);
        assert_eq!(engine.top_performers(1)[0].id, ArmId::new("p"));
    }
}
