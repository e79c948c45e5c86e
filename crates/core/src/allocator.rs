//! Budget reallocation across campaigns.
//!
//! Scores come from campaign ROAS, optionally boosted by the bandit's
//! performance signal, and are normalized into shares of the current total
//! budget so every run conserves the total.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bandit::PerformanceSignal;
use crate::domain::allocation::{
    AllocationDecision, AllocationLine, AllocationPlan, AllocationStrategy, DecisionId,
};
use crate::domain::arm::ArmCategory;
use crate::domain::campaign::{Campaign, CampaignId, CampaignPatch};
use crate::errors::{ApplicationError, DomainError};
use crate::guardrails::Guardrails;
use crate::persistence::DirtyFlag;
use crate::sync;

pub const SCORE_FLOOR: f64 = 0.0001;
pub const COLD_START_DAMPENING: f64 = 0.8;
pub const PROFITABLE_PRICING_BOOST: f64 = 1.10;
pub const HOT_CONVERSION_BOOST: f64 = 1.05;
pub const HOT_CONVERSION_RATE: f64 = 0.05;
pub const DEFAULT_HISTORY_LIMIT: usize = 500;
/// Plans discarded because budgets moved underneath them before giving up.
pub const MAX_PLAN_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorSettings {
    pub approvals_enabled: bool,
    pub history_limit: usize,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self { approvals_enabled: false, history_limit: DEFAULT_HISTORY_LIMIT }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocatorMetrics {
    pub total_campaigns: usize,
    pub active_campaigns: usize,
    pub total_budget: f64,
    pub total_spent: f64,
    /// Mean ROAS of active campaigns, rounded to three decimals.
    pub overall_roas: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocatorHealth {
    pub overall: f64,
    pub active_campaigns: usize,
}

pub struct BudgetAllocator {
    campaigns: RwLock<BTreeMap<CampaignId, Mutex<Campaign>>>,
    decisions: Mutex<VecDeque<AllocationDecision>>,
    approvals_enabled: AtomicBool,
    history_limit: usize,
    run_lock: Mutex<()>,
    signal: Option<Arc<dyn PerformanceSignal>>,
    guardrails: Option<Arc<Guardrails>>,
    campaigns_dirty: DirtyFlag,
    decisions_dirty: DirtyFlag,
}

impl Default for BudgetAllocator {
    fn default() -> Self {
        Self::new(AllocatorSettings::default())
    }
}

impl BudgetAllocator {
    pub fn new(settings: AllocatorSettings) -> Self {
        Self {
            campaigns: RwLock::new(BTreeMap::new()),
            decisions: Mutex::new(VecDeque::new()),
            approvals_enabled: AtomicBool::new(settings.approvals_enabled),
            history_limit: settings.history_limit.max(1),
            run_lock: Mutex::new(()),
            signal: None,
            guardrails: None,
            campaigns_dirty: DirtyFlag::default(),
            decisions_dirty: DirtyFlag::default(),
        }
    }

    pub fn with_signal(mut self, signal: Arc<dyn PerformanceSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Allocation is refused while these guardrails are frozen.
    pub fn with_guardrails(mut self, guardrails: Arc<Guardrails>) -> Self {
        self.guardrails = Some(guardrails);
        self
    }

    pub fn set_approvals_mode(&self, enabled: bool) {
        self.approvals_enabled.store(enabled, Ordering::Release);
        info!(event_name = "engine.allocator.approvals_mode", enabled, "approval mode changed");
    }

    pub fn approvals_enabled(&self) -> bool {
        self.approvals_enabled.load(Ordering::Acquire)
    }

    /// Creates the campaign when unseen; otherwise only the fields present in
    /// `patch` change.
    pub fn add_or_update_campaign(&self, id: CampaignId, patch: CampaignPatch) -> Campaign {
        let updated = self.upsert(&id, |campaign| campaign.apply_patch(patch));
        info!(event_name = "engine.allocator.campaign_upserted", campaign_id = %id, "campaign upserted");
        updated
    }

    pub fn update_campaign(
        &self,
        id: &CampaignId,
        patch: CampaignPatch,
    ) -> Result<Campaign, DomainError> {
        self.with_campaign(id, |campaign| campaign.apply_patch(patch))
    }

    pub fn record_result(
        &self,
        id: &CampaignId,
        cost: f64,
        conversions: u64,
        revenue: f64,
    ) -> Campaign {
        self.upsert(id, |campaign| campaign.record_result(cost, conversions, revenue))
    }

    pub fn record_realtime_spend(&self, id: &CampaignId, amount: f64) -> Result<Campaign, DomainError> {
        self.with_campaign(id, |campaign| campaign.record_result(amount, 0, 0.0))
    }

    pub fn campaign(&self, id: &CampaignId) -> Option<Campaign> {
        sync::read(&self.campaigns).get(id).map(|slot| sync::lock(slot).clone())
    }

    pub fn campaigns(&self) -> Vec<Campaign> {
        sync::read(&self.campaigns).values().map(|slot| sync::lock(slot).clone()).collect()
    }

    pub fn preview(&self, strategy: AllocationStrategy) -> Result<AllocationPlan, DomainError> {
        self.preview_with_rng(strategy, &mut rand::thread_rng())
    }

    /// Same computation as [`Self::allocate`] without touching any state.
    pub fn preview_with_rng<R: Rng + ?Sized>(
        &self,
        strategy: AllocationStrategy,
        rng: &mut R,
    ) -> Result<AllocationPlan, DomainError> {
        let active: Vec<Campaign> = self.campaigns().into_iter().filter(|c| c.active).collect();
        self.plan(&active, strategy, rng, "preview")
    }

    pub fn allocate(
        &self,
        strategy: AllocationStrategy,
    ) -> Result<AllocationDecision, ApplicationError> {
        self.allocate_with_rng(strategy, &mut rand::thread_rng())
    }

    /// Computes and applies new budgets, then records the decision. New
    /// budgets apply immediately; approval only marks the decision for audit.
    pub fn allocate_with_rng<R: Rng + ?Sized>(
        &self,
        strategy: AllocationStrategy,
        rng: &mut R,
    ) -> Result<AllocationDecision, ApplicationError> {
        let _run = sync::lock(&self.run_lock);

        if let Some(guardrails) = &self.guardrails {
            let state = guardrails.state();
            if state.frozen {
                let reason = state.reason.unwrap_or_else(|| "guardrails frozen".to_string());
                warn!(
                    event_name = "engine.allocator.refused_frozen",
                    strategy = %strategy,
                    reason = %reason,
                    "allocation refused while guardrails are frozen"
                );
                return Err(ApplicationError::Frozen { reason });
            }
        }

        let mut attempts = 0;
        let plan = loop {
            attempts += 1;
            let active: Vec<Campaign> =
                self.campaigns().into_iter().filter(|c| c.active).collect();
            let plan = self.plan(&active, strategy, rng, "rebalanced")?;
            if self.apply_plan(&plan) {
                break plan;
            }
            warn!(
                event_name = "engine.allocator.replanned",
                strategy = %strategy,
                attempt = attempts,
                "campaign budgets changed while planning"
            );
            if attempts >= MAX_PLAN_ATTEMPTS {
                return Err(DomainError::InvariantViolation(format!(
                    "campaign budgets changed during each of {attempts} allocation attempts"
                ))
                .into());
            }
        };
        self.campaigns_dirty.mark();

        let decision = AllocationDecision {
            id: DecisionId(Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
            plan,
            pending_approval: self.approvals_enabled(),
            approved: false,
            verified: false,
        };

        {
            let mut decisions = sync::lock(&self.decisions);
            decisions.push_front(decision.clone());
            decisions.truncate(self.history_limit);
        }
        self.decisions_dirty.mark();

        info!(
            event_name = "engine.allocator.allocated",
            decision_id = %decision.id,
            strategy = %strategy,
            campaigns = decision.plan.allocations.len(),
            expected_total_roi = decision.plan.expected_total_roi,
            pending_approval = decision.pending_approval,
            "budget reallocated"
        );
        Ok(decision)
    }

    pub fn approve(&self, id: &DecisionId) -> Result<AllocationDecision, DomainError> {
        let approved = self.with_decision(id, |decision| decision.approved = true)?;
        info!(event_name = "engine.allocator.approved", decision_id = %id, "allocation approved");
        Ok(approved)
    }

    pub fn verify(&self, id: &DecisionId) -> Result<AllocationDecision, DomainError> {
        self.with_decision(id, |decision| decision.verified = true)
    }

    /// Marks the newest `limit` decisions verified, returning how many were
    /// touched.
    pub fn bulk_reverify(&self, limit: usize) -> usize {
        let mut decisions = sync::lock(&self.decisions);
        let count = decisions.len().min(limit);
        for decision in decisions.iter_mut().take(limit) {
            decision.verified = true;
        }
        self.decisions_dirty.mark();
        count
    }

    /// Newest first.
    pub fn decision_history(&self, limit: usize) -> Vec<AllocationDecision> {
        sync::lock(&self.decisions).iter().take(limit).cloned().collect()
    }

    pub fn list_pending(&self) -> Vec<AllocationDecision> {
        sync::lock(&self.decisions)
            .iter()
            .filter(|decision| decision.awaiting_approval())
            .cloned()
            .collect()
    }

    pub fn metrics(&self) -> AllocatorMetrics {
        let campaigns = self.campaigns();
        let active: Vec<&Campaign> = campaigns.iter().filter(|c| c.active).collect();
        let overall_roas = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|c| c.roas).sum::<f64>() / active.len() as f64
        };

        AllocatorMetrics {
            total_campaigns: campaigns.len(),
            active_campaigns: active.len(),
            total_budget: active.iter().map(|c| c.budget).sum(),
            total_spent: active.iter().map(|c| c.total_spent).sum(),
            overall_roas: (overall_roas * 1000.0).round() / 1000.0,
        }
    }

    pub fn health(&self) -> AllocatorHealth {
        let metrics = self.metrics();
        let bonus = if metrics.active_campaigns > 0 { 50.0 } else { 0.0 };
        AllocatorHealth {
            overall: metrics.overall_roas * 50.0 + bonus,
            active_campaigns: metrics.active_campaigns,
        }
    }

    pub fn export_campaigns(&self) -> Vec<Campaign> {
        self.campaigns()
    }

    pub fn import_campaigns(&self, campaigns: Vec<Campaign>) {
        let mut map = sync::write(&self.campaigns);
        for campaign in campaigns {
            map.insert(campaign.id.clone(), Mutex::new(campaign));
        }
    }

    pub fn export_decisions(&self) -> Vec<AllocationDecision> {
        sync::lock(&self.decisions).iter().cloned().collect()
    }

    pub fn import_decisions(&self, decisions: Vec<AllocationDecision>) {
        let mut current = sync::lock(&self.decisions);
        *current = decisions.into_iter().take(self.history_limit).collect();
    }

    pub fn campaigns_dirty(&self) -> &DirtyFlag {
        &self.campaigns_dirty
    }

    pub fn decisions_dirty(&self) -> &DirtyFlag {
        &self.decisions_dirty
    }

    /// Current boost inputs from the performance signal, neutral without one.
    pub fn signal_boost(&self) -> SignalBoost {
        self.signal.as_deref().map(SignalBoost::read).unwrap_or_default()
    }

    /// Floored, strategy-adjusted score for one campaign.
    pub fn score_campaign<R: Rng + ?Sized>(
        campaign: &Campaign,
        strategy: AllocationStrategy,
        boost: &SignalBoost,
        rng: &mut R,
    ) -> f64 {
        let roas = if campaign.roas.is_finite() { campaign.roas.max(0.0) } else { 0.0 };
        let mut score = if campaign.total_leads > 0 { roas } else { roas * COLD_START_DAMPENING };

        score *= boost.factor(roas);

        score *= match strategy {
            AllocationStrategy::Balanced => 1.0,
            AllocationStrategy::Growth => 1.0 + rng.gen_range(0.0..0.2),
            AllocationStrategy::Defensive => 0.9 + if roas > 1.0 { 0.2 } else { 0.0 },
        };

        score.max(SCORE_FLOOR)
    }

    fn plan<R: Rng + ?Sized>(
        &self,
        active: &[Campaign],
        strategy: AllocationStrategy,
        rng: &mut R,
        label: &str,
    ) -> Result<AllocationPlan, DomainError> {
        if active.is_empty() {
            return Err(DomainError::NoActiveCampaigns);
        }

        let boost = self.signal_boost();
        let scores: Vec<f64> = active
            .iter()
            .map(|campaign| Self::score_campaign(campaign, strategy, &boost, rng))
            .collect();
        let score_sum: f64 = scores.iter().sum();
        let total: f64 = active.iter().map(|campaign| campaign.budget).sum();

        let mut allocations = Vec::with_capacity(active.len());
        let mut expected_total_roi = 0.0;
        let mut max_share: f64 = 0.0;

        for (campaign, score) in active.iter().zip(&scores) {
            let share = score / score_sum;
            let to = total * share;
            let from = campaign.budget;
            expected_total_roi += campaign.roas * to;
            max_share = max_share.max(share);

            allocations.push(AllocationLine {
                campaign_id: campaign.id.clone(),
                from,
                to,
                delta: to - from,
                rationale: format!("{label}: score_share={share:.3}"),
            });
        }

        Ok(AllocationPlan {
            strategy,
            allocations,
            expected_total_roi,
            diversification_score: 1.0 - max_share,
        })
    }

    /// Writes the planned budgets only if every planned campaign is still
    /// active at the budget it was planned from. The map write guard keeps
    /// patches out between the check and the write.
    fn apply_plan(&self, plan: &AllocationPlan) -> bool {
        let campaigns = sync::write(&self.campaigns);
        let unchanged = plan.allocations.iter().all(|line| {
            campaigns.get(&line.campaign_id).is_some_and(|slot| {
                let campaign = sync::lock(slot);
                campaign.active && campaign.budget.total_cmp(&line.from).is_eq()
            })
        });
        if !unchanged {
            return false;
        }

        let now = Utc::now();
        for line in &plan.allocations {
            if let Some(slot) = campaigns.get(&line.campaign_id) {
                let mut campaign = sync::lock(slot);
                campaign.budget = line.to;
                campaign.last_updated = now;
            }
        }
        true
    }

    fn upsert(&self, id: &CampaignId, apply: impl FnOnce(&mut Campaign)) -> Campaign {
        {
            let campaigns = sync::read(&self.campaigns);
            if let Some(slot) = campaigns.get(id) {
                let mut campaign = sync::lock(slot);
                apply(&mut campaign);
                self.campaigns_dirty.mark();
                return campaign.clone();
            }
        }

        let mut campaigns = sync::write(&self.campaigns);
        let slot = campaigns
            .entry(id.clone())
            .or_insert_with(|| Mutex::new(Campaign::new(id.clone(), id.0.clone())));
        let mut campaign = sync::lock(slot);
        apply(&mut campaign);
        self.campaigns_dirty.mark();
        campaign.clone()
    }

    fn with_campaign(
        &self,
        id: &CampaignId,
        apply: impl FnOnce(&mut Campaign),
    ) -> Result<Campaign, DomainError> {
        let campaigns = sync::read(&self.campaigns);
        let slot = campaigns
            .get(id)
            .ok_or_else(|| DomainError::InvariantViolation(format!("unknown campaign `{id}`")))?;
        let mut campaign = sync::lock(slot);
        apply(&mut campaign);
        self.campaigns_dirty.mark();
        Ok(campaign.clone())
    }

    fn with_decision(
        &self,
        id: &DecisionId,
        apply: impl FnOnce(&mut AllocationDecision),
    ) -> Result<AllocationDecision, DomainError> {
        let mut decisions = sync::lock(&self.decisions);
        let decision = decisions
            .iter_mut()
            .find(|decision| &decision.id == id)
            .ok_or_else(|| DomainError::UnknownDecision(id.to_string()))?;
        apply(decision);
        self.decisions_dirty.mark();
        Ok(decision.clone())
    }
}

/// Cross-component boost: profitable campaigns gain when a played, earning
/// pricing arm is among the top performers, and everyone gains a little when
/// pricing is converting well.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalBoost {
    pub profitable_pricing: bool,
    pub hot_pricing: bool,
}

impl SignalBoost {
    pub fn read(signal: &dyn PerformanceSignal) -> Self {
        let profitable_pricing = signal.top_performers(5).iter().any(|arm| {
            arm.category == ArmCategory::Pricing && arm.total_plays > 0 && arm.revenue > 0.0
        });
        let hot_pricing =
            signal.category_conversion_rate(ArmCategory::Pricing) > HOT_CONVERSION_RATE;
        Self { profitable_pricing, hot_pricing }
    }

    pub fn factor(&self, roas: f64) -> f64 {
        let mut factor = 1.0;
        if self.profitable_pricing && roas > 1.0 {
            factor *= PROFITABLE_PRICING_BOOST;
        }
        if self.hot_pricing {
            factor *= HOT_CONVERSION_BOOST;
        }
        factor
    }
}
