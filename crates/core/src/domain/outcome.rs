use serde::{Deserialize, Serialize};

use crate::domain::campaign::CampaignId;

/// Delayed business outcome attributed to one or more selected arms.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Outcome {
    pub impression: bool,
    pub interaction: bool,
    /// An order was created but not yet paid.
    pub created: bool,
    pub conversion: bool,
    pub revenue: f64,
    pub cost: f64,
    /// Overrides the reward derived from the flags; `Some(0.0)` records a failure.
    pub reward: Option<f64>,
    pub campaign_id: Option<CampaignId>,
}

impl Outcome {
    pub fn conversion(revenue: f64) -> Self {
        Self { conversion: true, revenue, ..Self::default() }
    }

    pub fn created_order() -> Self {
        Self { created: true, ..Self::default() }
    }

    pub fn failure() -> Self {
        Self { reward: Some(0.0), ..Self::default() }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn for_campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    /// Reward to feed the bandit, if the outcome carries one.
    pub fn bandit_reward(&self, created_order_reward: f64) -> Option<f64> {
        if let Some(reward) = self.reward {
            return Some(reward);
        }
        if self.conversion {
            return Some(1.0);
        }
        if self.created {
            return Some(created_order_reward);
        }
        None
    }
}
