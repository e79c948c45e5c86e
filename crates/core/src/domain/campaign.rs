use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub total_spent: f64,
    pub total_leads: u64,
    #[serde(default)]
    pub total_revenue: f64,
    pub roas: f64,
    pub active: bool,
    pub budget: f64,
    pub last_updated: DateTime<Utc>,
}

impl Campaign {
    pub fn new(id: CampaignId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            total_spent: 0.0,
            total_leads: 0,
            total_revenue: 0.0,
            roas: 0.0,
            active: true,
            budget: 0.0,
            last_updated: Utc::now(),
        }
    }

    /// Folds one result batch into the cumulative counters.
    pub fn record_result(&mut self, cost: f64, conversions: u64, revenue: f64) {
        self.total_spent += non_negative(cost);
        self.total_leads += conversions;
        self.total_revenue += non_negative(revenue);
        self.refresh_roas();
        self.last_updated = Utc::now();
    }

    pub fn refresh_roas(&mut self) {
        self.roas =
            if self.total_spent > 0.0 { self.total_revenue / self.total_spent } else { 0.0 };
    }

    pub fn apply_patch(&mut self, patch: CampaignPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(total_spent) = patch.total_spent {
            self.total_spent = non_negative(total_spent);
        }
        if let Some(total_leads) = patch.total_leads {
            self.total_leads = total_leads;
        }
        match (patch.total_revenue, patch.roas) {
            (Some(revenue), _) => {
                self.total_revenue = non_negative(revenue);
                self.refresh_roas();
            }
            (None, Some(roas)) => {
                // Explicit ROAS without revenue: back-fill revenue so later
                // cumulative updates stay consistent with the seeded ratio.
                let roas = non_negative(roas);
                self.roas = roas;
                self.total_revenue = roas * self.total_spent;
            }
            (None, None) => {}
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        if let Some(budget) = patch.budget {
            self.budget = non_negative(budget);
        }
        self.last_updated = Utc::now();
    }
}

/// Partial campaign update; `None` keeps the stored value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub total_spent: Option<f64>,
    pub total_leads: Option<u64>,
    pub total_revenue: Option<f64>,
    pub roas: Option<f64>,
    pub active: Option<bool>,
    pub budget: Option<f64>,
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Campaign, CampaignId, CampaignPatch};

    #[test]
    fn roas_is_cumulative_revenue_over_spend() {
        let mut campaign = Campaign::new(CampaignId::new("cmp-1"), "Launch");
        campaign.record_result(100.0, 2, 300.0);
        campaign.record_result(100.0, 1, 100.0);

        assert_eq!(campaign.total_leads, 3);
        assert!((campaign.roas - 2.0).abs() < 1e-12);
    }

    #[test]
    fn roas_is_zero_without_spend() {
        let mut campaign = Campaign::new(CampaignId::new("cmp-2"), "Organic");
        campaign.record_result(0.0, 1, 50.0);
        assert_eq!(campaign.roas, 0.0);
    }

    #[test]
    fn seeded_roas_back_fills_revenue() {
        let mut campaign = Campaign::new(CampaignId::new("cmp-3"), "Retargeting");
        campaign.apply_patch(CampaignPatch {
            total_spent: Some(200.0),
            roas: Some(3.0),
            ..CampaignPatch::default()
        });

        assert!((campaign.total_revenue - 600.0).abs() < 1e-9);
        campaign.record_result(100.0, 0, 0.0);
        assert!((campaign.roas - 2.0).abs() < 1e-9);
    }
}
