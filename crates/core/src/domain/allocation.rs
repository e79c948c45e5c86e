use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::campaign::CampaignId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub String);

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    #[default]
    Balanced,
    Growth,
    Defensive,
}

impl AllocationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Growth => "growth",
            Self::Defensive => "defensive",
        }
    }
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationStrategy {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "growth" => Ok(Self::Growth),
            "defensive" => Ok(Self::Defensive),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported allocation strategy `{other}` (expected balanced|growth|defensive)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub campaign_id: CampaignId,
    pub from: f64,
    pub to: f64,
    pub delta: f64,
    pub rationale: String,
}

/// Budget plan produced by scoring; shared by previews and committed decisions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub strategy: AllocationStrategy,
    pub allocations: Vec<AllocationLine>,
    pub expected_total_roi: f64,
    pub diversification_score: f64,
}

impl AllocationPlan {
    pub fn total_from(&self) -> f64 {
        self.allocations.iter().map(|line| line.from).sum()
    }

    pub fn total_to(&self) -> f64 {
        self.allocations.iter().map(|line| line.to).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub id: DecisionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub plan: AllocationPlan,
    pub pending_approval: bool,
    pub approved: bool,
    pub verified: bool,
}

impl AllocationDecision {
    pub fn awaiting_approval(&self) -> bool {
        self.pending_approval && !self.approved
    }
}
