//! Read-only reporting views over the arm catalog.

use serde::{Deserialize, Serialize};

use crate::domain::arm::{Arm, ArmCategory, ArmId};

pub const TOP_PERFORMER_LIMIT: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArmSummary {
    pub id: ArmId,
    pub category: ArmCategory,
    pub variant: String,
    pub expected_reward: f64,
    pub confidence: f64,
    pub plays: u64,
    pub revenue: f64,
}

impl From<&Arm> for ArmSummary {
    fn from(arm: &Arm) -> Self {
        Self {
            id: arm.id.clone(),
            category: arm.category,
            variant: arm.variant.clone(),
            expected_reward: arm.expected_reward,
            confidence: arm.confidence,
            plays: arm.total_plays,
            revenue: arm.revenue,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: ArmCategory,
    pub total_arms: usize,
    pub avg_reward: f64,
    pub total_plays: u64,
    pub total_revenue: f64,
    pub best_arm: Option<ArmSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BanditMetrics {
    pub total_arms: usize,
    pub total_plays: u64,
    pub avg_reward: f64,
    pub top_performers: Vec<ArmSummary>,
    pub by_category: Vec<CategorySummary>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityLevel {
    Low,
    Medium,
    High,
}

impl MaturityLevel {
    pub fn from_plays(total_plays: u64) -> Self {
        match total_plays {
            0..=100 => Self::Low,
            101..=1000 => Self::Medium,
            _ => Self::High,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningProgress {
    pub total_experiments: u64,
    pub maturity_level: MaturityLevel,
    /// `max(0, 1 - 10 * population variance of expected rewards)`.
    pub convergence_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BanditInsights {
    pub arms_count: usize,
    pub total_plays: u64,
    pub total_rewards: f64,
    pub overall_win_rate: f64,
    pub best_performing: Option<ArmSummary>,
    pub learning_progress: LearningProgress,
    pub recommendations: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignForecast {
    pub expected_roi: f64,
    pub confidence: f64,
    pub predicted_conversions: u64,
    pub risk_level: RiskLevel,
    pub based_on_arms: usize,
}

pub(crate) fn metrics(arms: &[Arm]) -> BanditMetrics {
    let total_plays = arms.iter().map(|arm| arm.total_plays).sum();
    let mut ranked: Vec<&Arm> = arms.iter().collect();
    ranked.sort_by(|a, b| b.expected_reward.total_cmp(&a.expected_reward));

    BanditMetrics {
        total_arms: arms.len(),
        total_plays,
        avg_reward: mean(arms.iter().map(|arm| arm.expected_reward)),
        top_performers: ranked
            .iter()
            .take(TOP_PERFORMER_LIMIT)
            .map(|arm| ArmSummary::from(*arm))
            .collect(),
        by_category: ArmCategory::ALL
            .iter()
            .map(|category| category_summary(*category, &ranked))
            .filter(|summary| summary.total_arms > 0)
            .collect(),
    }
}

fn category_summary(category: ArmCategory, ranked: &[&Arm]) -> CategorySummary {
    let members: Vec<&Arm> =
        ranked.iter().copied().filter(|arm| arm.category == category).collect();

    CategorySummary {
        category,
        total_arms: members.len(),
        avg_reward: mean(members.iter().map(|arm| arm.expected_reward)),
        total_plays: members.iter().map(|arm| arm.total_plays).sum(),
        total_revenue: members.iter().map(|arm| arm.revenue).sum(),
        best_arm: members.first().map(|arm| ArmSummary::from(*arm)),
    }
}

pub(crate) fn insights(arms: &[Arm]) -> BanditInsights {
    let total_plays: u64 = arms.iter().map(|arm| arm.total_plays).sum();
    let total_rewards: f64 = arms.iter().map(|arm| arm.total_rewards).sum();
    let best = best_arm(arms);

    let mut recommendations = Vec::new();
    if total_plays < 100 {
        recommendations.push("Collect more data by experimenting with different tactics".to_string());
    }
    if let Some(best) = best.filter(|arm| arm.expected_reward > 0.1) {
        recommendations.push(format!(
            "Focus on \"{}\" ({:.1}% expected conversion)",
            best.variant,
            best.expected_reward * 100.0
        ));
    }

    BanditInsights {
        arms_count: arms.len(),
        total_plays,
        total_rewards,
        overall_win_rate: if total_plays > 0 { total_rewards / total_plays as f64 } else { 0.0 },
        best_performing: best.map(ArmSummary::from),
        learning_progress: LearningProgress {
            total_experiments: total_plays,
            maturity_level: MaturityLevel::from_plays(total_plays),
            convergence_rate: convergence_rate(arms),
        },
        recommendations,
    }
}

/// Forecast from arms whose category matches `objective` or whose variant
/// mentions `audience`. Without any match a conservative baseline is returned.
pub(crate) fn forecast(arms: &[Arm], budget: f64, audience: &str, objective: &str) -> CampaignForecast {
    let budget = if budget.is_finite() { budget.max(0.0) } else { 0.0 };
    let objective = objective.trim().to_ascii_lowercase();
    let audience = audience.trim().to_ascii_lowercase();

    let relevant: Vec<&Arm> = arms
        .iter()
        .filter(|arm| {
            (!objective.is_empty() && arm.category.as_str().contains(&objective))
                || (!audience.is_empty() && arm.variant.to_ascii_lowercase().contains(&audience))
        })
        .collect();

    if relevant.is_empty() {
        return CampaignForecast {
            expected_roi: 1.2,
            confidence: 0.3,
            predicted_conversions: (budget * 0.02).round() as u64,
            risk_level: RiskLevel::Medium,
            based_on_arms: 0,
        };
    }

    let win_rate = mean(relevant.iter().map(|arm| arm.expected_reward));
    let risk_level = if win_rate > 0.1 {
        RiskLevel::Low
    } else if win_rate > 0.05 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };

    CampaignForecast {
        expected_roi: win_rate * (budget / 100.0),
        confidence: (relevant.len() as f64 * 0.1 + 0.3).min(0.9),
        predicted_conversions: (budget * win_rate).round() as u64,
        risk_level,
        based_on_arms: relevant.len(),
    }
}

fn best_arm(arms: &[Arm]) -> Option<&Arm> {
    arms.iter().max_by(|a, b| a.expected_reward.total_cmp(&b.expected_reward))
}

fn convergence_rate(arms: &[Arm]) -> f64 {
    if arms.len() < 2 {
        return 0.0;
    }
    let rates: Vec<f64> = arms.iter().map(|arm| arm.expected_reward).collect();
    let mean = mean(rates.iter().copied());
    let variance = rates.iter().map(|rate| (rate - mean).powi(2)).sum::<f64>() / rates.len() as f64;
    (1.0 - variance * 10.0).max(0.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
