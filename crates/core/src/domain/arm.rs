use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::stats::{beta_mean, beta_variance};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArmId(pub String);

impl ArmId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmCategory {
    #[serde(alias = "price")]
    Pricing,
    Approach,
    Timing,
    Media,
    Closing,
    Script,
}

impl ArmCategory {
    pub const ALL: [ArmCategory; 6] = [
        ArmCategory::Pricing,
        ArmCategory::Approach,
        ArmCategory::Timing,
        ArmCategory::Media,
        ArmCategory::Closing,
        ArmCategory::Script,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pricing => "pricing",
            Self::Approach => "approach",
            Self::Timing => "timing",
            Self::Media => "media",
            Self::Closing => "closing",
            Self::Script => "script",
        }
    }
}

impl fmt::Display for ArmCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArmCategory {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pricing" | "price" => Ok(Self::Pricing),
            "approach" => Ok(Self::Approach),
            "timing" => Ok(Self::Timing),
            "media" => Ok(Self::Media),
            "closing" => Ok(Self::Closing),
            "script" => Ok(Self::Script),
            other => Err(DomainError::UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproachTechnique {
    Consultative,
    Urgency,
    Benefits,
    SocialProof,
    Scarcity,
    Authority,
    Reciprocity,
    Commitment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    DemoVideo,
    ProductImage,
    AnimatedGif,
    Carousel,
    Infographic,
    TestimonialVideo,
    Audio,
    Document,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingLever {
    Discount,
    Guarantee,
    FreeShipping,
    Bonus,
    Deadline,
    Installments,
    TrialPeriod,
    Upgrade,
}

/// Tactic parameters handed to the collaborator that executes the arm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TacticPayload {
    Pricing { units: u32, price: f64, discounted: bool },
    Approach { technique: ApproachTechnique },
    Timing { delay_minutes: u32 },
    Media { format: MediaFormat },
    Closing { lever: ClosingLever },
    Script { name: String },
}

impl TacticPayload {
    pub fn category(&self) -> ArmCategory {
        match self {
            Self::Pricing { .. } => ArmCategory::Pricing,
            Self::Approach { .. } => ArmCategory::Approach,
            Self::Timing { .. } => ArmCategory::Timing,
            Self::Media { .. } => ArmCategory::Media,
            Self::Closing { .. } => ArmCategory::Closing,
            Self::Script { .. } => ArmCategory::Script,
        }
    }

    pub fn is_discount(&self) -> bool {
        matches!(
            self,
            Self::Pricing { discounted: true, .. } | Self::Closing { lever: ClosingLever::Discount }
        )
    }

    pub fn technique(&self) -> Option<ApproachTechnique> {
        match self {
            Self::Approach { technique } => Some(*technique),
            _ => None,
        }
    }
}

/// A Bayesian arm: Beta(alpha, beta) posterior over the tactic's success rate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub id: ArmId,
    pub category: ArmCategory,
    pub variant: String,
    pub payload: TacticPayload,
    pub alpha: f64,
    pub beta: f64,
    pub total_plays: u64,
    pub total_rewards: f64,
    pub revenue: f64,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub interactions: u64,
    pub last_used: DateTime<Utc>,
    pub expected_reward: f64,
    pub confidence: f64,
    /// Infinite until the arm has been played; persisted as `null` in that case.
    #[serde(with = "unbounded_score")]
    pub ucb_score: f64,
}

impl Arm {
    pub fn new(
        id: impl Into<String>,
        variant: impl Into<String>,
        payload: TacticPayload,
        alpha: f64,
        beta: f64,
    ) -> Self {
        let mut arm = Self {
            id: ArmId::new(id),
            category: payload.category(),
            variant: variant.into(),
            payload,
            alpha: sanitize_prior(alpha),
            beta: sanitize_prior(beta),
            total_plays: 0,
            total_rewards: 0.0,
            revenue: 0.0,
            impressions: 0,
            interactions: 0,
            last_used: Utc::now(),
            expected_reward: 0.5,
            confidence: 0.0,
            ucb_score: f64::INFINITY,
        };
        arm.refresh_posterior();
        arm
    }

    /// Conjugate update. `reward` is clamped to `[0, 1]`; a zero reward counts
    /// as one failure.
    pub fn apply_reward(&mut self, reward: f64, revenue: f64, plays_across_arms: u64) {
        let reward = if reward.is_finite() { reward.clamp(0.0, 1.0) } else { 0.0 };
        let revenue = if revenue.is_finite() { revenue.max(0.0) } else { 0.0 };

        self.total_plays += 1;
        self.total_rewards += reward;
        self.revenue += revenue;

        if reward > 0.0 {
            self.alpha += reward;
        } else {
            self.beta += 1.0;
        }

        self.refresh_posterior();
        self.ucb_score = ucb_score(self.expected_reward, self.total_plays, plays_across_arms);
    }

    pub fn reset(&mut self) {
        self.alpha = 1.0;
        self.beta = 1.0;
        self.total_plays = 0;
        self.total_rewards = 0.0;
        self.revenue = 0.0;
        self.impressions = 0;
        self.interactions = 0;
        self.expected_reward = 0.5;
        self.confidence = 0.0;
        self.ucb_score = f64::INFINITY;
    }

    /// Empirical success rate; zero plays count as one to avoid division by zero.
    pub fn empirical_rate(&self) -> f64 {
        self.total_rewards / self.total_plays.max(1) as f64
    }

    pub fn refresh_posterior(&mut self) {
        self.expected_reward = beta_mean(self.alpha, self.beta);
        self.confidence = 1.0 - beta_variance(self.alpha, self.beta).sqrt();
    }
}

pub fn ucb_score(expected_reward: f64, arm_plays: u64, plays_across_arms: u64) -> f64 {
    if arm_plays == 0 {
        return f64::INFINITY;
    }
    let total = plays_across_arms.max(arm_plays) as f64;
    expected_reward + (2.0 * total.ln() / arm_plays as f64).sqrt()
}

fn sanitize_prior(value: f64) -> f64 {
    if value.is_finite() {
        value.max(1.0)
    } else {
        1.0
    }
}

mod unbounded_score {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
