//! Contextual weight rules.
//!
//! Each rule multiplies the weight when it matches. The product is clamped so
//! context can nudge, but never override, what the posterior has learned.

use crate::domain::arm::{ApproachTechnique, Arm, ArmCategory};
use crate::domain::context::{ConversationStage, CustomerProfile, DecisionContext, TimeOfDay};

pub const MIN_WEIGHT: f64 = 0.5;
pub const MAX_WEIGHT: f64 = 2.0;

/// Message count above which long conversations favour a discount to close.
pub const LONG_CONVERSATION_MESSAGES: u32 = 10;

struct Rule {
    factor: f64,
    applies: fn(&Arm, &DecisionContext) -> bool,
}

const RULES: &[Rule] = &[
    Rule {
        factor: 1.3,
        applies: |arm, ctx| {
            ctx.customer_profile == CustomerProfile::PriceSensitive && arm.payload.is_discount()
        },
    },
    Rule {
        factor: 1.2,
        applies: |arm, ctx| {
            ctx.customer_profile == CustomerProfile::Interested
                && arm.category == ArmCategory::Closing
        },
    },
    Rule {
        factor: 1.25,
        applies: |arm, ctx| {
            ctx.customer_profile == CustomerProfile::Hesitant
                && arm.category == ArmCategory::Approach
        },
    },
    Rule {
        factor: 1.15,
        applies: |arm, ctx| {
            ctx.time_of_day == TimeOfDay::Evening
                && arm.payload.technique() == Some(ApproachTechnique::Urgency)
        },
    },
    Rule {
        factor: 1.1,
        applies: |arm, ctx| {
            ctx.time_of_day == TimeOfDay::Morning
                && arm.payload.technique() == Some(ApproachTechnique::Benefits)
        },
    },
    Rule {
        factor: 1.4,
        applies: |arm, ctx| {
            ctx.conversation_stage == ConversationStage::Closing
                && arm.category == ArmCategory::Closing
        },
    },
    Rule {
        factor: 1.3,
        applies: |arm, ctx| {
            ctx.conversation_stage == ConversationStage::Opening
                && arm.category == ArmCategory::Approach
        },
    },
    Rule {
        factor: 1.2,
        applies: |arm, ctx| {
            ctx.message_count > LONG_CONVERSATION_MESSAGES && arm.payload.is_discount()
        },
    },
];

/// Pure function of arm and context. Always within `[MIN_WEIGHT, MAX_WEIGHT]`.
pub fn contextual_weight(arm: &Arm, context: &DecisionContext) -> f64 {
    RULES
        .iter()
        .filter(|rule| (rule.applies)(arm, context))
        .fold(1.0, |weight, rule| weight * rule.factor)
        .clamp(MIN_WEIGHT, MAX_WEIGHT)
}
