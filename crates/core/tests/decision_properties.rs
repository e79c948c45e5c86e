use closer_core::allocator::BudgetAllocator;
use closer_core::anomaly::{AnomalyDetector, Severity};
use closer_core::bandit::BanditEngine;
use closer_core::domain::allocation::AllocationStrategy;
use closer_core::domain::arm::{Arm, ArmCategory, ArmId, TacticPayload};
use closer_core::domain::campaign::{CampaignId, CampaignPatch};
use closer_core::domain::context::{
    ConversationStage, CustomerProfile, DecisionContext, Sentiment, TimeOfDay,
};
use closer_core::drift::DriftDetector;
use closer_core::guardrails::{GuardrailSnapshot, GuardrailThresholds, Guardrails};
use closer_core::stats::{beta_mean, sample_beta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type PropertyResult = Result<(), String>;

macro_rules! require {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

fn pricing_arm(id: &str, alpha: f64, beta: f64) -> Arm {
    Arm::new(id, id, TacticPayload::Pricing { units: 1, price: 99.0, discounted: false }, alpha, beta)
}

fn sample_contexts() -> Vec<DecisionContext> {
    vec![
        DecisionContext::default(),
        DecisionContext {
            customer_profile: CustomerProfile::PriceSensitive,
            conversation_stage: ConversationStage::Closing,
            message_count: 14,
            ..DecisionContext::default()
        },
        DecisionContext {
            customer_profile: CustomerProfile::Hesitant,
            sentiment: Some(Sentiment::Negative),
            time_of_day: TimeOfDay::Night,
            ..DecisionContext::default()
        },
    ]
}

#[test]
fn beta_sampling_converges_to_posterior_mean() -> PropertyResult {
    let mut rng = StdRng::seed_from_u64(7);

    for (alpha, beta) in [(1.0, 1.0), (3.0, 2.0), (2.0, 9.0), (40.0, 12.0)] {
        let draws = 20_000;
        let mean = (0..draws).map(|_| sample_beta(&mut rng, alpha, beta)).sum::<f64>() / draws as f64;
        let expected = beta_mean(alpha, beta);

        require!(
            (mean - expected).abs() < 0.01,
            "Beta({alpha}, {beta}) sample mean {mean} drifted from {expected}"
        );
        require!(expected > 0.0 && expected < 1.0, "expected reward must lie in (0, 1)");
    }
    Ok(())
}

#[test]
fn selection_never_crosses_categories() -> PropertyResult {
    let engine = BanditEngine::with_default_catalog();
    let mut rng = StdRng::seed_from_u64(11);

    for category in ArmCategory::ALL {
        for context in sample_contexts() {
            for _ in 0..200 {
                let selection = engine
                    .select_with_rng(category, &context, &mut rng)
                    .map_err(|error| error.to_string())?;
                require!(
                    selection.arm.category == category,
                    "asked for {category:?}, got {:?}",
                    selection.arm.category
                );
            }
        }
    }

    let aliased = engine
        .select_by_name("price", &DecisionContext::default())
        .map_err(|error| error.to_string())?;
    require!(aliased.arm.category == ArmCategory::Pricing, "price alias should select pricing");
    Ok(())
}

#[test]
fn updates_count_one_play_and_never_shrink_the_posterior() -> PropertyResult {
    let engine = BanditEngine::with_default_catalog();
    let arm_id = ArmId::new("approach_consultative");
    let mut rng = StdRng::seed_from_u64(3);

    for _ in 0..500 {
        let before = engine.arm(&arm_id).ok_or("catalog arm missing")?;
        let plays_before = engine.total_plays();
        let reward = if rng.gen_bool(0.3) { rng.gen_range(0.0..=1.0) } else { 0.0 };

        let after = engine.update(&arm_id, reward, 10.0).map_err(|error| error.to_string())?;

        require!(engine.total_plays() == plays_before + 1, "total plays must grow by exactly one");
        require!(after.total_plays == before.total_plays + 1, "arm plays must grow by exactly one");
        require!(after.alpha >= before.alpha, "alpha decreased");
        require!(after.beta >= before.beta, "beta decreased");
    }
    Ok(())
}

#[test]
fn stronger_posterior_wins_clear_majority() -> PropertyResult {
    let engine = BanditEngine::new(vec![pricing_arm("a", 3.0, 1.0), pricing_arm("b", 1.0, 3.0)]);
    let context = DecisionContext::default();
    let mut rng = StdRng::seed_from_u64(42);

    let trials = 10_000;
    let mut a_wins = 0;
    for _ in 0..trials {
        let selection = engine
            .select_with_rng(ArmCategory::Pricing, &context, &mut rng)
            .map_err(|error| error.to_string())?;
        if selection.arm.id.as_str() == "a" {
            a_wins += 1;
        }
    }

    require!(a_wins * 10 > trials * 6, "arm a won only {a_wins} of {trials} selections");
    Ok(())
}

#[test]
fn allocation_conserves_total_budget_for_every_strategy() -> PropertyResult {
    let mut rng = StdRng::seed_from_u64(99);

    for round in 0..25 {
        let allocator = BudgetAllocator::default();
        let campaigns = rng.gen_range(1..8);
        for index in 0..campaigns {
            allocator.add_or_update_campaign(
                CampaignId::new(format!("c{round}-{index}")),
                CampaignPatch {
                    budget: Some(rng.gen_range(0.0..500.0)),
                    roas: Some(rng.gen_range(0.0..4.0)),
                    total_leads: Some(rng.gen_range(0..3)),
                    ..CampaignPatch::default()
                },
            );
        }
        let before: f64 = allocator.campaigns().iter().map(|c| c.budget).sum();

        for strategy in
            [AllocationStrategy::Balanced, AllocationStrategy::Growth, AllocationStrategy::Defensive]
        {
            let decision =
                allocator.allocate_with_rng(strategy, &mut rng).map_err(|error| error.to_string())?;
            let after: f64 = allocator.campaigns().iter().map(|c| c.budget).sum();

            require!(
                (decision.plan.total_to() - decision.plan.total_from()).abs() < 1e-6,
                "plan for {strategy} moved money: {} -> {}",
                decision.plan.total_from(),
                decision.plan.total_to()
            );
            require!((after - before).abs() < 1e-6, "stored budgets drifted: {before} -> {after}");
        }
    }
    Ok(())
}

#[test]
fn balanced_split_follows_roas_ratio() -> PropertyResult {
    let allocator = BudgetAllocator::default();
    for (id, roas) in [("low", 1.0), ("high", 3.0)] {
        allocator.add_or_update_campaign(
            CampaignId::new(id),
            CampaignPatch {
                budget: Some(100.0),
                roas: Some(roas),
                total_leads: Some(10),
                ..CampaignPatch::default()
            },
        );
    }

    let decision =
        allocator.allocate(AllocationStrategy::Balanced).map_err(|error| error.to_string())?;

    let budget_of = |id: &str| {
        allocator.campaign(&CampaignId::new(id)).map(|campaign| campaign.budget).unwrap_or_default()
    };
    require!((budget_of("low") - 50.0).abs() < 1e-9, "low campaign got {}", budget_of("low"));
    require!((budget_of("high") - 150.0).abs() < 1e-9, "high campaign got {}", budget_of("high"));
    require!((decision.plan.total_to() - 200.0).abs() < 1e-9, "total should stay at 200");
    require!(
        (decision.plan.diversification_score - 0.25).abs() < 1e-9,
        "diversification should be 1 - 0.75"
    );
    Ok(())
}

#[test]
fn guardrail_freezes_at_spend_boundary_and_recovers() -> PropertyResult {
    let thresholds = GuardrailThresholds { min_conversions: 1, max_spend_without_conversion: 80.0 };
    let at_limit = GuardrailSnapshot { spend: 80.0, conversions: 0, created: None };
    let under_limit = GuardrailSnapshot { spend: 79.0, conversions: 0, created: None };

    let guardrails = Guardrails::default();
    require!(
        guardrails.check_budget_guardrails(&at_limit, &thresholds).frozen,
        "spend 80 with no conversions must freeze"
    );

    let fresh = Guardrails::default();
    require!(
        !fresh.check_budget_guardrails(&under_limit, &thresholds).frozen,
        "spend 79 with no conversions must not freeze"
    );

    guardrails.record_conversion();
    let state = guardrails.check_budget_guardrails(&at_limit, &thresholds);
    require!(!state.frozen, "a recorded conversion must unfreeze on the next check");
    require!(state.reason.is_none(), "auto unfreeze clears the reason");
    Ok(())
}

#[test]
fn anomaly_boundaries_are_exclusive() -> PropertyResult {
    let detector = AnomalyDetector::default();
    for _ in 0..30 {
        require!(detector.record("cpl", 4.0, None).is_none(), "constant series is never anomalous");
    }
    let record = detector.record("cpl", 40.0, None).ok_or("outlier should be flagged")?;
    require!(record.z > 3.0, "outlier z {} should exceed 3", record.z);
    require!(record.severity == Severity::High, "outlier should be high severity");

    let boundary = AnomalyDetector::default();
    for value in [0.0, 0.0, 0.0, 0.0, 1.0, 5.0] {
        require!(boundary.record("cpl", value, None).is_none(), "z == 2 must not be recorded");
    }
    Ok(())
}

#[test]
fn drift_score_spans_zero_to_saturation() -> PropertyResult {
    let detector = DriftDetector::new();
    let baseline: Vec<f64> = (0..50).map(|i| 10.0 + f64::from(i % 5)).collect();
    detector.build_baseline(&baseline, |value| *value);

    let same = detector.evaluate_current(&baseline, |value| *value);
    require!(same.drift_score == 0.0 && !same.has_drift, "identical samples must not drift");

    let shifted: Vec<f64> = baseline.iter().map(|value| value + 1_000.0).collect();
    let moved = detector.evaluate_current(&shifted, |value| *value);
    require!(moved.drift_score == 1.0 && moved.has_drift, "extreme shift must saturate at 1");
    Ok(())
}
