//! Default tactic catalog with optimistic priors.

use crate::domain::arm::{ApproachTechnique, Arm, ClosingLever, MediaFormat, TacticPayload};

struct Seed {
    id: &'static str,
    variant: &'static str,
    payload: TacticPayload,
    alpha: f64,
    beta: f64,
}

fn pricing(id: &'static str, variant: &'static str, units: u32, price: f64, discounted: bool, alpha: f64, beta: f64) -> Seed {
    Seed { id, variant, payload: TacticPayload::Pricing { units, price, discounted }, alpha, beta }
}

fn approach(id: &'static str, variant: &'static str, technique: ApproachTechnique, alpha: f64, beta: f64) -> Seed {
    Seed { id, variant, payload: TacticPayload::Approach { technique }, alpha, beta }
}

fn timing(id: &'static str, variant: &'static str, delay_minutes: u32, alpha: f64, beta: f64) -> Seed {
    Seed { id, variant, payload: TacticPayload::Timing { delay_minutes }, alpha, beta }
}

fn media(id: &'static str, variant: &'static str, format: MediaFormat, alpha: f64, beta: f64) -> Seed {
    Seed { id, variant, payload: TacticPayload::Media { format }, alpha, beta }
}

fn closing(id: &'static str, variant: &'static str, lever: ClosingLever, alpha: f64, beta: f64) -> Seed {
    Seed { id, variant, payload: TacticPayload::Closing { lever }, alpha, beta }
}

fn script(id: &'static str, variant: &'static str, name: &str, alpha: f64, beta: f64) -> Seed {
    Seed { id, variant, payload: TacticPayload::Script { name: name.to_string() }, alpha, beta }
}

pub fn default_arms() -> Vec<Arm> {
    use ApproachTechnique as A;
    use ClosingLever as C;
    use MediaFormat as M;

    let seeds = vec![
        pricing("price_1un_89", "1 unit at 89.90", 1, 89.90, false, 2.0, 1.0),
        pricing("price_1un_97", "1 unit at 97.00", 1, 97.00, false, 1.5, 1.2),
        pricing("price_2un_169", "2 units at 169.90", 2, 169.90, false, 3.0, 1.0),
        pricing("price_3un_239", "3 units at 239.90", 3, 239.90, false, 2.5, 1.1),
        pricing("price_5un_349", "5 units at 349.90", 5, 349.90, false, 1.8, 1.5),
        pricing("price_combo_premium", "Premium bundle at 197.90", 3, 197.90, false, 2.2, 1.2),
        pricing("price_discount_vip", "VIP discount at 79.90", 1, 79.90, true, 2.8, 1.0),
        pricing("price_limited_offer", "Limited offer at 149.90", 2, 149.90, true, 2.4, 1.1),
        approach("approach_consultative", "Consultative approach", A::Consultative, 2.5, 1.0),
        approach("approach_urgency", "Create urgency", A::Urgency, 2.2, 1.2),
        approach("approach_benefits", "Lead with benefits", A::Benefits, 2.8, 1.0),
        approach("approach_social_proof", "Social proof", A::SocialProof, 2.4, 1.1),
        approach("approach_scarcity", "Scarcity", A::Scarcity, 2.1, 1.3),
        approach("approach_authority", "Authority", A::Authority, 2.3, 1.2),
        approach("approach_reciprocity", "Reciprocity", A::Reciprocity, 2.6, 1.0),
        approach("approach_commitment", "Commitment", A::Commitment, 2.2, 1.2),
        timing("timing_immediate", "Reply immediately", 0, 3.0, 1.0),
        timing("timing_5min", "Wait 5 minutes", 5, 2.4, 1.1),
        timing("timing_15min", "Wait 15 minutes", 15, 2.2, 1.2),
        timing("timing_1h", "Wait 1 hour", 60, 1.8, 1.4),
        timing("timing_3h", "Wait 3 hours", 180, 1.5, 1.6),
        timing("timing_6h", "Wait 6 hours", 360, 1.3, 1.8),
        timing("timing_12h", "Wait 12 hours", 720, 1.2, 2.0),
        timing("timing_24h", "Wait 24 hours", 1440, 1.1, 2.2),
        media("media_demo_video", "Product demo video", M::DemoVideo, 2.8, 1.0),
        media("media_product_image", "Product image", M::ProductImage, 2.4, 1.1),
        media("media_animated_gif", "Animated GIF", M::AnimatedGif, 2.6, 1.0),
        media("media_carousel", "Image carousel", M::Carousel, 2.2, 1.2),
        media("media_infographic", "Infographic", M::Infographic, 2.1, 1.3),
        media("media_testimonial_video", "Testimonial video", M::TestimonialVideo, 2.9, 1.0),
        media("media_audio", "Explanatory audio", M::Audio, 1.8, 1.4),
        media("media_document", "PDF document", M::Document, 1.6, 1.6),
        closing("closing_discount", "Offer a discount", C::Discount, 2.7, 1.0),
        closing("closing_guarantee", "Reinforce the guarantee", C::Guarantee, 2.5, 1.1),
        closing("closing_free_shipping", "Free shipping", C::FreeShipping, 2.8, 1.0),
        closing("closing_bonus", "Exclusive bonus", C::Bonus, 2.4, 1.1),
        closing("closing_deadline", "Limited deadline", C::Deadline, 2.3, 1.2),
        closing("closing_installments", "Installment plan", C::Installments, 2.6, 1.0),
        closing("closing_trial", "Trial period", C::TrialPeriod, 2.2, 1.2),
        closing("closing_upgrade", "Free upgrade", C::Upgrade, 2.1, 1.3),
        script("script_direct", "Direct script", "direct", 1.0, 1.0),
        script("script_storytelling", "Storytelling script", "storytelling", 1.0, 1.0),
        script("script_question_led", "Question-led script", "question_led", 1.0, 1.0),
    ];

    seeds
        .into_iter()
        .map(|seed| Arm::new(seed.id, seed.variant, seed.payload, seed.alpha, seed.beta))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::default_arms;
    use crate::domain::arm::ArmCategory;

    #[test]
    fn catalog_covers_every_category_with_unique_ids() {
        let arms = default_arms();
        let ids: HashSet<_> = arms.iter().map(|arm| arm.id.clone()).collect();
        assert_eq!(ids.len(), arms.len());

        for category in ArmCategory::ALL {
            assert!(
                arms.iter().any(|arm| arm.category == category),
                "catalog is missing {category}"
            );
        }
    }

    #[test]
    fn catalog_priors_respect_lower_bound() {
        for arm in default_arms() {
            assert!(arm.alpha >= 1.0 && arm.beta >= 1.0, "{} prior too small", arm.id);
            assert!(arm.expected_reward > 0.0 && arm.expected_reward < 1.0);
        }
    }
}
