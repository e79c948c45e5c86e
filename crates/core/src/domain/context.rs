use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerProfile {
    #[default]
    New,
    Returning,
    PriceSensitive,
    Interested,
    Engaged,
    Hesitant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    #[default]
    Afternoon,
    Evening,
    Night,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    #[default]
    Weekday,
    Weekend,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    Opening,
    #[default]
    Qualifying,
    Presenting,
    #[serde(alias = "handling_objections")]
    Objections,
    Closing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Snapshot of the conversation a decision is made for.
///
/// The default value is the neutral context: no contextual weight rule fires
/// for it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionContext {
    pub customer_profile: CustomerProfile,
    pub time_of_day: TimeOfDay,
    pub day_of_week: DayOfWeek,
    pub city: String,
    pub message_count: u32,
    pub conversation_stage: ConversationStage,
    pub response_time_secs: Option<f64>,
    pub sentiment: Option<Sentiment>,
}

/// Loosely-typed context as received from upstream collaborators.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDecisionContext {
    pub customer_profile: Option<String>,
    pub time_of_day: Option<String>,
    pub day_of_week: Option<String>,
    pub city: Option<String>,
    pub message_count: Option<i64>,
    pub conversation_stage: Option<String>,
    pub response_time_secs: Option<f64>,
    pub sentiment: Option<String>,
}

impl DecisionContext {
    /// Builds a context from loosely-typed input. Unknown or missing fields
    /// fall back to the neutral default so the decision path never fails on
    /// malformed context.
    pub fn from_raw(raw: RawDecisionContext) -> Self {
        let defaults = Self::default();
        let mut replaced = Vec::new();

        let customer_profile = parse_or_default(
            raw.customer_profile.as_deref(),
            defaults.customer_profile,
            "customer_profile",
            &mut replaced,
        );
        let time_of_day = parse_or_default(
            raw.time_of_day.as_deref(),
            defaults.time_of_day,
            "time_of_day",
            &mut replaced,
        );
        let day_of_week = parse_or_default(
            raw.day_of_week.as_deref(),
            defaults.day_of_week,
            "day_of_week",
            &mut replaced,
        );
        let conversation_stage = parse_or_default(
            raw.conversation_stage.as_deref(),
            defaults.conversation_stage,
            "conversation_stage",
            &mut replaced,
        );
        let sentiment = raw.sentiment.as_deref().and_then(|value| {
            let parsed = parse_enum::<Sentiment>(value);
            if parsed.is_none() {
                replaced.push("sentiment");
            }
            parsed
        });
        let message_count = match raw.message_count {
            Some(count) if count >= 0 => u32::try_from(count).unwrap_or(u32::MAX),
            Some(_) => {
                replaced.push("message_count");
                0
            }
            None => 0,
        };
        let response_time_secs =
            raw.response_time_secs.filter(|secs| secs.is_finite() && *secs >= 0.0);

        if !replaced.is_empty() {
            tracing::debug!(
                event_name = "engine.context.defaults_applied",
                fields = ?replaced,
                "malformed context fields replaced with neutral defaults"
            );
        }

        Self {
            customer_profile,
            time_of_day,
            day_of_week,
            city: raw.city.unwrap_or_default().trim().to_string(),
            message_count,
            conversation_stage,
            response_time_secs,
            sentiment,
        }
    }
}

fn parse_or_default<T: for<'de> Deserialize<'de>>(
    value: Option<&str>,
    default: T,
    field: &'static str,
    replaced: &mut Vec<&'static str>,
) -> T {
    match value {
        None => default,
        Some(value) => parse_enum(value).unwrap_or_else(|| {
            replaced.push(field);
            default
        }),
    }
}

fn parse_enum<T: for<'de> Deserialize<'de>>(value: &str) -> Option<T> {
    let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    serde_json::from_value(serde_json::Value::String(normalized)).ok()
}

#[cfg(test)]
mod tests {
    use super::{
        ConversationStage, CustomerProfile, DecisionContext, RawDecisionContext, Sentiment,
        TimeOfDay,
    };

    #[test]
    fn raw_context_parses_known_values() {
        let context = DecisionContext::from_raw(RawDecisionContext {
            customer_profile: Some("price-sensitive".to_string()),
            time_of_day: Some("Evening".to_string()),
            conversation_stage: Some("handling_objections".to_string()),
            sentiment: Some("negative".to_string()),
            message_count: Some(12),
            city: Some("  Curitiba ".to_string()),
            ..RawDecisionContext::default()
        });

        assert_eq!(context.customer_profile, CustomerProfile::PriceSensitive);
        assert_eq!(context.time_of_day, TimeOfDay::Evening);
        assert_eq!(context.conversation_stage, ConversationStage::Objections);
        assert_eq!(context.sentiment, Some(Sentiment::Negative));
        assert_eq!(context.message_count, 12);
        assert_eq!(context.city, "Curitiba");
    }

    #[test]
    fn malformed_fields_fall_back_to_neutral_defaults() {
        let context = DecisionContext::from_raw(RawDecisionContext {
            customer_profile: Some("vip".to_string()),
            conversation_stage: Some("???".to_string()),
            message_count: Some(-4),
            response_time_secs: Some(f64::NAN),
            sentiment: Some("ecstatic".to_string()),
            ..RawDecisionContext::default()
        });

        assert_eq!(context, DecisionContext::default());
    }

    #[test]
    fn partial_json_context_deserializes_with_defaults() {
        let context: DecisionContext =
            serde_json::from_str(r#"{"conversation_stage":"closing"}"#).expect("context");

        assert_eq!(context.conversation_stage, ConversationStage::Closing);
        assert_eq!(context.customer_profile, CustomerProfile::New);
    }
}
