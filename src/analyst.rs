// src/analyst.rs
// INSIGHT AGGREGATOR
// Clusters per-conversation insights into ranked cross-interview themes.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::brain::{ChatTurn, TextGenerator};
use crate::extract::extract_array;

/// One insight as extracted from one conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInsight {
    pub insight: String,
    pub persona_id: String,
    pub persona_name: String,
    pub conversation_id: String,
}

/// A cross-conversation theme. `confidence` is always within 1..=5.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedInsight {
    pub theme: String,
    pub description: String,
    pub evidence: String,
    pub impact: String,
    pub confidence: u8,
}

pub const FALLBACK_IMPACT: &str = "Requires further analysis";

#[derive(Clone)]
pub struct InsightAggregator {
    brain: Arc<dyn TextGenerator>,
}

impl InsightAggregator {
    pub fn new(brain: Arc<dyn TextGenerator>) -> Self {
        Self { brain }
    }

    /// Merge raw insights into themes. Empty input makes no service call.
    pub async fn aggregate(&self, raw: &[RawInsight], context: &str) -> Vec<AggregatedInsight> {
        if raw.is_empty() {
            info!("no insights to aggregate");
            return Vec::new();
        }
        info!(count = raw.len(), "aggregating insights");

        let listing: String = raw
            .iter()
            .enumerate()
            .map(|(i, r)| format!("Insight {} (from {}): {}\n", i + 1, r.persona_name, r.insight))
            .collect();

        let system_prompt = format!(
            "You are an expert at analyzing customer research insights and identifying patterns and themes.\n\
            Analyze insights from multiple customer interviews about {context}: identify common themes, \
            cluster similar insights, rank them by impact and call out surprising findings.\n\
            For each theme give a concise name, a clear description, the supporting evidence, the potential \
            impact on product decisions and a confidence score from 1 to 5 based on how many personas shared it."
        );
        let user_prompt = format!(
            "Here are the insights from the customer interviews:\n\n{listing}\n\
            Respond with a JSON array only, no wrapper object:\n\
            [{{\"theme\": \"...\", \"description\": \"...\", \"evidence\": \"...\", \"impact\": \"...\", \"confidence\": 3}}]\n\
            Keep descriptions and impacts concise."
        );

        let candidates = match self
            .brain
            .generate(&system_prompt, &[ChatTurn::user(user_prompt)], 0.3, 2000)
            .await
            .and_then(|text| extract_array(&text))
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "insight aggregation failed, using fallback grouping");
                return fallback_aggregation(raw);
            }
        };

        let validated: Vec<AggregatedInsight> = candidates
            .iter()
            .filter_map(|candidate| {
                let record = validate_record(candidate);
                if record.is_none() {
                    warn!(%candidate, "dropping invalid aggregated insight");
                }
                record
            })
            .collect();

        if validated.is_empty() && !candidates.is_empty() {
            warn!("every aggregated insight failed validation, using fallback grouping");
            return fallback_aggregation(raw);
        }

        info!(themes = validated.len(), "aggregation finished");
        validated
    }
}

fn validate_record(candidate: &Value) -> Option<AggregatedInsight> {
    Some(AggregatedInsight {
        theme: text_field(candidate, "theme")?,
        description: text_field(candidate, "description")?,
        evidence: text_field(candidate, "evidence")?,
        impact: text_field(candidate, "impact")?,
        confidence: confidence_field(candidate.get("confidence")?)?,
    })
}

fn text_field(candidate: &Value, key: &str) -> Option<String> {
    match candidate.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => Some(other.to_string()),
    }
}

fn confidence_field(value: &Value) -> Option<u8> {
    let score = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (1..=5).contains(&score).then_some(score as u8)
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Deterministic grouping by word overlap with each group's three-word key.
///
/// Inputs are put into a canonical order first, so group membership depends
/// only on the multiset of insights, not on the order they arrive in.
pub fn fallback_aggregation(raw: &[RawInsight]) -> Vec<AggregatedInsight> {
    let mut ordered: Vec<&RawInsight> = raw.iter().collect();
    ordered.sort_by(|a, b| {
        (a.insight.to_lowercase(), &a.insight, &a.persona_id, &a.persona_name, &a.conversation_id).cmp(&(
            b.insight.to_lowercase(),
            &b.insight,
            &b.persona_id,
            &b.persona_name,
            &b.conversation_id,
        ))
    });

    let mut groups: Vec<(String, HashSet<String>, Vec<&RawInsight>)> = Vec::new();
    for insight in ordered {
        let insight_words = words(&insight.insight);
        if insight_words.is_empty() {
            debug!(persona = %insight.persona_name, "skipping insight with no words");
            continue;
        }
        let key = insight_words.iter().take(3).cloned().collect::<Vec<_>>().join(" ");

        let existing = groups
            .iter_mut()
            .find(|(_, key_words, _)| insight_words.iter().any(|w| key_words.contains(w)));
        match existing {
            Some((_, _, members)) => members.push(insight),
            None => {
                let key_words = key.split_whitespace().map(str::to_string).collect();
                groups.push((key, key_words, vec![insight]));
            }
        }
    }

    let aggregated: Vec<AggregatedInsight> = groups
        .into_iter()
        .map(|(key, _, members)| AggregatedInsight {
            theme: capitalize(&key),
            description: members[0].insight.clone(),
            evidence: format!("Mentioned by {} personas", members.len()),
            impact: FALLBACK_IMPACT.to_string(),
            confidence: members.len().min(5) as u8,
        })
        .collect();

    info!(themes = aggregated.len(), "fallback aggregation produced themes");
    aggregated
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
