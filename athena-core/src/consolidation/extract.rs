//! Heuristic pattern extraction from clusters (System 1).
//!
//! Each cluster becomes a candidate pattern scored on frequency, novelty
//! against the existing semantic store, and outcome success rate. The
//! blended `system1_confidence` decides whether System-2 validation runs.

use super::cluster::EventCluster;
use crate::embed::cosine_similarity;
use crate::episodic::EpisodicEvent;
use crate::semantic::SemanticMemory;
use crate::types::{EventType, MemoryType};

/// Feature vector for one candidate pattern
#[derive(Debug, Clone, Copy)]
pub struct PatternFeatures {
    /// Cluster size saturated at 10 events
    pub frequency: f32,
    /// 1 - max similarity to any existing semantic memory
    pub novelty: f32,
    /// Fraction of events with a successful outcome marker
    pub outcome_rate: f32,
}

impl PatternFeatures {
    /// Blend features into System-1 confidence.
    ///
    /// Frequency carries the most weight: a pattern seen six times is worth
    /// consolidating even when it looks familiar.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        (0.5 * self.frequency + 0.2 * self.novelty + 0.3 * self.outcome_rate).clamp(0.0, 1.0)
    }
}

/// A candidate pattern awaiting validation and promotion
#[derive(Debug, Clone)]
pub struct CandidatePattern {
    pub cluster: EventCluster,
    pub description: String,
    pub memory_type: MemoryType,
    pub features: PatternFeatures,
    pub system1_confidence: f32,
    /// Entity names observed across the cluster
    pub entities: Vec<String>,
    /// Repeated action sequence, when the cluster exhibits one
    pub action_sequence: Option<Vec<String>>,
}

/// Extract a candidate pattern from a cluster.
///
/// `existing` is the semantic candidate pool used for the novelty feature.
#[must_use]
pub fn extract_pattern(cluster: EventCluster, existing: &[SemanticMemory]) -> CandidatePattern {
    let frequency = (cluster.events.len() as f32 / 10.0).min(1.0);

    let novelty = match cluster.centroid() {
        Some(centroid) => {
            let max_sim = existing
                .iter()
                .map(|m| cosine_similarity(&centroid, &m.embedding))
                .fold(0.0f32, f32::max);
            (1.0 - max_sim).clamp(0.0, 1.0)
        }
        // No embeddings: assume novel rather than silently suppressing
        None => 1.0,
    };

    let outcomes: Vec<bool> = cluster.events.iter().filter_map(outcome_of).collect();
    let outcome_rate = if outcomes.is_empty() {
        0.5
    } else {
        outcomes.iter().filter(|&&ok| ok).count() as f32 / outcomes.len() as f32
    };

    let features = PatternFeatures {
        frequency,
        novelty,
        outcome_rate,
    };

    let description = describe_cluster(&cluster);
    let memory_type = classify_cluster(&cluster);
    let entities = extract_entities(&cluster);
    let action_sequence = repeated_action_sequence(&cluster);

    CandidatePattern {
        system1_confidence: features.confidence(),
        cluster,
        description,
        memory_type,
        features,
        entities,
        action_sequence,
    }
}

/// Success marker from an event's context or content
fn outcome_of(event: &EpisodicEvent) -> Option<bool> {
    if let Some(success) = event
        .structured_context
        .get("success")
        .and_then(|v| v.as_bool())
    {
        return Some(success);
    }
    let lower = event.content.to_lowercase();
    if event.event_type == EventType::Error
        || lower.contains("error")
        || lower.contains("failed")
        || lower.contains("failure")
    {
        Some(false)
    } else if lower.contains("success") || lower.contains("passed") || lower.contains("resolved") {
        Some(true)
    } else {
        None
    }
}

/// One-line description: the most representative content plus a count
fn describe_cluster(cluster: &EventCluster) -> String {
    // Representative = longest content, which tends to carry the most context
    let representative = cluster
        .events
        .iter()
        .max_by_key(|e| e.content.len())
        .map(|e| e.content.as_str())
        .unwrap_or("");
    let head: String = representative.chars().take(200).collect();
    if cluster.events.len() > 1 {
        format!("{head} (observed {} times)", cluster.events.len())
    } else {
        head
    }
}

fn classify_cluster(cluster: &EventCluster) -> MemoryType {
    let error_share = cluster
        .events
        .iter()
        .filter(|e| e.event_type == EventType::Error)
        .count() as f32
        / cluster.events.len().max(1) as f32;
    let decision_share = cluster
        .events
        .iter()
        .filter(|e| e.event_type == EventType::Decision)
        .count() as f32
        / cluster.events.len().max(1) as f32;

    if cluster.events.len() >= 3 {
        MemoryType::Pattern
    } else if decision_share > 0.5 {
        MemoryType::Insight
    } else if error_share > 0.5 {
        MemoryType::Fact
    } else {
        MemoryType::Fact
    }
}

/// Entity candidates: structured-context values under naming keys, plus
/// repeated capitalized tokens in content
fn extract_entities(cluster: &EventCluster) -> Vec<String> {
    use std::collections::BTreeMap;
    const NAMING_KEYS: [&str; 6] = ["file", "tool", "entity", "service", "module", "component"];

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in &cluster.events {
        for key in NAMING_KEYS {
            if let Some(value) = event.structured_context.get(key).and_then(|v| v.as_str()) {
                *counts.entry(value.to_string()).or_insert(0) += 2;
            }
        }
        for token in event.content.split_whitespace() {
            let cleaned = token.trim_matches(|c: char| !c.is_alphanumeric());
            if cleaned.len() > 2
                && cleaned.chars().next().is_some_and(char::is_uppercase)
                && cleaned.chars().any(char::is_lowercase)
            {
                *counts.entry(cleaned.to_string()).or_insert(0) += 1;
            }
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(name, _)| name)
        .collect()
}

/// Detect a repeated action sequence worth promoting to a procedure:
/// the same tool-execution action appearing at least three times with at
/// least 0.6 success rate
fn repeated_action_sequence(cluster: &EventCluster) -> Option<Vec<String>> {
    let executions: Vec<&EpisodicEvent> = cluster
        .events
        .iter()
        .filter(|e| e.event_type == EventType::ToolExecution)
        .collect();
    if executions.len() < 3 {
        return None;
    }

    let outcomes: Vec<bool> = executions.iter().filter_map(|e| outcome_of(e)).collect();
    let success_rate = if outcomes.is_empty() {
        0.5
    } else {
        outcomes.iter().filter(|&&ok| ok).count() as f32 / outcomes.len() as f32
    };
    if success_rate < 0.6 {
        return None;
    }

    let mut actions: Vec<String> = Vec::new();
    for event in executions {
        let action = event
            .structured_context
            .get("tool")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| {
                event
                    .content
                    .split_whitespace()
                    .take(4)
                    .collect::<Vec<_>>()
                    .join(" ")
            });
        if actions.last() != Some(&action) {
            actions.push(action);
        }
    }
    Some(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;
    use serde_json::json;

    fn cluster_of(contents: &[&str], event_type: EventType) -> EventCluster {
        EventCluster {
            events: contents
                .iter()
                .map(|c| EpisodicEvent::new("proj", event_type, *c))
                .collect(),
        }
    }

    #[test]
    fn test_confidence_rises_with_frequency() {
        let small = extract_pattern(cluster_of(&["db error"], EventType::Error), &[]);
        let large = extract_pattern(
            cluster_of(&["db error"; 6], EventType::Error),
            &[],
        );
        assert!(large.system1_confidence > small.system1_confidence);
    }

    #[test]
    fn test_novelty_drops_when_similar_memory_exists() {
        let embedder = MockEmbedder::new(64);
        let mut cluster = cluster_of(&["database connection error"], EventType::Error);
        cluster.events[0].embedding = Some(embedder.generate("database connection error"));

        let existing = SemanticMemory::new(
            "proj",
            "database connection error",
            MemoryType::Fact,
            embedder.generate("database connection error"),
        );

        let novel = extract_pattern(cluster.clone(), &[]);
        let familiar = extract_pattern(cluster, &[existing]);
        assert!(familiar.features.novelty < novel.features.novelty);
    }

    #[test]
    fn test_description_carries_observation_count() {
        let pattern = extract_pattern(
            cluster_of(&["db error", "db error again and again"], EventType::Error),
            &[],
        );
        assert!(pattern.description.contains("observed 2 times"));
    }

    #[test]
    fn test_repeated_successful_executions_become_sequence() {
        let mut events = Vec::new();
        for i in 0..4 {
            let mut ctx = serde_json::Map::new();
            ctx.insert("tool".to_string(), json!("run_tests"));
            ctx.insert("success".to_string(), json!(true));
            events.push(
                EpisodicEvent::new("proj", EventType::ToolExecution, format!("run {i}"))
                    .with_context(ctx),
            );
        }
        let pattern = extract_pattern(EventCluster { events }, &[]);
        let sequence = pattern.action_sequence.unwrap();
        assert_eq!(sequence, vec!["run_tests".to_string()]);
    }

    #[test]
    fn test_failing_executions_do_not_become_procedure() {
        let mut events = Vec::new();
        for i in 0..4 {
            let mut ctx = serde_json::Map::new();
            ctx.insert("tool".to_string(), json!("run_tests"));
            ctx.insert("success".to_string(), json!(false));
            events.push(
                EpisodicEvent::new("proj", EventType::ToolExecution, format!("run {i}"))
                    .with_context(ctx),
            );
        }
        let pattern = extract_pattern(EventCluster { events }, &[]);
        assert!(pattern.action_sequence.is_none());
    }

    #[test]
    fn test_entity_extraction_from_context_keys() {
        let mut ctx = serde_json::Map::new();
        ctx.insert("service".to_string(), json!("auth-gateway"));
        let events = vec![
            EpisodicEvent::new("proj", EventType::Error, "Postgres refused the connection")
                .with_context(ctx.clone()),
            EpisodicEvent::new("proj", EventType::Error, "Postgres timeout")
                .with_context(ctx),
        ];
        let pattern = extract_pattern(EventCluster { events }, &[]);
        assert!(pattern.entities.contains(&"auth-gateway".to_string()));
        assert!(pattern.entities.contains(&"Postgres".to_string()));
    }
}
