//! System-2 validation and prompt compression.
//!
//! Clusters whose System-1 confidence falls below the threshold (or any
//! cluster under the `quality` strategy) are validated by the LLM client.
//! A provider failure keeps the System-1 output and flags the run degraded;
//! consolidation never blocks on an unreachable provider.

use super::extract::CandidatePattern;
use crate::llm::{generate_with_deadline, LlmClient};
use crate::types::Strategy;
use std::time::Duration;
use tracing::warn;

/// Outcome of validating one candidate
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub refined_description: String,
    pub confidence: f32,
    pub tags: Vec<String>,
    /// True when the LLM path failed and heuristics stood in
    pub degraded: bool,
}

/// Whether System-2 validation should run for a candidate
#[must_use]
pub fn needs_validation(candidate: &CandidatePattern, strategy: Strategy, threshold: f32) -> bool {
    match strategy {
        Strategy::Quality => true,
        Strategy::Speed => false,
        Strategy::Balanced => candidate.system1_confidence < threshold,
    }
}

/// Validate a candidate through the LLM, with the heuristic fallback.
///
/// The blended confidence averages System-1 and System-2 signals so a
/// confident heuristic is not erased by a lukewarm validation.
pub async fn validate_candidate(
    llm: &dyn LlmClient,
    candidate: &CandidatePattern,
    timeout: Duration,
    max_tokens: usize,
) -> ValidationOutcome {
    let prompt = validation_prompt(candidate);

    match generate_with_deadline(llm, &prompt, max_tokens, timeout).await {
        Ok(response) => parse_validation(candidate, &response),
        Err(e) => {
            warn!("System-2 validation degraded to heuristics: {e}");
            ValidationOutcome {
                accepted: candidate.system1_confidence >= 0.3,
                refined_description: candidate.description.clone(),
                confidence: candidate.system1_confidence,
                tags: Vec::new(),
                degraded: true,
            }
        }
    }
}

fn validation_prompt(candidate: &CandidatePattern) -> String {
    let mut prompt = String::from("Assess the recurring observation below.\n");
    prompt.push_str(&format!("Observation: {}\n", candidate.description));
    prompt.push_str(&format!(
        "Seen {} times, success rate {:.2}.\n",
        candidate.cluster.events.len(),
        candidate.features.outcome_rate
    ));
    prompt.push_str("Reply with a one-line refined summary.\n");
    prompt
}

/// Interpret the provider response.
///
/// Any non-empty response counts as acceptance with the response text as the
/// refined description; structured providers can override via `score`.
fn parse_validation(candidate: &CandidatePattern, response: &str) -> ValidationOutcome {
    let refined = response.trim();
    if refined.is_empty() {
        return ValidationOutcome {
            accepted: false,
            refined_description: candidate.description.clone(),
            confidence: candidate.system1_confidence * 0.5,
            tags: Vec::new(),
            degraded: false,
        };
    }
    // Blend: half heuristic, half validated
    let confidence = (candidate.system1_confidence * 0.5 + 0.5).clamp(0.0, 1.0);
    ValidationOutcome {
        accepted: true,
        refined_description: refined.to_string(),
        confidence,
        tags: derive_tags(candidate),
        degraded: false,
    }
}

fn derive_tags(candidate: &CandidatePattern) -> Vec<String> {
    let mut tags = vec![candidate.memory_type.as_str().to_string()];
    if candidate.features.outcome_rate < 0.4 {
        tags.push("failure-mode".to_string());
    }
    if candidate.action_sequence.is_some() {
        tags.push("procedure".to_string());
    }
    tags
}

/// Compress a description toward `target_ratio` of its length while keeping
/// at least `preserve_min` of its sentences' information-bearing tokens.
///
/// Applied only when the strategy includes external validation; pure
/// truncation would violate the preservation floor, so compression drops
/// filler tokens first and gives up (returning the input) when the floor
/// cannot be met.
#[must_use]
pub fn compress_description(text: &str, target_ratio: f32, preserve_min: f32) -> String {
    const FILLER: [&str; 12] = [
        "the", "a", "an", "very", "quite", "just", "really", "that", "then", "and", "also", "still",
    ];
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 8 {
        return text.to_string();
    }

    let target_len = ((tokens.len() as f32) * target_ratio).ceil() as usize;
    let kept: Vec<&str> = tokens
        .iter()
        .filter(|t| !FILLER.contains(&t.to_lowercase().as_str()))
        .copied()
        .collect();

    let content_tokens = tokens
        .iter()
        .filter(|t| !FILLER.contains(&t.to_lowercase().as_str()))
        .count();
    let preserved = kept.len() as f32 / content_tokens.max(1) as f32;

    if preserved < preserve_min {
        return text.to_string();
    }

    if kept.len() <= target_len.max(4) {
        kept.join(" ")
    } else {
        // Filler removal was not enough; keep the head rather than lose the
        // subject of the sentence
        kept[..target_len.max(4)].join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::cluster::EventCluster;
    use crate::consolidation::extract::extract_pattern;
    use crate::episodic::EpisodicEvent;
    use crate::llm::HeuristicLlm;
    use crate::types::EventType;

    fn candidate(n: usize) -> CandidatePattern {
        let events = (0..n)
            .map(|i| EpisodicEvent::new("proj", EventType::Error, format!("db timeout {i}")))
            .collect();
        extract_pattern(EventCluster { events }, &[])
    }

    #[test]
    fn test_needs_validation_by_strategy() {
        let weak = candidate(1);
        let strong = candidate(9);
        assert!(needs_validation(&weak, Strategy::Balanced, 0.7));
        assert!(!needs_validation(&strong, Strategy::Balanced, 0.7));
        assert!(needs_validation(&strong, Strategy::Quality, 0.7));
        assert!(!needs_validation(&weak, Strategy::Speed, 0.7));
    }

    #[tokio::test]
    async fn test_validation_with_heuristic_llm() {
        let outcome = validate_candidate(
            &HeuristicLlm::new(),
            &candidate(6),
            Duration::from_secs(1),
            128,
        )
        .await;
        assert!(outcome.accepted);
        assert!(!outcome.degraded);
        assert!(outcome.confidence >= candidate(6).system1_confidence);
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_heuristics() {
        struct HangingLlm;

        #[async_trait::async_trait]
        impl crate::llm::LlmClient for HangingLlm {
            async fn generate(
                &self,
                _prompt: &str,
                _max_tokens: usize,
            ) -> std::result::Result<String, crate::llm::LlmError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
            fn name(&self) -> &str {
                "hanging"
            }
        }

        tokio::time::pause();
        let candidate_value = candidate(6);
        let fut = validate_candidate(&HangingLlm, &candidate_value, Duration::from_millis(20), 64);
        let outcome = fut.await;
        assert!(outcome.degraded);
        assert!(outcome.accepted);
        assert_eq!(outcome.confidence, candidate(6).system1_confidence);
    }

    #[test]
    fn test_compression_removes_filler() {
        let text = "the database pool was very quite exhausted and then the retries also failed";
        let compressed = compress_description(text, 0.5, 0.9);
        assert!(compressed.len() < text.len());
        assert!(compressed.contains("database"));
        assert!(!compressed.contains(" the "));
    }

    #[test]
    fn test_compression_skips_short_text() {
        let text = "db pool exhausted";
        assert_eq!(compress_description(text, 0.35, 0.95), text);
    }
}
