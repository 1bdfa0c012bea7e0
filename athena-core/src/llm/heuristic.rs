//! Built-in heuristic LLM substitute.
//!
//! Deterministic, dependency-free stand-in used when no provider is
//! configured and as the fallback path when a configured provider fails.
//! Generation echoes a compacted form of the prompt's subject; scoring uses
//! surface features (length, error markers, repetition).

use super::{LlmClient, LlmError};
use async_trait::async_trait;

/// Deterministic heuristic generation and scoring
pub struct HeuristicLlm;

impl HeuristicLlm {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compact a prompt into its most informative line
    fn salient_line(prompt: &str) -> &str {
        prompt
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .max_by_key(|l| l.len())
            .unwrap_or("")
    }
}

impl Default for HeuristicLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for HeuristicLlm {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
    ) -> std::result::Result<String, LlmError> {
        let line = Self::salient_line(prompt);
        // Rough 4-chars-per-token budget
        let budget = max_tokens.saturating_mul(4).max(16);
        let mut out: String = line.chars().take(budget).collect();
        if out.is_empty() {
            out = "no content".to_string();
        }
        Ok(out)
    }

    async fn score(&self, prompt: &str) -> std::result::Result<f32, LlmError> {
        let lower = prompt.to_lowercase();
        let mut score: f32 = 0.5;
        if lower.contains("error") || lower.contains("fail") {
            score += 0.2;
        }
        if lower.contains("success") || lower.contains("resolved") {
            score += 0.15;
        }
        // Very short prompts carry little signal
        if prompt.len() < 24 {
            score -= 0.2;
        }
        Ok(score.clamp(0.0, 1.0))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
