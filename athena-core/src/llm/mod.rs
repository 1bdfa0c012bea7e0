//! # LLM Client
//!
//! Prompt-to-text generation used by System-2 consolidation validation,
//! query expansion, and Tier-3 reranking. Every call site has a heuristic
//! path for when the provider fails; the engine never hard-depends on an
//! LLM being reachable.

mod heuristic;

pub use heuristic::HeuristicLlm;

use crate::error::Error;
use async_trait::async_trait;
use std::time::Duration;

/// Structured LLM failure, discriminating retryable from malformed outcomes
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM provider error: {0}")]
    ProviderError(String),

    #[error("LLM returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl From<LlmError> for Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(d) => Error::Timeout(format!("llm call after {d:?}")),
            LlmError::ProviderError(msg) => Error::Provider(msg),
            LlmError::InvalidResponse(msg) => Error::InvalidInput(format!("llm response: {msg}")),
        }
    }
}

/// Health report for an LLM provider
#[derive(Debug, Clone)]
pub struct LlmHealth {
    pub available: bool,
    pub provider: String,
}

/// Provider interface for text generation and scoring
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate text for a prompt, bounded by `max_tokens`
    async fn generate(&self, prompt: &str, max_tokens: usize)
        -> std::result::Result<String, LlmError>;

    /// Score a prompt in [0, 1]; providers without a scoring head return
    /// `InvalidResponse`
    async fn score(&self, prompt: &str) -> std::result::Result<f32, LlmError> {
        let _ = prompt;
        Err(LlmError::InvalidResponse(
            "provider has no scoring support".to_string(),
        ))
    }

    /// Provider name for health reporting
    fn name(&self) -> &str;

    /// Liveness probe
    async fn health(&self) -> LlmHealth {
        LlmHealth {
            available: true,
            provider: self.name().to_string(),
        }
    }
}

/// Run a generation under a deadline, mapping elapsed deadlines to
/// [`LlmError::Timeout`]
pub async fn generate_with_deadline(
    client: &dyn LlmClient,
    prompt: &str,
    max_tokens: usize,
    deadline: Duration,
) -> std::result::Result<String, LlmError> {
    match tokio::time::timeout(deadline, client.generate(prompt, max_tokens)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn generate(
            &self,
            _prompt: &str,
            _max_tokens: usize,
        ) -> std::result::Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_maps_to_timeout() {
        let err = generate_with_deadline(&SlowLlm, "p", 16, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn test_llm_error_conversion() {
        let err: Error = LlmError::ProviderError("503".into()).into();
        assert!(err.is_recoverable());
        let err: Error = LlmError::InvalidResponse("not json".into()).into();
        assert!(!err.is_recoverable());
        let err: Error = LlmError::Timeout(Duration::from_secs(1)).into();
        assert!(err.is_recoverable());
    }
}
