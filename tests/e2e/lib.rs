//! Shared helpers for the end-to-end tests.

use athena_core::llm::{LlmClient, LlmError};
use async_trait::async_trait;
use std::time::Duration;

/// LLM client that fails every call with a timeout, simulating a provider
/// that never answers within its deadline
pub struct TimingOutLlm;

#[async_trait]
impl LlmClient for TimingOutLlm {
    async fn generate(
        &self,
        _prompt: &str,
        _max_tokens: usize,
    ) -> std::result::Result<String, LlmError> {
        Err(LlmError::Timeout(Duration::from_millis(10)))
    }

    fn name(&self) -> &str {
        "timing-out"
    }

    async fn health(&self) -> athena_core::llm::LlmHealth {
        athena_core::llm::LlmHealth {
            available: false,
            provider: self.name().to_string(),
        }
    }
}
