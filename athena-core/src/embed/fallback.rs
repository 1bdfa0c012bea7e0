//! Degradation wrapper around an embedding provider.
//!
//! Splits oversize batches to the provider's declared maximum, and on
//! provider failure substitutes mock vectors of the same dimension with
//! `degraded = true` so downstream scoring can discount them.

use super::{EmbedHealth, Embedded, EmbeddingProvider, MockEmbedder};
use crate::error::Result;
use std::sync::Arc;
use tracing::warn;

/// Wraps a provider with mock fallback and batch splitting
pub struct FallbackEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    mock: MockEmbedder,
}

impl FallbackEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        let mock = MockEmbedder::new(inner.dimension());
        Self { inner, mock }
    }

    /// Construct a purely mock-backed embedder of the given dimension
    #[must_use]
    pub fn mock_only(dimension: usize) -> Self {
        Self {
            inner: Arc::new(MockEmbedder::new(dimension)),
            mock: MockEmbedder::new(dimension),
        }
    }

    /// Fixed output dimension
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    /// Embed one text, falling back to a mock vector on provider failure
    pub async fn embed(&self, text: &str) -> Embedded {
        match self.inner.embed(text).await {
            Ok(vector) => Embedded {
                vectors: vec![vector],
                degraded: false,
            },
            Err(e) => {
                warn!("Embedding provider failed, substituting mock vector: {e}");
                Embedded {
                    vectors: vec![self.mock.generate(text)],
                    degraded: true,
                }
            }
        }
    }

    /// Embed a batch, splitting to the provider's maximum batch size.
    ///
    /// A failure in any chunk degrades that chunk only; the output always
    /// contains one vector per input text, in order.
    pub async fn embed_batch(&self, texts: &[String]) -> Embedded {
        if texts.is_empty() {
            return Embedded {
                vectors: Vec::new(),
                degraded: false,
            };
        }

        let chunk_size = self.inner.batch_max().max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        let mut degraded = false;

        for chunk in texts.chunks(chunk_size) {
            match self.inner.embed_batch(chunk).await {
                Ok(mut batch) if batch.len() == chunk.len() => vectors.append(&mut batch),
                Ok(batch) => {
                    warn!(
                        "Embedding provider returned {} vectors for {} inputs, degrading chunk",
                        batch.len(),
                        chunk.len()
                    );
                    degraded = true;
                    vectors.extend(chunk.iter().map(|t| self.mock.generate(t)));
                }
                Err(e) => {
                    warn!("Embedding batch failed, substituting mock vectors: {e}");
                    degraded = true;
                    vectors.extend(chunk.iter().map(|t| self.mock.generate(t)));
                }
            }
        }

        Embedded { vectors, degraded }
    }

    /// Provider health
    pub async fn health(&self) -> EmbedHealth {
        self.inner.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;

    struct FailingProvider {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Provider("remote embedder unavailable".into()))
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Provider("remote embedder unavailable".into()))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_failure_degrades_with_correct_dimension() {
        let embedder = FallbackEmbedder::new(Arc::new(FailingProvider { dimension: 768 }));
        let out = embedder.embed("hello").await;
        assert!(out.degraded);
        assert_eq!(out.vectors.len(), 1);
        assert_eq!(out.vectors[0].len(), 768);
    }

    #[tokio::test]
    async fn test_healthy_provider_not_degraded() {
        let embedder = FallbackEmbedder::mock_only(128);
        let out = embedder.embed("hello").await;
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn test_oversize_batch_is_split() {
        let inner = Arc::new(MockEmbedder::new(64).with_batch_max(2));
        let embedder = FallbackEmbedder::new(inner);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let out = embedder.embed_batch(&texts).await;
        assert!(!out.degraded);
        assert_eq!(out.vectors.len(), 5);
    }

    #[tokio::test]
    async fn test_degraded_batch_preserves_order_and_count() {
        let embedder = FallbackEmbedder::new(Arc::new(FailingProvider { dimension: 32 }));
        let texts: Vec<String> = (0..3).map(|i| format!("text {i}")).collect();
        let out = embedder.embed_batch(&texts).await;
        assert!(out.degraded);
        assert_eq!(out.vectors.len(), 3);
        // Deterministic: same text yields same mock vector
        let again = embedder.embed_batch(&texts).await;
        assert_eq!(out.vectors, again.vectors);
    }
}
