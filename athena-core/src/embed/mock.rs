//! Deterministic mock embedding provider.
//!
//! Produces hash-derived unit vectors of the configured dimension. Identical
//! text always yields the identical vector, which is what the dedup and
//! idempotence tests rely on. Not semantic; production deployments should
//! configure a real provider and keep this as the degraded fallback.

use super::{normalize_vector, EmbeddingProvider};
use crate::error::Result;
use async_trait::async_trait;

/// Mock provider generating deterministic hash-derived embeddings
pub struct MockEmbedder {
    dimension: usize,
    batch_max: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_max: 64,
        }
    }

    #[must_use]
    pub fn with_batch_max(mut self, batch_max: usize) -> Self {
        self.batch_max = batch_max.max(1);
        self
    }

    /// Generate a deterministic embedding from the text hash
    #[must_use]
    pub fn generate(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        let mut seed = hash;

        for _ in 0..self.dimension {
            // Simple LCG over the text hash
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let value = ((seed >> 16) as f32) / 32768.0 - 1.0;
            embedding.push(value);
        }

        normalize_vector(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.generate(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_max(&self) -> usize {
        self.batch_max
    }

    fn name(&self) -> &str {
        "mock"
    }
}
