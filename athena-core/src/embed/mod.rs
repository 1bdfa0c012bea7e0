//! # Embedding Client
//!
//! Text to fixed-dimension vector conversion for semantic search.
//!
//! The engine talks to a single [`EmbeddingProvider`]; the provider chosen at
//! initialization fixes the dimension for the lifetime of the store. When a
//! provider fails, [`FallbackEmbedder`] substitutes deterministic hash-derived
//! vectors and marks the result degraded so callers can down-weight it.

mod fallback;
mod mock;

pub use fallback::FallbackEmbedder;
pub use mock::MockEmbedder;

use crate::error::Result;
use async_trait::async_trait;

/// Health report for an embedding provider
#[derive(Debug, Clone)]
pub struct EmbedHealth {
    pub available: bool,
    pub dimension: usize,
    pub provider: String,
}

/// Result of an embedding call, carrying the degradation flag
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vectors: Vec<Vec<f32>>,
    /// True when the provider failed and mock vectors were substituted
    pub degraded: bool,
}

/// Provider interface for embedding generation
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts; implementations may assume the batch fits
    /// within [`EmbeddingProvider::batch_max`]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension
    fn dimension(&self) -> usize;

    /// Provider-declared maximum batch size
    fn batch_max(&self) -> usize {
        64
    }

    /// Provider name for health reporting
    fn name(&self) -> &str;

    /// Liveness probe
    async fn health(&self) -> EmbedHealth {
        EmbedHealth {
            available: true,
            dimension: self.dimension(),
            provider: self.name().to_string(),
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Normalize a vector to unit length in place; zero vectors pass through
#[must_use]
pub fn normalize_vector(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.5, 0.5, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_normalize_vector() {
        let v = normalize_vector(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let v = normalize_vector(vec![0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
