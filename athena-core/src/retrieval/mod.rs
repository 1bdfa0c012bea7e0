//! # Retrieval Planner
//!
//! Cascading, tier-selected recall across memory layers: fast parallel
//! probes (Tier 1), hybrid re-ranking with attention weighting and working
//! memory (Tier 2), and LLM reranking (Tier 3). Results are merged,
//! deduplicated, and served from an invalidating cache when possible.

mod cache;
mod expansion;
mod planner;

pub use cache::{RecallCache, RecallCacheKey, RecallCacheMetrics};
pub use expansion::{QueryExpander, EXPANSION_CACHE_SIZE, MAX_PARAPHRASES};
pub use planner::RetrievalPlanner;

use crate::types::MemoryLayer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Session bias applied to the query (task and phase of the caller)
#[derive(Debug, Clone, Default)]
pub struct SessionHint {
    pub task: Option<String>,
    pub phase: Option<String>,
}

/// Options for one recall call
#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub project_id: String,
    pub k: usize,
    pub min_similarity: Option<f32>,
    /// 1 = fast probes only, 2 = hybrid re-rank, 3 = force LLM rerank
    pub cascade_depth: u8,
    /// Restrict to these layers; empty means all
    pub layers: Vec<MemoryLayer>,
    pub session: Option<SessionHint>,
    pub expand_queries: Option<bool>,
    pub rerank: Option<bool>,
}

impl RecallOptions {
    #[must_use]
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            k: 0,
            min_similarity: None,
            cascade_depth: 2,
            layers: Vec::new(),
            session: None,
            expand_queries: None,
            rerank: None,
        }
    }

    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: u8) -> Self {
        self.cascade_depth = depth.clamp(1, 3);
        self
    }
}

/// One recalled item with its origin and score
#[derive(Debug, Clone, Serialize)]
pub struct RecallItem {
    pub layer: MemoryLayer,
    pub id: Uuid,
    pub content: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
    /// Verification inputs carried alongside the item
    pub consolidated_semantic: bool,
    pub provenance_count: usize,
    pub vector_len: Option<usize>,
    pub durable: bool,
    pub age_seconds: Option<i64>,
}

/// Output of one recall call, before verification
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecallOutput {
    pub results: Vec<RecallItem>,
    /// Last fully completed tier
    pub used_tier: u8,
    pub cache_hit: bool,
    pub degraded: bool,
    pub expanded_queries: Vec<String>,
}

/// Cross-layer weight used when the same content surfaces in two layers
#[must_use]
pub fn layer_weight(layer: MemoryLayer) -> f32 {
    match layer {
        MemoryLayer::Semantic => 1.0,
        MemoryLayer::Episodic => 0.9,
        MemoryLayer::Procedural => 0.85,
        MemoryLayer::Working => 0.8,
        MemoryLayer::Graph => 0.75,
        MemoryLayer::Prospective => 0.7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_clamped() {
        assert_eq!(RecallOptions::for_project("p").with_depth(0).cascade_depth, 1);
        assert_eq!(RecallOptions::for_project("p").with_depth(9).cascade_depth, 3);
    }

    #[test]
    fn test_semantic_outweighs_other_layers() {
        for layer in MemoryLayer::ALL {
            assert!(layer_weight(MemoryLayer::Semantic) >= layer_weight(layer));
        }
    }
}
