//! # Semantic Store
//!
//! Durable, de-duplicated knowledge consolidated from events. Rows carry
//! both content and an embedding; search blends vector similarity, lexical
//! relevance, and keyword boosting over one candidate pool.

use crate::error::{Error, Result};
use crate::search::{keyword_boost, Bm25Scorer, HybridScorer, HybridWeights};
use crate::types::{ConsolidationState, MemoryType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A durable knowledge item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMemory {
    pub id: Uuid,
    pub project_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub memory_type: MemoryType,
    /// Episodic event ids this memory was consolidated from
    pub provenance: BTreeSet<Uuid>,
    pub confidence: f32,
    pub consolidation_state: ConsolidationState,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SemanticMemory {
    /// Create an unconsolidated memory (direct store path)
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        content: impl Into<String>,
        memory_type: MemoryType,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            content: content.into(),
            embedding,
            memory_type,
            provenance: BTreeSet::new(),
            confidence: 0.5,
            consolidation_state: ConsolidationState::Unconsolidated,
            last_accessed: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate invariants before storage.
    ///
    /// A consolidated memory must carry non-empty provenance; embeddings
    /// must match the configured dimension.
    pub fn validate(&self, expected_dimension: usize) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::InvalidInput("semantic content is empty".into()));
        }
        if self.embedding.len() != expected_dimension {
            return Err(Error::DimensionMismatch {
                expected: expected_dimension,
                actual: self.embedding.len(),
            });
        }
        if self.consolidation_state == ConsolidationState::Consolidated
            && self.provenance.is_empty()
        {
            return Err(Error::InvalidInput(
                "consolidated semantic memory requires provenance".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidInput("confidence out of [0, 1]".into()));
        }
        Ok(())
    }
}

/// Parameters for hybrid search
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub limit: usize,
    pub min_similarity: f32,
    pub weights: HybridWeights,
    /// Restrict to these memory types; empty means all
    pub memory_types: Vec<MemoryType>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: 10,
            min_similarity: 0.3,
            weights: HybridWeights::default(),
            memory_types: Vec::new(),
        }
    }
}

/// A search hit with its blended score
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub memory: SemanticMemory,
    pub score: f32,
}

/// Rank a candidate pool for a query.
///
/// Shared by every backend so scoring semantics cannot drift: cosine on the
/// embedding, min-max-normalized BM25 on content, fuzzy keyword boost,
/// blended by the configured weights. Ties break on confidence, then the
/// more recently accessed row.
#[must_use]
pub fn rank_candidates(
    query: &str,
    query_embedding: &[f32],
    candidates: Vec<SemanticMemory>,
    params: &SearchParams,
) -> Vec<SemanticHit> {
    let pool: Vec<SemanticMemory> = candidates
        .into_iter()
        .filter(|m| params.memory_types.is_empty() || params.memory_types.contains(&m.memory_type))
        .collect();
    if pool.is_empty() {
        return Vec::new();
    }

    let contents: Vec<&str> = pool.iter().map(|m| m.content.as_str()).collect();
    let lexical = Bm25Scorer::new(&contents).score_all_normalized(query);

    let scorer = HybridScorer::new(params.weights);
    let mut hits: Vec<SemanticHit> = pool
        .into_iter()
        .zip(lexical)
        .map(|(memory, lex)| {
            let vec_score = crate::embed::cosine_similarity(query_embedding, &memory.embedding);
            let boost = keyword_boost(query, &memory.content);
            let score = scorer.blend(vec_score.max(0.0), lex, boost);
            SemanticHit { memory, score }
        })
        .filter(|hit| hit.score >= params.min_similarity)
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.memory
                    .confidence
                    .partial_cmp(&a.memory.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.memory.last_accessed.cmp(&a.memory.last_accessed))
    });
    hits.truncate(params.limit);
    hits
}

/// Filter for counting semantic memories
#[derive(Debug, Clone, Default)]
pub struct SemanticFilter {
    pub memory_type: Option<MemoryType>,
    pub consolidation_state: Option<ConsolidationState>,
}

/// Storage interface for the semantic layer
#[async_trait]
pub trait SemanticStore: Send + Sync {
    /// Insert or replace by id
    async fn upsert(&self, memory: SemanticMemory) -> Result<()>;

    /// Delete by id; the caller enforces provenance protection
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Hybrid search; implementations refresh `last_accessed` on returned rows
    async fn search(
        &self,
        project_id: &str,
        query: &str,
        query_embedding: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<SemanticHit>>;

    /// Fetch specific rows
    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<SemanticMemory>>;

    /// Count rows matching a filter
    async fn count(&self, project_id: &str, filter: &SemanticFilter) -> Result<usize>;

    /// Find a memory whose provenance contains the given event id, other
    /// than `excluding`; used by `forget` to protect provenance
    async fn referencing_provenance(
        &self,
        project_id: &str,
        event_ids: &[Uuid],
        excluding: Uuid,
    ) -> Result<Vec<Uuid>>;

    /// All memories in a project (candidate pool for novelty checks)
    async fn list_all(&self, project_id: &str, limit: usize) -> Result<Vec<SemanticMemory>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;

    fn memory_with(content: &str, embedding: Vec<f32>) -> SemanticMemory {
        SemanticMemory::new("proj", content, MemoryType::Fact, embedding)
    }

    #[test]
    fn test_consolidated_requires_provenance() {
        let mut memory = memory_with("db pool exhaustion causes timeouts", vec![0.0; 8]);
        memory.consolidation_state = ConsolidationState::Consolidated;
        assert!(memory.validate(8).is_err());

        memory.provenance.insert(Uuid::new_v4());
        assert!(memory.validate(8).is_ok());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let memory = memory_with("anything", vec![0.0; 4]);
        let err = memory.validate(8).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 8, actual: 4 }));
    }

    #[test]
    fn test_rank_prefers_matching_content() {
        let embedder = MockEmbedder::new(64);
        let query = "database connection error";
        let query_vec = embedder.generate(query);

        let candidates = vec![
            memory_with("database connection error seen repeatedly", embedder.generate("database connection error seen repeatedly")),
            memory_with("weather is sunny today", embedder.generate("weather is sunny today")),
        ];
        let hits = rank_candidates(query, &query_vec, candidates, &SearchParams {
            min_similarity: 0.0,
            ..Default::default()
        });
        assert_eq!(hits.len(), 2);
        assert!(hits[0].memory.content.contains("database"));
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_rank_drops_below_min_similarity() {
        let embedder = MockEmbedder::new(64);
        let query_vec = embedder.generate("kubernetes ingress");
        let candidates = vec![memory_with("pasta recipe with basil", embedder.generate("pasta recipe with basil"))];
        let hits = rank_candidates("kubernetes ingress", &query_vec, candidates, &SearchParams {
            min_similarity: 0.5,
            ..Default::default()
        });
        assert!(hits.is_empty());
    }

    #[test]
    fn test_rank_tie_break_on_confidence() {
        // Identical content and embedding: blended scores tie exactly
        let embedding = vec![0.5f32; 16];
        let mut low = memory_with("same content", embedding.clone());
        low.confidence = 0.2;
        let mut high = memory_with("same content", embedding.clone());
        high.confidence = 0.9;

        let hits = rank_candidates(
            "same content",
            &embedding,
            vec![low, high],
            &SearchParams {
                min_similarity: 0.0,
                ..Default::default()
            },
        );
        assert!((hits[0].memory.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_type_filter() {
        let embedding = vec![0.5f32; 8];
        let mut rule = memory_with("always retry transient errors", embedding.clone());
        rule.memory_type = MemoryType::Rule;
        let fact = memory_with("retry transient errors worked", embedding.clone());

        let params = SearchParams {
            min_similarity: 0.0,
            memory_types: vec![MemoryType::Rule],
            ..Default::default()
        };
        let hits = rank_candidates("retry transient", &embedding, vec![rule, fact], &params);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.memory_type, MemoryType::Rule);
    }
}
