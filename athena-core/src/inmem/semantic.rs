//! In-memory semantic store.

use crate::error::Result;
use crate::semantic::{
    rank_candidates, SearchParams, SemanticFilter, SemanticHit, SemanticMemory, SemanticStore,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Semantic rows held in process memory
pub struct InMemorySemanticStore {
    rows: RwLock<HashMap<Uuid, SemanticMemory>>,
    dimension: usize,
}

impl InMemorySemanticStore {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            dimension,
        }
    }
}

#[async_trait]
impl SemanticStore for InMemorySemanticStore {
    async fn upsert(&self, mut memory: SemanticMemory) -> Result<()> {
        memory.validate(self.dimension)?;
        memory.updated_at = Utc::now();
        self.rows.write().insert(memory.id, memory);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.rows.write().remove(&id).is_some())
    }

    async fn search(
        &self,
        project_id: &str,
        query: &str,
        query_embedding: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<SemanticHit>> {
        let candidates: Vec<SemanticMemory> = {
            let rows = self.rows.read();
            rows.values()
                .filter(|m| m.project_id == project_id)
                .cloned()
                .collect()
        };
        let hits = rank_candidates(query, query_embedding, candidates, params);

        // Reads refresh last_accessed on the returned rows
        let now = Utc::now();
        let mut rows = self.rows.write();
        for hit in &hits {
            if let Some(row) = rows.get_mut(&hit.memory.id) {
                row.last_accessed = now;
            }
        }
        Ok(hits)
    }

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<SemanticMemory>> {
        let rows = self.rows.read();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn count(&self, project_id: &str, filter: &SemanticFilter) -> Result<usize> {
        let rows = self.rows.read();
        Ok(rows
            .values()
            .filter(|m| {
                m.project_id == project_id
                    && filter.memory_type.is_none_or(|t| m.memory_type == t)
                    && filter
                        .consolidation_state
                        .is_none_or(|s| m.consolidation_state == s)
            })
            .count())
    }

    async fn referencing_provenance(
        &self,
        project_id: &str,
        event_ids: &[Uuid],
        excluding: Uuid,
    ) -> Result<Vec<Uuid>> {
        let rows = self.rows.read();
        Ok(rows
            .values()
            .filter(|m| {
                m.project_id == project_id
                    && m.id != excluding
                    && event_ids.iter().any(|id| m.provenance.contains(id))
            })
            .map(|m| m.id)
            .collect())
    }

    async fn list_all(&self, project_id: &str, limit: usize) -> Result<Vec<SemanticMemory>> {
        let rows = self.rows.read();
        let mut all: Vec<SemanticMemory> = rows
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;
    use crate::error::Error;
    use crate::types::{ConsolidationState, MemoryType};

    fn store64() -> InMemorySemanticStore {
        InMemorySemanticStore::new(64)
    }

    #[tokio::test]
    async fn test_upsert_validates_dimension() {
        let store = InMemorySemanticStore::new(64);
        let memory = SemanticMemory::new("proj", "text", MemoryType::Fact, vec![0.0; 32]);
        let err = store.upsert(memory).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_search_refreshes_last_accessed() {
        let embedder = MockEmbedder::new(64);
        let store = store64();
        let memory = SemanticMemory::new(
            "proj",
            "database pool exhaustion",
            MemoryType::Fact,
            embedder.generate("database pool exhaustion"),
        );
        let id = memory.id;
        let before = memory.last_accessed;
        store.upsert(memory).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let hits = store
            .search(
                "proj",
                "database pool",
                &embedder.generate("database pool"),
                &SearchParams {
                    min_similarity: 0.0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let row = store.fetch_by_ids(&[id]).await.unwrap().remove(0);
        assert!(row.last_accessed > before);
    }

    #[tokio::test]
    async fn test_referencing_provenance_excludes_self() {
        let embedder = MockEmbedder::new(64);
        let store = store64();
        let event = Uuid::new_v4();

        let mut first = SemanticMemory::new("proj", "one", MemoryType::Fact, vec![0.1; 64]);
        first.provenance.insert(event);
        first.consolidation_state = ConsolidationState::Consolidated;
        let first_id = first.id;

        let mut second = SemanticMemory::new("proj", "two", MemoryType::Fact, vec![0.1; 64]);
        second.provenance.insert(event);
        second.consolidation_state = ConsolidationState::Consolidated;
        let second_id = second.id;

        store.upsert(first).await.unwrap();
        store.upsert(second).await.unwrap();

        let refs = store
            .referencing_provenance("proj", &[event], first_id)
            .await
            .unwrap();
        assert_eq!(refs, vec![second_id]);
    }

    #[tokio::test]
    async fn test_count_by_filter() {
        let store = InMemorySemanticStore::new(8);
        let mut pattern = SemanticMemory::new("proj", "p", MemoryType::Pattern, vec![0.0; 8]);
        pattern.confidence = 0.9;
        store.upsert(pattern).await.unwrap();
        store
            .upsert(SemanticMemory::new("proj", "f", MemoryType::Fact, vec![0.0; 8]))
            .await
            .unwrap();

        let all = store.count("proj", &SemanticFilter::default()).await.unwrap();
        assert_eq!(all, 2);
        let patterns = store
            .count(
                "proj",
                &SemanticFilter {
                    memory_type: Some(MemoryType::Pattern),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patterns, 1);
    }
}
