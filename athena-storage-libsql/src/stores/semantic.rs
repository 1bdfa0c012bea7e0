//! libSQL semantic store.
//!
//! Candidate pools are fetched by project through the index and ranked
//! in-process with the shared hybrid scorer, so scoring semantics are
//! identical to the in-memory backend.

use super::{from_millis, parse_json, parse_uuid, to_json, to_millis};
use crate::pool::DbPool;
use crate::vector::{decode_vector, encode_vector};
use athena_core::error::{Error, Result};
use athena_core::semantic::{
    rank_candidates, SearchParams, SemanticFilter, SemanticHit, SemanticMemory, SemanticStore,
};
use athena_core::types::{ConsolidationState, MemoryType};
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Candidate pool bound for one search
const CANDIDATE_POOL: usize = 512;

/// Semantic memories over libSQL
pub struct LibsqlSemanticStore {
    pool: Arc<DbPool>,
    dimension: usize,
}

impl LibsqlSemanticStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    fn row_to_memory(row: &libsql::Row) -> Result<SemanticMemory> {
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let embedding_blob: Vec<u8> = row.get(3).map_err(crate::migrations::driver)?;
        let type_raw: String = row.get(4).map_err(crate::migrations::driver)?;
        let provenance_raw: String = row.get(5).map_err(crate::migrations::driver)?;
        let state_raw: String = row.get(7).map_err(crate::migrations::driver)?;
        let provenance_ids: Vec<String> = parse_json(&provenance_raw)?;

        Ok(SemanticMemory {
            id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            content: row.get(2).map_err(crate::migrations::driver)?,
            embedding: decode_vector(&embedding_blob)?,
            memory_type: MemoryType::parse(&type_raw)
                .ok_or_else(|| Error::Storage(format!("unknown memory type '{type_raw}'")))?,
            provenance: provenance_ids
                .iter()
                .map(|s| parse_uuid(s))
                .collect::<Result<BTreeSet<Uuid>>>()?,
            confidence: row.get::<f64>(6).map_err(crate::migrations::driver)? as f32,
            consolidation_state: ConsolidationState::parse(&state_raw).ok_or_else(|| {
                Error::Storage(format!("unknown consolidation state '{state_raw}'"))
            })?,
            last_accessed: from_millis(row.get(8).map_err(crate::migrations::driver)?),
            created_at: from_millis(row.get(9).map_err(crate::migrations::driver)?),
            updated_at: from_millis(row.get(10).map_err(crate::migrations::driver)?),
        })
    }

    const SELECT_COLUMNS: &'static str = "id, project_id, content, embedding, memory_type, \
         provenance, confidence, consolidation_state, last_accessed, created_at, updated_at";

    async fn fetch_project(&self, project_id: &str, limit: usize) -> Result<Vec<SemanticMemory>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM semantic_memories WHERE project_id = ? \
             ORDER BY updated_at DESC LIMIT ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id, limit as i64]).await?;
        let mut memories = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            memories.push(Self::row_to_memory(&row)?);
        }
        Ok(memories)
    }
}

#[async_trait]
impl SemanticStore for LibsqlSemanticStore {
    async fn upsert(&self, memory: SemanticMemory) -> Result<()> {
        memory.validate(self.dimension)?;
        let provenance: Vec<String> = memory.provenance.iter().map(Uuid::to_string).collect();
        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT OR REPLACE INTO semantic_memories (id, project_id, content, embedding, \
             memory_type, provenance, confidence, consolidation_state, last_accessed, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                memory.id.to_string(),
                memory.project_id.clone(),
                memory.content.clone(),
                encode_vector(&memory.embedding),
                memory.memory_type.as_str(),
                to_json(&provenance)?,
                f64::from(memory.confidence),
                memory.consolidation_state.as_str(),
                to_millis(memory.last_accessed),
                to_millis(memory.created_at),
                to_millis(Utc::now()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self.pool.acquire().await?;
        let affected = conn
            .execute(
                "DELETE FROM semantic_memories WHERE id = ?",
                params![id.to_string()],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn search(
        &self,
        project_id: &str,
        query: &str,
        query_embedding: &[f32],
        params_in: &SearchParams,
    ) -> Result<Vec<SemanticHit>> {
        let candidates = self.fetch_project(project_id, CANDIDATE_POOL).await?;
        let hits = rank_candidates(query, query_embedding, candidates, params_in);

        if !hits.is_empty() {
            let conn = self.pool.acquire().await?;
            let now = to_millis(Utc::now());
            for hit in &hits {
                conn.execute(
                    "UPDATE semantic_memories SET last_accessed = ? WHERE id = ?",
                    params![now, hit.memory.id.to_string()],
                )
                .await?;
            }
        }
        Ok(hits)
    }

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<SemanticMemory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.acquire().await?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM semantic_memories WHERE id IN ({placeholders})",
            Self::SELECT_COLUMNS
        );
        let values: Vec<libsql::Value> = ids
            .iter()
            .map(|id| libsql::Value::Text(id.to_string()))
            .collect();
        let mut rows = conn.query(&sql, libsql::params_from_iter(values)).await?;
        let mut memories = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            memories.push(Self::row_to_memory(&row)?);
        }
        Ok(memories)
    }

    async fn count(&self, project_id: &str, filter: &SemanticFilter) -> Result<usize> {
        let conn = self.pool.acquire().await?;
        let mut sql = "SELECT COUNT(*) FROM semantic_memories WHERE project_id = ?".to_string();
        let mut values = vec![libsql::Value::Text(project_id.to_string())];
        if let Some(memory_type) = filter.memory_type {
            sql.push_str(" AND memory_type = ?");
            values.push(libsql::Value::Text(memory_type.as_str().to_string()));
        }
        if let Some(state) = filter.consolidation_state {
            sql.push_str(" AND consolidation_state = ?");
            values.push(libsql::Value::Text(state.as_str().to_string()));
        }
        let mut rows = conn.query(&sql, libsql::params_from_iter(values)).await?;
        let row = rows
            .next()
            .await
            .map_err(crate::migrations::driver)?
            .ok_or_else(|| Error::Storage("count query returned no rows".into()))?;
        let count: i64 = row.get(0).map_err(crate::migrations::driver)?;
        Ok(count as usize)
    }

    async fn referencing_provenance(
        &self,
        project_id: &str,
        event_ids: &[Uuid],
        excluding: Uuid,
    ) -> Result<Vec<Uuid>> {
        // Provenance is a JSON array column; the candidate pool per project
        // is bounded, so the check scans rows in-process
        let candidates = self.fetch_project(project_id, CANDIDATE_POOL).await?;
        Ok(candidates
            .into_iter()
            .filter(|m| {
                m.id != excluding && event_ids.iter().any(|id| m.provenance.contains(id))
            })
            .map(|m| m.id)
            .collect())
    }

    async fn list_all(&self, project_id: &str, limit: usize) -> Result<Vec<SemanticMemory>> {
        self.fetch_project(project_id, limit).await
    }
}
