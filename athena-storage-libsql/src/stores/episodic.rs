//! libSQL episodic store.

use super::{from_millis, parse_json, parse_uuid, parse_uuid_opt, to_json, to_millis};
use crate::pool::DbPool;
use crate::vector::{decode_vector, encode_vector};
use athena_core::episodic::{
    AppendOutcome, BatchAppendOutcome, EpisodicEvent, EpisodicStore, EventFilter, TimeWindow,
};
use athena_core::error::{Error, Result};
use athena_core::types::{EventType, Lifecycle};
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Append-only event log over libSQL
pub struct LibsqlEpisodicStore {
    pool: Arc<DbPool>,
}

impl LibsqlEpisodicStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &libsql::Row) -> Result<EpisodicEvent> {
        let event_type_raw: String = row.get(4).map_err(crate::migrations::driver)?;
        let lifecycle_raw: String = row.get(10).map_err(crate::migrations::driver)?;
        let context_raw: String = row.get(6).map_err(crate::migrations::driver)?;
        let embedding_blob: Option<Vec<u8>> = row.get(8).map_err(crate::migrations::driver)?;
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let session_raw: Option<String> = row.get(2).map_err(crate::migrations::driver)?;
        let causality_raw: Option<String> = row.get(14).map_err(crate::migrations::driver)?;

        Ok(EpisodicEvent {
            id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            session_id: parse_uuid_opt(session_raw)?,
            source_id: row.get(3).map_err(crate::migrations::driver)?,
            event_type: EventType::parse(&event_type_raw)
                .ok_or_else(|| Error::Storage(format!("unknown event type '{event_type_raw}'")))?,
            content: row.get(5).map_err(crate::migrations::driver)?,
            structured_context: parse_json(&context_raw)?,
            content_hash: row.get(7).map_err(crate::migrations::driver)?,
            embedding: embedding_blob.as_deref().map(decode_vector).transpose()?,
            timestamp: from_millis(row.get(9).map_err(crate::migrations::driver)?),
            lifecycle: Lifecycle::parse(&lifecycle_raw)
                .ok_or_else(|| Error::Storage(format!("unknown lifecycle '{lifecycle_raw}'")))?,
            importance: row.get::<f64>(11).map_err(crate::migrations::driver)? as f32,
            actionability: row.get::<f64>(12).map_err(crate::migrations::driver)? as f32,
            context_completeness: row.get::<f64>(13).map_err(crate::migrations::driver)? as f32,
            causality_parent: parse_uuid_opt(causality_raw)?,
            created_at: from_millis(row.get(15).map_err(crate::migrations::driver)?),
            updated_at: from_millis(row.get(16).map_err(crate::migrations::driver)?),
        })
    }

    const SELECT_COLUMNS: &'static str = "id, project_id, session_id, source_id, event_type, \
         content, structured_context, content_hash, embedding, timestamp, lifecycle, importance, \
         actionability, context_completeness, causality_parent, created_at, updated_at";

    async fn insert_event(
        tx: &libsql::Transaction,
        event: &EpisodicEvent,
    ) -> Result<AppendOutcome> {
        // Dedup through the hash index first
        let mut existing = tx
            .query(
                "SELECT event_id FROM event_hashes WHERE project_id = ? AND content_hash = ?",
                params![event.project_id.clone(), event.content_hash.clone()],
            )
            .await
            .map_err(crate::migrations::driver)?;
        if let Some(row) = existing.next().await.map_err(crate::migrations::driver)? {
            let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
            return Ok(AppendOutcome {
                id: parse_uuid(&id_raw)?,
                inserted: false,
            });
        }

        tx.execute(
            "INSERT INTO episodic_events (id, project_id, session_id, source_id, event_type, \
             content, structured_context, content_hash, embedding, timestamp, lifecycle, \
             importance, actionability, context_completeness, causality_parent, created_at, \
             updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.id.to_string(),
                event.project_id.clone(),
                event.session_id.map(|s| s.to_string()),
                event.source_id.clone(),
                event.event_type.as_str(),
                event.content.clone(),
                to_json(&event.structured_context)?,
                event.content_hash.clone(),
                event.embedding.as_deref().map(encode_vector),
                to_millis(event.timestamp),
                event.lifecycle.as_str(),
                f64::from(event.importance),
                f64::from(event.actionability),
                f64::from(event.context_completeness),
                event.causality_parent.map(|c| c.to_string()),
                to_millis(event.created_at),
                to_millis(event.updated_at),
            ],
        )
        .await
        .map_err(crate::migrations::driver)?;

        tx.execute(
            "INSERT INTO event_hashes (project_id, content_hash, event_id, first_seen_at) \
             VALUES (?, ?, ?, ?)",
            params![
                event.project_id.clone(),
                event.content_hash.clone(),
                event.id.to_string(),
                to_millis(Utc::now()),
            ],
        )
        .await
        .map_err(crate::migrations::driver)?;

        Ok(AppendOutcome {
            id: event.id,
            inserted: true,
        })
    }

    fn filter_clauses(filter: &EventFilter) -> (String, Vec<libsql::Value>) {
        let mut clauses = String::new();
        let mut values: Vec<libsql::Value> = Vec::new();
        if !filter.event_types.is_empty() {
            let placeholders = vec!["?"; filter.event_types.len()].join(", ");
            clauses.push_str(&format!(" AND event_type IN ({placeholders})"));
            for ty in &filter.event_types {
                values.push(libsql::Value::Text(ty.as_str().to_string()));
            }
        }
        if let Some(session) = filter.session_id {
            clauses.push_str(" AND session_id = ?");
            values.push(libsql::Value::Text(session.to_string()));
        }
        if let Some(ref source) = filter.source_id {
            clauses.push_str(" AND source_id = ?");
            values.push(libsql::Value::Text(source.clone()));
        }
        if let Some(lifecycle) = filter.lifecycle {
            clauses.push_str(" AND lifecycle = ?");
            values.push(libsql::Value::Text(lifecycle.as_str().to_string()));
        }
        if let Some(since) = filter.since {
            clauses.push_str(" AND timestamp >= ?");
            values.push(libsql::Value::Integer(to_millis(since)));
        }
        if let Some(until) = filter.until {
            clauses.push_str(" AND timestamp <= ?");
            values.push(libsql::Value::Integer(to_millis(until)));
        }
        (clauses, values)
    }
}

#[async_trait]
impl EpisodicStore for LibsqlEpisodicStore {
    async fn append(&self, event: EpisodicEvent) -> Result<AppendOutcome> {
        event.validate()?;
        let conn = self.pool.acquire().await?;
        let tx = conn.transaction().await?;
        let outcome = Self::insert_event(&tx, &event).await?;
        tx.commit().await.map_err(crate::migrations::driver)?;
        Ok(outcome)
    }

    async fn append_batch(&self, batch: Vec<EpisodicEvent>) -> Result<BatchAppendOutcome> {
        for event in &batch {
            event.validate()?;
        }
        let conn = self.pool.acquire().await?;
        let tx = conn.transaction().await?;
        let mut outcome = BatchAppendOutcome::default();
        for event in &batch {
            let result = Self::insert_event(&tx, event).await?;
            outcome.ids.push(result.id);
            if result.inserted {
                outcome.inserted += 1;
            } else {
                outcome.skipped_duplicate += 1;
            }
        }
        tx.commit().await.map_err(crate::migrations::driver)?;
        debug!(
            "Batch append: {} inserted, {} duplicates",
            outcome.inserted, outcome.skipped_duplicate
        );
        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> Result<Option<EpisodicEvent>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM episodic_events WHERE id = ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(Some(Self::row_to_event(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        project_id: &str,
        filter: &EventFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let conn = self.pool.acquire().await?;
        let (clauses, mut values) = Self::filter_clauses(filter);
        let sql = format!(
            "SELECT {} FROM episodic_events WHERE project_id = ?{clauses} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            Self::SELECT_COLUMNS
        );
        let mut all_values = vec![libsql::Value::Text(project_id.to_string())];
        all_values.append(&mut values);
        all_values.push(libsql::Value::Integer(limit as i64));
        all_values.push(libsql::Value::Integer(offset as i64));

        let mut rows = conn
            .query(&sql, libsql::params_from_iter(all_values))
            .await?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            events.push(Self::row_to_event(&row)?);
        }
        Ok(events)
    }

    async fn recall_temporal(
        &self,
        project_id: &str,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let filter = EventFilter {
            since: Some(window.start),
            until: Some(window.end),
            ..Default::default()
        };
        self.list(project_id, &filter, limit, 0).await
    }

    async fn mark_lifecycle(&self, ids: &[Uuid], new_state: Lifecycle) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.pool.acquire().await?;
        let tx = conn.transaction().await?;

        for id in ids {
            let mut rows = tx
                .query(
                    "SELECT lifecycle FROM episodic_events WHERE id = ?",
                    params![id.to_string()],
                )
                .await
                .map_err(crate::migrations::driver)?;
            let row = rows
                .next()
                .await
                .map_err(crate::migrations::driver)?
                .ok_or(Error::NotFound(*id))?;
            let current_raw: String = row.get(0).map_err(crate::migrations::driver)?;
            let current = Lifecycle::parse(&current_raw)
                .ok_or_else(|| Error::Storage(format!("unknown lifecycle '{current_raw}'")))?;
            if current != new_state && !current.can_transition_to(new_state) {
                return Err(Error::InvalidLifecycleTransition {
                    from: current.to_string(),
                    to: new_state.to_string(),
                });
            }
        }

        let now = to_millis(Utc::now());
        for id in ids {
            tx.execute(
                "UPDATE episodic_events SET lifecycle = ?, updated_at = ? WHERE id = ?",
                params![new_state.as_str(), now, id.to_string()],
            )
            .await
            .map_err(crate::migrations::driver)?;
        }
        tx.commit().await.map_err(crate::migrations::driver)?;
        Ok(())
    }

    async fn link_causality(&self, parent: Uuid, child: Uuid) -> Result<()> {
        if parent == child {
            return Err(Error::InvalidInput("event cannot cause itself".into()));
        }
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM episodic_events WHERE id IN (?, ?)",
                params![parent.to_string(), child.to_string()],
            )
            .await?;
        let row = rows
            .next()
            .await
            .map_err(crate::migrations::driver)?
            .ok_or_else(|| Error::Storage("count query returned no rows".into()))?;
        let count: i64 = row.get(0).map_err(crate::migrations::driver)?;
        if count != 2 {
            return Err(Error::NotFound(child));
        }

        conn.execute(
            "UPDATE episodic_events SET causality_parent = ?, updated_at = ? WHERE id = ?",
            params![
                parent.to_string(),
                to_millis(Utc::now()),
                child.to_string()
            ],
        )
        .await?;
        Ok(())
    }

    async fn count(&self, project_id: &str, filter: &EventFilter) -> Result<usize> {
        let conn = self.pool.acquire().await?;
        let (clauses, mut values) = Self::filter_clauses(filter);
        let sql =
            format!("SELECT COUNT(*) FROM episodic_events WHERE project_id = ?{clauses}");
        let mut all_values = vec![libsql::Value::Text(project_id.to_string())];
        all_values.append(&mut values);

        let mut rows = conn
            .query(&sql, libsql::params_from_iter(all_values))
            .await?;
        let row = rows
            .next()
            .await
            .map_err(crate::migrations::driver)?
            .ok_or_else(|| Error::Storage("count query returned no rows".into()))?;
        let count: i64 = row.get(0).map_err(crate::migrations::driver)?;
        Ok(count as usize)
    }

    async fn claim_for_consolidation(
        &self,
        project_id: &str,
        window: TimeWindow,
        max_events: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let conn = self.pool.acquire().await?;
        let tx = conn.transaction().await?;

        let sql = format!(
            "SELECT {} FROM episodic_events WHERE project_id = ? AND lifecycle = 'active' \
             AND timestamp >= ? AND timestamp <= ? ORDER BY timestamp ASC, id ASC LIMIT ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = tx
            .query(
                &sql,
                params![
                    project_id,
                    to_millis(window.start),
                    to_millis(window.end),
                    max_events as i64
                ],
            )
            .await
            .map_err(crate::migrations::driver)?;

        let mut snapshot = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            snapshot.push(Self::row_to_event(&row)?);
        }

        let now = to_millis(Utc::now());
        for event in &mut snapshot {
            tx.execute(
                "UPDATE episodic_events SET lifecycle = 'consolidating', updated_at = ? \
                 WHERE id = ?",
                params![now, event.id.to_string()],
            )
            .await
            .map_err(crate::migrations::driver)?;
            event.lifecycle = Lifecycle::Consolidating;
        }
        tx.commit().await.map_err(crate::migrations::driver)?;
        Ok(snapshot)
    }

    async fn existing_hashes(&self, project_id: &str, hashes: &[String]) -> Result<Vec<String>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.acquire().await?;
        let placeholders = vec!["?"; hashes.len()].join(", ");
        let sql = format!(
            "SELECT content_hash FROM event_hashes WHERE project_id = ? \
             AND content_hash IN ({placeholders})"
        );
        let mut values = vec![libsql::Value::Text(project_id.to_string())];
        values.extend(hashes.iter().map(|h| libsql::Value::Text(h.clone())));

        let mut rows = conn.query(&sql, libsql::params_from_iter(values)).await?;
        let mut found = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            found.push(row.get(0).map_err(crate::migrations::driver)?);
        }
        Ok(found)
    }
}
