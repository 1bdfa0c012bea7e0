//! libSQL session and cursor stores.

use super::{from_millis, parse_json, parse_uuid, to_json, to_millis};
use crate::pool::DbPool;
use athena_core::error::{Error, Result};
use athena_core::ingest::{CursorStore, IngestionCursor};
use athena_core::session::{SessionContext, SessionStore};
use athena_core::types::TaskPhase;
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use std::sync::Arc;
use uuid::Uuid;

/// Session records over libSQL
pub struct LibsqlSessionStore {
    pool: Arc<DbPool>,
}

impl LibsqlSessionStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &libsql::Row) -> Result<SessionContext> {
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let phase_raw: Option<String> = row.get(3).map_err(crate::migrations::driver)?;
        let ended: Option<i64> = row.get(5).map_err(crate::migrations::driver)?;
        let event_ids_raw: String = row.get(6).map_err(crate::migrations::driver)?;
        let event_ids: Vec<String> = parse_json(&event_ids_raw)?;

        Ok(SessionContext {
            session_id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            task: row.get(2).map_err(crate::migrations::driver)?,
            phase: phase_raw.as_deref().and_then(TaskPhase::parse),
            started_at: from_millis(row.get(4).map_err(crate::migrations::driver)?),
            ended_at: ended.map(from_millis),
            event_ids: event_ids
                .iter()
                .map(|s| parse_uuid(s))
                .collect::<Result<Vec<Uuid>>>()?,
        })
    }

    async fn write(&self, session: &SessionContext) -> Result<()> {
        let event_ids: Vec<String> = session.event_ids.iter().map(Uuid::to_string).collect();
        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions (session_id, project_id, task, phase, started_at, \
             ended_at, event_ids) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                session.session_id.to_string(),
                session.project_id.clone(),
                session.task.clone(),
                session.phase.map(|p| p.as_str()),
                to_millis(session.started_at),
                session.ended_at.map(to_millis),
                to_json(&event_ids)?,
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for LibsqlSessionStore {
    async fn create(&self, session: SessionContext) -> Result<()> {
        self.write(&session).await
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<SessionContext>> {
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT session_id, project_id, task, phase, started_at, ended_at, event_ids \
                 FROM sessions WHERE session_id = ?",
                params![session_id.to_string()],
            )
            .await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(Some(Self::row_to_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, session: SessionContext) -> Result<()> {
        if self.get(session.session_id).await?.is_none() {
            return Err(Error::NotFound(session.session_id));
        }
        self.write(&session).await
    }

    async fn list_active(&self, project_id: &str) -> Result<Vec<SessionContext>> {
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT session_id, project_id, task, phase, started_at, ended_at, event_ids \
                 FROM sessions WHERE project_id = ? AND ended_at IS NULL ORDER BY started_at ASC",
                params![project_id],
            )
            .await?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            sessions.push(Self::row_to_session(&row)?);
        }
        Ok(sessions)
    }
}

/// Ingestion cursors over libSQL
pub struct LibsqlCursorStore {
    pool: Arc<DbPool>,
}

impl LibsqlCursorStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for LibsqlCursorStore {
    async fn get_cursor(&self, source_id: &str) -> Result<Option<IngestionCursor>> {
        let conn = self.pool.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT cursor_blob, updated_at FROM ingestion_cursors WHERE source_id = ?",
                params![source_id],
            )
            .await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(Some(IngestionCursor {
                source_id: source_id.to_string(),
                cursor_blob: row.get(0).map_err(crate::migrations::driver)?,
                updated_at: from_millis(row.get(1).map_err(crate::migrations::driver)?),
            })),
            None => Ok(None),
        }
    }

    async fn set_cursor(&self, source_id: &str, cursor_blob: &str) -> Result<()> {
        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT OR REPLACE INTO ingestion_cursors (source_id, cursor_blob, updated_at) \
             VALUES (?, ?, ?)",
            params![source_id, cursor_blob, to_millis(Utc::now())],
        )
        .await?;
        Ok(())
    }
}
