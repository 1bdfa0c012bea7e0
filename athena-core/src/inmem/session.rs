//! In-memory session and cursor stores.

use crate::error::{Error, Result};
use crate::ingest::{CursorStore, IngestionCursor};
use crate::session::{SessionContext, SessionStore};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Session records held in process memory
#[derive(Default)]
pub struct InMemorySessionStore {
    rows: RwLock<HashMap<Uuid, SessionContext>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: SessionContext) -> Result<()> {
        self.rows.write().insert(session.session_id, session);
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<SessionContext>> {
        Ok(self.rows.read().get(&session_id).cloned())
    }

    async fn update(&self, session: SessionContext) -> Result<()> {
        let mut rows = self.rows.write();
        if !rows.contains_key(&session.session_id) {
            return Err(Error::NotFound(session.session_id));
        }
        rows.insert(session.session_id, session);
        Ok(())
    }

    async fn list_active(&self, project_id: &str) -> Result<Vec<SessionContext>> {
        let rows = self.rows.read();
        let mut sessions: Vec<SessionContext> = rows
            .values()
            .filter(|s| s.project_id == project_id && s.is_active())
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }
}

/// Ingestion cursors held in process memory
#[derive(Default)]
pub struct InMemoryCursorStore {
    rows: RwLock<HashMap<String, IngestionCursor>>,
}

impl InMemoryCursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get_cursor(&self, source_id: &str) -> Result<Option<IngestionCursor>> {
        Ok(self.rows.read().get(source_id).cloned())
    }

    async fn set_cursor(&self, source_id: &str, cursor_blob: &str) -> Result<()> {
        self.rows.write().insert(
            source_id.to_string(),
            IngestionCursor {
                source_id: source_id.to_string(),
                cursor_blob: cursor_blob.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = InMemorySessionStore::new();
        let session = SessionContext::new("proj");
        let id = session.session_id;
        store.create(session).await.unwrap();

        let mut loaded = store.get(id).await.unwrap().unwrap();
        assert!(loaded.is_active());

        loaded.ended_at = Some(Utc::now());
        store.update(loaded).await.unwrap();
        assert!(store.list_active("proj").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_session_fails() {
        let store = InMemorySessionStore::new();
        let err = store.update(SessionContext::new("proj")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cursor_round_trip() {
        let store = InMemoryCursorStore::new();
        assert!(store.get_cursor("src").await.unwrap().is_none());

        store.set_cursor("src", "42").await.unwrap();
        let cursor = store.get_cursor("src").await.unwrap().unwrap();
        assert_eq!(cursor.cursor_blob, "42");

        store.set_cursor("src", "43").await.unwrap();
        let cursor = store.get_cursor("src").await.unwrap().unwrap();
        assert_eq!(cursor.cursor_blob, "43");
    }
}
