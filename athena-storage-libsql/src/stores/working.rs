//! libSQL working-memory store.

use super::{from_millis, parse_uuid, to_millis};
use crate::pool::DbPool;
use crate::vector::{decode_vector, encode_vector};
use athena_core::error::{Error, Result};
use athena_core::types::WmComponent;
use athena_core::working::{
    plan_insert, InsertPlan, WorkingMemoryItem, WorkingStore, ACTIVE_FLOOR, TARGET_CAPACITY,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use std::sync::Arc;
use uuid::Uuid;

/// Bounded activation set over libSQL
pub struct LibsqlWorkingStore {
    pool: Arc<DbPool>,
}

impl LibsqlWorkingStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    const SELECT_COLUMNS: &'static str =
        "id, project_id, content, component, activation, decay_rate, importance, last_accessed, \
         embedding";

    fn row_to_item(row: &libsql::Row) -> Result<WorkingMemoryItem> {
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let component_raw: String = row.get(3).map_err(crate::migrations::driver)?;
        let embedding_blob: Option<Vec<u8>> = row.get(8).map_err(crate::migrations::driver)?;
        Ok(WorkingMemoryItem {
            id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            content: row.get(2).map_err(crate::migrations::driver)?,
            component: WmComponent::parse(&component_raw)
                .ok_or_else(|| Error::Storage(format!("unknown component '{component_raw}'")))?,
            activation: row.get::<f64>(4).map_err(crate::migrations::driver)? as f32,
            decay_rate: row.get::<f64>(5).map_err(crate::migrations::driver)? as f32,
            importance: row.get::<f64>(6).map_err(crate::migrations::driver)? as f32,
            last_accessed: from_millis(row.get(7).map_err(crate::migrations::driver)?),
            embedding: embedding_blob.as_deref().map(decode_vector).transpose()?,
        })
    }

    async fn load_project(&self, project_id: &str) -> Result<Vec<WorkingMemoryItem>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM working_memory WHERE project_id = ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id]).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            items.push(Self::row_to_item(&row)?);
        }
        Ok(items)
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let conn = self.pool.acquire().await?;
        conn.execute(
            "DELETE FROM working_memory WHERE id = ?",
            params![id.to_string()],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkingStore for LibsqlWorkingStore {
    async fn insert(&self, item: WorkingMemoryItem, eviction_enabled: bool) -> Result<Uuid> {
        item.validate()?;
        let existing = self.load_project(&item.project_id).await?;

        match plan_insert(existing.len(), eviction_enabled) {
            InsertPlan::Insert => {}
            InsertPlan::EvictWeakestThenInsert => {
                let now = Utc::now();
                if let Some(weakest) = existing.iter().min_by(|a, b| {
                    a.current_activation(now)
                        .partial_cmp(&b.current_activation(now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                }) {
                    self.remove(weakest.id).await?;
                }
            }
            InsertPlan::Reject => return Err(Error::CapacityExceeded(item.project_id)),
        }

        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT INTO working_memory (id, project_id, content, component, activation, \
             decay_rate, importance, last_accessed, embedding) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id.to_string(),
                item.project_id.clone(),
                item.content.clone(),
                item.component.as_str(),
                f64::from(item.activation),
                f64::from(item.decay_rate),
                f64::from(item.importance),
                to_millis(item.last_accessed),
                item.embedding.as_deref().map(encode_vector),
            ],
        )
        .await?;
        Ok(item.id)
    }

    async fn touch(&self, id: Uuid) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM working_memory WHERE id = ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        let row = rows
            .next()
            .await
            .map_err(crate::migrations::driver)?
            .ok_or(Error::NotFound(id))?;
        let mut item = Self::row_to_item(&row)?;
        item.touch(Utc::now());

        conn.execute(
            "UPDATE working_memory SET activation = ?, last_accessed = ? WHERE id = ?",
            params![
                f64::from(item.activation),
                to_millis(item.last_accessed),
                id.to_string()
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_current(&self, project_id: &str) -> Result<Vec<WorkingMemoryItem>> {
        let now = Utc::now();
        let mut items = self.load_project(project_id).await?;
        items.sort_by(|a, b| {
            b.current_activation(now)
                .partial_cmp(&a.current_activation(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(items)
    }

    async fn evict_weakest(&self, project_id: &str) -> Result<Option<WorkingMemoryItem>> {
        let now = Utc::now();
        let items = self.load_project(project_id).await?;
        let weakest = items.into_iter().min_by(|a, b| {
            a.current_activation(now)
                .partial_cmp(&b.current_activation(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(ref item) = weakest {
            self.remove(item.id).await?;
        }
        Ok(weakest)
    }

    async fn apply_decay(&self, project_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let items = self.load_project(project_id).await?;
        let mut dropped = 0;
        let mut survivors: Vec<(f32, uuid::Uuid)> = Vec::new();
        for item in items {
            if item.current_activation(now) < ACTIVE_FLOOR {
                self.remove(item.id).await?;
                dropped += 1;
            } else {
                survivors.push((item.current_activation(now), item.id));
            }
        }

        // The sweep also restores the target: at most 7 items stay active
        if survivors.len() > TARGET_CAPACITY {
            survivors.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            for (_, id) in survivors.split_off(TARGET_CAPACITY) {
                self.remove(id).await?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    async fn clear(&self, project_id: &str) -> Result<()> {
        let conn = self.pool.acquire().await?;
        conn.execute(
            "DELETE FROM working_memory WHERE project_id = ?",
            params![project_id],
        )
        .await?;
        Ok(())
    }
}
