//! libSQL procedural store.

use super::{from_millis, parse_json, parse_uuid, to_json, to_millis};
use crate::pool::DbPool;
use athena_core::error::{Error, Result};
use athena_core::procedural::{Procedure, ProceduralStore, ProcedureStep};
use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use std::sync::Arc;
use uuid::Uuid;

/// Versioned procedures over libSQL
pub struct LibsqlProceduralStore {
    pool: Arc<DbPool>,
}

impl LibsqlProceduralStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    const SELECT_COLUMNS: &'static str = "id, project_id, name, description, category, version, \
         steps, trigger_pattern, execution_count, success_count, last_executed, created_at, \
         updated_at";

    fn row_to_procedure(row: &libsql::Row) -> Result<Procedure> {
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let steps_raw: String = row.get(6).map_err(crate::migrations::driver)?;
        let last_executed: Option<i64> = row.get(10).map_err(crate::migrations::driver)?;
        Ok(Procedure {
            id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            name: row.get(2).map_err(crate::migrations::driver)?,
            description: row.get(3).map_err(crate::migrations::driver)?,
            category: row.get(4).map_err(crate::migrations::driver)?,
            version: row.get::<i64>(5).map_err(crate::migrations::driver)? as u32,
            steps: parse_json(&steps_raw)?,
            trigger_pattern: row.get(7).map_err(crate::migrations::driver)?,
            execution_count: row.get::<i64>(8).map_err(crate::migrations::driver)? as u64,
            success_count: row.get::<i64>(9).map_err(crate::migrations::driver)? as u64,
            last_executed: last_executed.map(from_millis),
            created_at: from_millis(row.get(11).map_err(crate::migrations::driver)?),
            updated_at: from_millis(row.get(12).map_err(crate::migrations::driver)?),
        })
    }

    async fn insert(&self, procedure: &Procedure) -> Result<()> {
        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT INTO procedures (id, project_id, name, description, category, version, \
             steps, trigger_pattern, execution_count, success_count, last_executed, created_at, \
             updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                procedure.id.to_string(),
                procedure.project_id.clone(),
                procedure.name.clone(),
                procedure.description.clone(),
                procedure.category.clone(),
                i64::from(procedure.version),
                to_json(&procedure.steps)?,
                procedure.trigger_pattern.clone(),
                procedure.execution_count as i64,
                procedure.success_count as i64,
                procedure.last_executed.map(to_millis),
                to_millis(procedure.created_at),
                to_millis(procedure.updated_at),
            ],
        )
        .await
        .map_err(|e| match e {
            Error::Storage(ref msg) if msg.to_lowercase().contains("unique") => {
                Error::InvalidInput(format!(
                    "procedure {} version {} already exists",
                    procedure.name, procedure.version
                ))
            }
            other => other,
        })?;
        Ok(())
    }
}

#[async_trait]
impl ProceduralStore for LibsqlProceduralStore {
    async fn create(&self, procedure: Procedure) -> Result<Uuid> {
        procedure.validate()?;
        self.insert(&procedure).await?;
        Ok(procedure.id)
    }

    async fn new_version(
        &self,
        project_id: &str,
        name: &str,
        steps: Vec<ProcedureStep>,
        rationale: &str,
    ) -> Result<Procedure> {
        let versions = self.versions(project_id, name).await?;
        let latest = versions
            .last()
            .ok_or_else(|| Error::InvalidInput(format!("unknown procedure '{name}'")))?;

        let mut next = Procedure::new(project_id, name, steps);
        next.version = latest.version + 1;
        next.category = latest.category.clone();
        next.trigger_pattern = latest.trigger_pattern.clone();
        next.description = if rationale.is_empty() {
            latest.description.clone()
        } else {
            rationale.to_string()
        };
        next.validate()?;
        self.insert(&next).await?;
        Ok(next)
    }

    async fn record_execution(&self, id: Uuid, success: bool, duration_ms: u64) -> Result<()> {
        let _ = duration_ms;
        let conn = self.pool.acquire().await?;
        let affected = conn
            .execute(
                "UPDATE procedures SET execution_count = execution_count + 1, \
                 success_count = success_count + ?, last_executed = ?, updated_at = ? \
                 WHERE id = ?",
                params![
                    i64::from(success),
                    to_millis(Utc::now()),
                    to_millis(Utc::now()),
                    id.to_string()
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    async fn find(
        &self,
        project_id: &str,
        trigger_context: &str,
        limit: usize,
    ) -> Result<Vec<Procedure>> {
        // Latest version per name via the version index; trigger matching
        // happens in-process because patterns may be regexes
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM procedures p WHERE project_id = ? AND version = \
             (SELECT MAX(version) FROM procedures WHERE project_id = p.project_id AND name = p.name)",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id]).await?;
        let mut latest = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            latest.push(Self::row_to_procedure(&row)?);
        }

        let now = Utc::now();
        let mut matched: Vec<Procedure> = latest
            .into_iter()
            .filter(|p| p.trigger_matches(trigger_context))
            .collect();
        matched.sort_by(|a, b| {
            b.ranking_score(now)
                .partial_cmp(&a.ranking_score(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matched.truncate(limit);
        Ok(matched)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Procedure>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM procedures WHERE id = ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(Some(Self::row_to_procedure(&row)?)),
            None => Ok(None),
        }
    }

    async fn versions(&self, project_id: &str, name: &str) -> Result<Vec<Procedure>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM procedures WHERE project_id = ? AND name = ? ORDER BY version ASC",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id, name]).await?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            versions.push(Self::row_to_procedure(&row)?);
        }
        Ok(versions)
    }
}
