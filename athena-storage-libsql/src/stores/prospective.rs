//! libSQL prospective store.

use super::{from_millis, parse_json, parse_uuid, parse_uuid_opt, to_json, to_millis};
use crate::pool::DbPool;
use athena_core::episodic::EpisodicEvent;
use athena_core::error::{Error, Result};
use athena_core::prospective::{
    would_create_cycle, ProspectiveStore, Task, TriggerFire,
};
use athena_core::types::{TaskPhase, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Tasks and triggers over libSQL
pub struct LibsqlProspectiveStore {
    pool: Arc<DbPool>,
}

impl LibsqlProspectiveStore {
    #[must_use]
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    const SELECT_COLUMNS: &'static str = "id, project_id, parent_id, title, description, status, \
         priority, phase, triggers, dependencies, deadline, progress, created_at, updated_at";

    fn row_to_task(row: &libsql::Row) -> Result<Task> {
        let id_raw: String = row.get(0).map_err(crate::migrations::driver)?;
        let parent_raw: Option<String> = row.get(2).map_err(crate::migrations::driver)?;
        let status_raw: String = row.get(5).map_err(crate::migrations::driver)?;
        let phase_raw: String = row.get(7).map_err(crate::migrations::driver)?;
        let triggers_raw: String = row.get(8).map_err(crate::migrations::driver)?;
        let deps_raw: String = row.get(9).map_err(crate::migrations::driver)?;
        let deadline: Option<i64> = row.get(10).map_err(crate::migrations::driver)?;
        let dep_ids: Vec<String> = parse_json(&deps_raw)?;

        Ok(Task {
            id: parse_uuid(&id_raw)?,
            project_id: row.get(1).map_err(crate::migrations::driver)?,
            parent_id: parse_uuid_opt(parent_raw)?,
            title: row.get(3).map_err(crate::migrations::driver)?,
            description: row.get(4).map_err(crate::migrations::driver)?,
            status: TaskStatus::parse(&status_raw)
                .ok_or_else(|| Error::Storage(format!("unknown task status '{status_raw}'")))?,
            priority: row.get::<i64>(6).map_err(crate::migrations::driver)? as u8,
            phase: TaskPhase::parse(&phase_raw)
                .ok_or_else(|| Error::Storage(format!("unknown task phase '{phase_raw}'")))?,
            triggers: parse_json(&triggers_raw)?,
            dependencies: dep_ids
                .iter()
                .map(|s| parse_uuid(s))
                .collect::<Result<BTreeSet<Uuid>>>()?,
            deadline: deadline.map(from_millis),
            progress: row.get::<f64>(11).map_err(crate::migrations::driver)? as f32,
            created_at: from_millis(row.get(12).map_err(crate::migrations::driver)?),
            updated_at: from_millis(row.get(13).map_err(crate::migrations::driver)?),
        })
    }

    async fn write_task(&self, task: &Task) -> Result<()> {
        let deps: Vec<String> = task.dependencies.iter().map(Uuid::to_string).collect();
        let conn = self.pool.acquire().await?;
        conn.execute(
            "INSERT OR REPLACE INTO tasks (id, project_id, parent_id, title, description, \
             status, priority, phase, triggers, dependencies, deadline, progress, created_at, \
             updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                task.id.to_string(),
                task.project_id.clone(),
                task.parent_id.map(|p| p.to_string()),
                task.title.clone(),
                task.description.clone(),
                task.status.as_str(),
                i64::from(task.priority),
                task.phase.as_str(),
                to_json(&task.triggers)?,
                to_json(&deps)?,
                task.deadline.map(to_millis),
                f64::from(task.progress),
                to_millis(task.created_at),
                to_millis(Utc::now()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn load_project(&self, project_id: &str) -> Result<Vec<Task>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM tasks WHERE project_id = ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id]).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            tasks.push(Self::row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn load_one(&self, id: Uuid) -> Result<Task> {
        self.get(id).await?.ok_or(Error::NotFound(id))
    }
}

#[async_trait]
impl ProspectiveStore for LibsqlProspectiveStore {
    async fn create_task(&self, task: Task) -> Result<Uuid> {
        task.validate()?;
        if let Some(parent) = task.parent_id {
            self.load_one(parent).await?;
        }
        self.write_task(&task).await?;
        Ok(task.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        let conn = self.pool.acquire().await?;
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", Self::SELECT_COLUMNS);
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await.map_err(crate::migrations::driver)? {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<()> {
        let mut task = self.load_one(id).await?;
        if task.status == TaskStatus::Completed && status != TaskStatus::Completed {
            return Err(Error::InvalidInput(
                "completed tasks are terminal".to_string(),
            ));
        }
        task.status = status;
        if status == TaskStatus::Completed {
            task.phase = TaskPhase::Completed;
            task.progress = 1.0;
        }
        self.write_task(&task).await
    }

    async fn set_phase(&self, id: Uuid, phase: TaskPhase) -> Result<()> {
        let mut task = self.load_one(id).await?;
        task.phase = phase;
        self.write_task(&task).await
    }

    async fn add_dependency(&self, from: Uuid, to: Uuid) -> Result<()> {
        let mut task = self.load_one(from).await?;
        self.load_one(to).await?;

        let project_tasks = self.load_project(&task.project_id).await?;
        let edges: HashMap<Uuid, BTreeSet<Uuid>> = project_tasks
            .iter()
            .map(|t| (t.id, t.dependencies.clone()))
            .collect();
        if would_create_cycle(&edges, from, to) {
            return Err(Error::InvalidInput(
                "dependency would create a cycle".to_string(),
            ));
        }

        task.dependencies.insert(to);
        self.write_task(&task).await
    }

    async fn list_active(&self, project_id: &str, limit: usize) -> Result<Vec<Task>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM tasks WHERE project_id = ? AND status IN ('active', 'pending') \
             ORDER BY priority DESC, created_at ASC LIMIT ?",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id, limit as i64]).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            tasks.push(Self::row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn due_before(&self, project_id: &str, ts: DateTime<Utc>) -> Result<Vec<Task>> {
        let conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM tasks WHERE project_id = ? AND deadline IS NOT NULL \
             AND deadline <= ? AND status NOT IN ('completed', 'cancelled') \
             ORDER BY deadline ASC",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![project_id, to_millis(ts)]).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            tasks.push(Self::row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn fire_triggers(
        &self,
        project_id: &str,
        now: DateTime<Utc>,
        event: Option<&EpisodicEvent>,
    ) -> Result<Vec<TriggerFire>> {
        let tasks = self.load_project(project_id).await?;
        let mut fired = Vec::new();
        for mut task in tasks {
            if task.status.is_terminal() || task.status == TaskStatus::Blocked {
                continue;
            }
            let hit = task.triggers.iter().any(|t| t.fires(now, event));
            if !hit {
                continue;
            }
            match task.status {
                TaskStatus::Pending => {
                    task.status = TaskStatus::Active;
                    self.write_task(&task).await?;
                    fired.push(TriggerFire::Activated(task.id));
                }
                TaskStatus::Active => fired.push(TriggerFire::Advisory(task.id)),
                _ => {}
            }
        }
        Ok(fired)
    }

    async fn list(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>> {
        let conn = self.pool.acquire().await?;
        let (clause, values) = match status {
            Some(status) => (
                " AND status = ?",
                vec![
                    libsql::Value::Text(project_id.to_string()),
                    libsql::Value::Text(status.as_str().to_string()),
                ],
            ),
            None => (
                "",
                vec![libsql::Value::Text(project_id.to_string())],
            ),
        };
        let sql = format!(
            "SELECT {} FROM tasks WHERE project_id = ?{clause} \
             ORDER BY priority DESC, created_at ASC LIMIT {limit} OFFSET {offset}",
            Self::SELECT_COLUMNS
        );
        let mut rows = conn.query(&sql, libsql::params_from_iter(values)).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(crate::migrations::driver)? {
            tasks.push(Self::row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn count(&self, project_id: &str, status: Option<TaskStatus>) -> Result<usize> {
        let conn = self.pool.acquire().await?;
        let (sql, values) = match status {
            Some(status) => (
                "SELECT COUNT(*) FROM tasks WHERE project_id = ? AND status = ?",
                vec![
                    libsql::Value::Text(project_id.to_string()),
                    libsql::Value::Text(status.as_str().to_string()),
                ],
            ),
            None => (
                "SELECT COUNT(*) FROM tasks WHERE project_id = ?",
                vec![libsql::Value::Text(project_id.to_string())],
            ),
        };
        let mut rows = conn.query(sql, libsql::params_from_iter(values)).await?;
        let row = rows
            .next()
            .await
            .map_err(crate::migrations::driver)?
            .ok_or_else(|| Error::Storage("count query returned no rows".into()))?;
        let count: i64 = row.get(0).map_err(crate::migrations::driver)?;
        Ok(count as usize)
    }
}
