//! In-memory prospective store.

use crate::episodic::EpisodicEvent;
use crate::error::{Error, Result};
use crate::prospective::{would_create_cycle, ProspectiveStore, Task, Trigger, TriggerFire};
use crate::types::{TaskPhase, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Tasks and triggers held in process memory
#[derive(Default)]
pub struct InMemoryProspectiveStore {
    rows: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryProspectiveStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn dependency_edges(rows: &HashMap<Uuid, Task>) -> HashMap<Uuid, BTreeSet<Uuid>> {
        rows.iter()
            .map(|(id, task)| (*id, task.dependencies.clone()))
            .collect()
    }
}

#[async_trait]
impl ProspectiveStore for InMemoryProspectiveStore {
    async fn create_task(&self, task: Task) -> Result<Uuid> {
        task.validate()?;
        let mut rows = self.rows.write();
        if let Some(parent) = task.parent_id {
            if !rows.contains_key(&parent) {
                return Err(Error::NotFound(parent));
            }
        }
        let id = task.id;
        rows.insert(id, task);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<()> {
        let mut rows = self.rows.write();
        let task = rows.get_mut(&id).ok_or(Error::NotFound(id))?;
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
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn set_phase(&self, id: Uuid, phase: TaskPhase) -> Result<()> {
        let mut rows = self.rows.write();
        let task = rows.get_mut(&id).ok_or(Error::NotFound(id))?;
        task.phase = phase;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn add_dependency(&self, from: Uuid, to: Uuid) -> Result<()> {
        let mut rows = self.rows.write();
        if !rows.contains_key(&to) {
            return Err(Error::NotFound(to));
        }
        let edges = Self::dependency_edges(&rows);
        if would_create_cycle(&edges, from, to) {
            return Err(Error::InvalidInput(
                "dependency would create a cycle".to_string(),
            ));
        }
        let task = rows.get_mut(&from).ok_or(Error::NotFound(from))?;
        task.dependencies.insert(to);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn list_active(&self, project_id: &str, limit: usize) -> Result<Vec<Task>> {
        let rows = self.rows.read();
        let mut tasks: Vec<Task> = rows
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && matches!(t.status, TaskStatus::Active | TaskStatus::Pending)
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        tasks.truncate(limit);
        Ok(tasks)
    }

    async fn due_before(&self, project_id: &str, ts: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = self.rows.read();
        let mut tasks: Vec<Task> = rows
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && !t.status.is_terminal()
                    && t.deadline.is_some_and(|d| d <= ts)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.deadline);
        Ok(tasks)
    }

    async fn fire_triggers(
        &self,
        project_id: &str,
        now: DateTime<Utc>,
        event: Option<&EpisodicEvent>,
    ) -> Result<Vec<TriggerFire>> {
        let mut rows = self.rows.write();
        let mut fired = Vec::new();
        for task in rows.values_mut().filter(|t| t.project_id == project_id) {
            if task.status.is_terminal() || task.status == TaskStatus::Blocked {
                continue;
            }
            let hit = task
                .triggers
                .iter()
                .any(|trigger: &Trigger| trigger.fires(now, event));
            if !hit {
                continue;
            }
            match task.status {
                TaskStatus::Pending => {
                    task.status = TaskStatus::Active;
                    task.updated_at = now;
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
        let rows = self.rows.read();
        let mut tasks: Vec<Task> = rows
            .values()
            .filter(|t| t.project_id == project_id && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(tasks.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, project_id: &str, status: Option<TaskStatus>) -> Result<usize> {
        let rows = self.rows.read();
        Ok(rows
            .values()
            .filter(|t| t.project_id == project_id && status.is_none_or(|s| t.status == s))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    #[tokio::test]
    async fn test_cycle_rejected() {
        let store = InMemoryProspectiveStore::new();
        let a = store.create_task(Task::new("proj", "a")).await.unwrap();
        let b = store.create_task(Task::new("proj", "b")).await.unwrap();
        let c = store.create_task(Task::new("proj", "c")).await.unwrap();

        store.add_dependency(a, b).await.unwrap();
        store.add_dependency(b, c).await.unwrap();
        let err = store.add_dependency(c, a).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let store = InMemoryProspectiveStore::new();
        let id = store.create_task(Task::new("proj", "ship")).await.unwrap();
        store.update_status(id, TaskStatus::Completed).await.unwrap();
        assert!(store.update_status(id, TaskStatus::Active).await.is_err());

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.phase, TaskPhase::Completed);
        assert!((task.progress - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_event_trigger_activates_pending_task() {
        let store = InMemoryProspectiveStore::new();
        let task = Task::new("proj", "investigate timeouts")
            .with_trigger(Trigger::on_event(EventType::Error, "timeout"));
        let id = store.create_task(task).await.unwrap();

        let event = EpisodicEvent::new("proj", EventType::Error, "gateway timeout at 30s");
        let fired = store
            .fire_triggers("proj", Utc::now(), Some(&event))
            .await
            .unwrap();
        assert_eq!(fired, vec![TriggerFire::Activated(id)]);
        assert_eq!(store.get(id).await.unwrap().unwrap().status, TaskStatus::Active);

        // A second firing on an already-active task is advisory
        let fired = store
            .fire_triggers("proj", Utc::now(), Some(&event))
            .await
            .unwrap();
        assert_eq!(fired, vec![TriggerFire::Advisory(id)]);
    }

    #[tokio::test]
    async fn test_time_trigger_on_clock() {
        let store = InMemoryProspectiveStore::new();
        let task = Task::new("proj", "daily review")
            .with_trigger(Trigger::at(Utc::now() - chrono::Duration::minutes(1)));
        let id = store.create_task(task).await.unwrap();

        let fired = store.fire_triggers("proj", Utc::now(), None).await.unwrap();
        assert_eq!(fired, vec![TriggerFire::Activated(id)]);
    }

    #[tokio::test]
    async fn test_due_before_excludes_terminal() {
        let store = InMemoryProspectiveStore::new();
        let mut due = Task::new("proj", "due");
        due.deadline = Some(Utc::now() - chrono::Duration::hours(1));
        let due_id = store.create_task(due).await.unwrap();

        let mut done = Task::new("proj", "done");
        done.deadline = Some(Utc::now() - chrono::Duration::hours(1));
        let done_id = store.create_task(done).await.unwrap();
        store.update_status(done_id, TaskStatus::Completed).await.unwrap();

        let tasks = store.due_before("proj", Utc::now()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, due_id);
    }

    #[tokio::test]
    async fn test_list_active_orders_by_priority() {
        let store = InMemoryProspectiveStore::new();
        store
            .create_task(Task::new("proj", "low").with_priority(2))
            .await
            .unwrap();
        store
            .create_task(Task::new("proj", "high").with_priority(9))
            .await
            .unwrap();

        let tasks = store.list_active("proj", 10).await.unwrap();
        assert_eq!(tasks[0].title, "high");
    }
}
