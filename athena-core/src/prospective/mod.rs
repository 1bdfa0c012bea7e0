//! # Prospective Store
//!
//! Future-oriented memory: tasks and goals with typed triggers and
//! dependencies. Trigger evaluation is pure over a clock and an optional
//! inbound event so it can run inside both the scheduler and the ingestion
//! path.

use crate::episodic::EpisodicEvent;
use crate::error::{Error, Result};
use crate::types::{EventType, TaskPhase, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// Trigger kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Time,
    Event,
    File,
    Predicate,
}

/// A typed trigger specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Kind-specific parameters:
    /// - `time`: `{ "at": rfc3339 }`
    /// - `event`: `{ "event_type": ..., "contains": ... }`
    /// - `file`: `{ "path_contains": ... }`
    /// - `predicate`: `{ "expression": ... }` (matched against context text)
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Trigger {
    /// Time trigger firing at or after the given instant
    #[must_use]
    pub fn at(when: DateTime<Utc>) -> Self {
        let mut params = serde_json::Map::new();
        params.insert(
            "at".to_string(),
            serde_json::Value::String(when.to_rfc3339()),
        );
        Self {
            kind: TriggerKind::Time,
            params,
        }
    }

    /// Event trigger matching inbound events by type and content substring
    #[must_use]
    pub fn on_event(event_type: EventType, contains: &str) -> Self {
        let mut params = serde_json::Map::new();
        params.insert(
            "event_type".to_string(),
            serde_json::Value::String(event_type.as_str().to_string()),
        );
        params.insert(
            "contains".to_string(),
            serde_json::Value::String(contains.to_string()),
        );
        Self {
            kind: TriggerKind::Event,
            params,
        }
    }

    fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Evaluate against the clock and an optional inbound event
    #[must_use]
    pub fn fires(&self, now: DateTime<Utc>, event: Option<&EpisodicEvent>) -> bool {
        match self.kind {
            TriggerKind::Time => self
                .str_param("at")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .is_some_and(|at| now >= at.with_timezone(&Utc)),
            TriggerKind::Event => {
                let Some(event) = event else { return false };
                let type_ok = self
                    .str_param("event_type")
                    .is_none_or(|t| t == event.event_type.as_str());
                let content_ok = self
                    .str_param("contains")
                    .is_none_or(|needle| event.content.contains(needle));
                type_ok && content_ok
            }
            TriggerKind::File => {
                let Some(event) = event else { return false };
                if event.event_type != EventType::FileChange {
                    return false;
                }
                self.str_param("path_contains")
                    .is_none_or(|needle| event.content.contains(needle))
            }
            TriggerKind::Predicate => {
                let Some(event) = event else { return false };
                self.str_param("expression")
                    .is_some_and(|expr| match regex::Regex::new(expr) {
                        Ok(re) => re.is_match(&event.content),
                        Err(_) => event.content.contains(expr),
                    })
            }
        }
    }
}

/// A prospective task or goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: String,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub phase: TaskPhase,
    pub triggers: Vec<Trigger>,
    pub dependencies: BTreeSet<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    #[must_use]
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            parent_id: None,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: 5,
            phase: TaskPhase::Planning,
            triggers: Vec::new(),
            dependencies: BTreeSet::new(),
            deadline: None,
            progress: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() {
            return Err(Error::InvalidInput("task title is empty".into()));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(Error::InvalidInput("task priority must be 1..=10".into()));
        }
        if !(0.0..=1.0).contains(&self.progress) {
            return Err(Error::InvalidInput("task progress out of [0, 1]".into()));
        }
        if self.dependencies.contains(&self.id) {
            return Err(Error::InvalidInput("task cannot depend on itself".into()));
        }
        Ok(())
    }
}

/// Would adding edge `from -> to` create a dependency cycle?
///
/// `edges` maps a task to the tasks it depends on.
#[must_use]
pub fn would_create_cycle(edges: &HashMap<Uuid, BTreeSet<Uuid>>, from: Uuid, to: Uuid) -> bool {
    if from == to {
        return true;
    }
    // Walk from `to`; a path back to `from` closes the loop
    let mut stack = vec![to];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == from {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(deps) = edges.get(&node) {
            stack.extend(deps.iter().copied());
        }
    }
    false
}

/// Outcome of a trigger evaluation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerFire {
    /// Task moved pending -> active
    Activated(Uuid),
    /// Task already active; advisory only
    Advisory(Uuid),
}

/// Storage interface for the prospective layer
#[async_trait]
pub trait ProspectiveStore: Send + Sync {
    async fn create_task(&self, task: Task) -> Result<Uuid>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>>;

    /// Update status; `Completed` is terminal
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<()>;

    async fn set_phase(&self, id: Uuid, phase: TaskPhase) -> Result<()>;

    /// Add dependency `from -> to`; rejects cycles with `InvalidInput`
    async fn add_dependency(&self, from: Uuid, to: Uuid) -> Result<()>;

    /// Active and pending tasks, highest priority first
    async fn list_active(&self, project_id: &str, limit: usize) -> Result<Vec<Task>>;

    /// Non-terminal tasks with a deadline at or before `ts`
    async fn due_before(&self, project_id: &str, ts: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Evaluate all triggers against the clock and an optional inbound event
    async fn fire_triggers(
        &self,
        project_id: &str,
        now: DateTime<Utc>,
        event: Option<&EpisodicEvent>,
    ) -> Result<Vec<TriggerFire>>;

    /// All tasks in a project (pagination for the list operation)
    async fn list(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Task>>;

    async fn count(&self, project_id: &str, status: Option<TaskStatus>) -> Result<usize>;
}
