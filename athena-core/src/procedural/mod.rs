//! # Procedural Store
//!
//! Versioned workflows learned from repeated action sequences. New behavior
//! always lands as a new version; prior versions are immutable so execution
//! history stays attributable.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One action inside a procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub action: String,
    pub tool: Option<String>,
    pub expected_outcome: Option<String>,
}

impl ProcedureStep {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            tool: None,
            expected_outcome: None,
        }
    }
}

/// A reusable, versioned workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: Uuid,
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    /// Monotone per name within a project
    pub version: u32,
    pub steps: Vec<ProcedureStep>,
    /// Substring or regex matched against trigger contexts
    pub trigger_pattern: String,
    pub execution_count: u64,
    pub success_count: u64,
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Procedure {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<ProcedureStep>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            name: name.into(),
            description: String::new(),
            category: "general".to_string(),
            version: 1,
            steps,
            trigger_pattern: String::new(),
            execution_count: 0,
            success_count: 0,
            last_executed: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, pattern: impl Into<String>) -> Self {
        self.trigger_pattern = pattern.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Effectiveness smoothed by a Beta(1,1) prior:
    /// `(success + 1) / (executions + 2)`. An unexecuted procedure scores
    /// 0.5 rather than an unearned 0 or 1.
    #[must_use]
    pub fn effectiveness(&self) -> f32 {
        (self.success_count as f32 + 1.0) / (self.execution_count as f32 + 2.0)
    }

    /// Whether this procedure's trigger matches a context string.
    ///
    /// The pattern is tried as a regex first; invalid regexes degrade to a
    /// case-insensitive substring match.
    #[must_use]
    pub fn trigger_matches(&self, context: &str) -> bool {
        if self.trigger_pattern.is_empty() {
            return false;
        }
        match regex::Regex::new(&self.trigger_pattern) {
            Ok(re) => re.is_match(context),
            Err(_) => context
                .to_lowercase()
                .contains(&self.trigger_pattern.to_lowercase()),
        }
    }

    /// Ranking score: effectiveness damped by time since last execution
    /// (half-life 30 days). Never-executed procedures carry no recency
    /// penalty so fresh knowledge gets a first chance.
    #[must_use]
    pub fn ranking_score(&self, now: DateTime<Utc>) -> f32 {
        let recency = match self.last_executed {
            Some(last) => {
                let days = (now - last).num_seconds().max(0) as f32 / 86_400.0;
                0.5f32.powf(days / 30.0)
            }
            None => 1.0,
        };
        self.effectiveness() * recency
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidInput("procedure name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(Error::InvalidInput("procedure has no steps".into()));
        }
        if self.version == 0 {
            return Err(Error::InvalidInput("procedure version must be >= 1".into()));
        }
        Ok(())
    }
}

/// Storage interface for the procedural layer
#[async_trait]
pub trait ProceduralStore: Send + Sync {
    /// Create version 1 of a procedure; `(project, name, version)` must be new
    async fn create(&self, procedure: Procedure) -> Result<Uuid>;

    /// Append a new version for `name`, leaving prior versions untouched
    async fn new_version(
        &self,
        project_id: &str,
        name: &str,
        steps: Vec<ProcedureStep>,
        rationale: &str,
    ) -> Result<Procedure>;

    /// Record an execution outcome against a specific version
    async fn record_execution(&self, id: Uuid, success: bool, duration_ms: u64) -> Result<()>;

    /// Latest-version procedures whose trigger matches the context, ordered
    /// by `ranking_score` descending
    async fn find(&self, project_id: &str, trigger_context: &str, limit: usize)
        -> Result<Vec<Procedure>>;

    /// Fetch by id
    async fn get(&self, id: Uuid) -> Result<Option<Procedure>>;

    /// All versions of a named procedure, oldest first
    async fn versions(&self, project_id: &str, name: &str) -> Result<Vec<Procedure>>;
}
