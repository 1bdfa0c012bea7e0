//! # Session Context
//!
//! Session lifecycle plus working-memory hydration. Starting a session
//! pre-loads working memory with the most useful recent knowledge; ending
//! one enqueues a consolidation run bounded to the session's own events.

use crate::consolidation::{ConsolidationEngine, ConsolidationParams, ConsolidationReport};
use crate::episodic::{EpisodicEvent, EpisodicStore, EventFilter};
use crate::error::{Error, Result};
use crate::semantic::SemanticStore;
use crate::types::{ConsolConfig, TaskPhase, WmComponent};
use crate::working::{WorkingMemoryItem, WorkingStore, TARGET_CAPACITY};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Recency window for hydration
pub const HYDRATION_WINDOW_HOURS: i64 = 48;

/// A session's durable record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub project_id: String,
    pub task: Option<String>,
    pub phase: Option<TaskPhase>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Ordered event ids recorded in this session
    pub event_ids: Vec<Uuid>,
}

impl SessionContext {
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            project_id: project_id.into(),
            task: None,
            phase: None,
            started_at: Utc::now(),
            ended_at: None,
            event_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Persistence for session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: SessionContext) -> Result<()>;
    async fn get(&self, session_id: Uuid) -> Result<Option<SessionContext>>;
    async fn update(&self, session: SessionContext) -> Result<()>;
    async fn list_active(&self, project_id: &str) -> Result<Vec<SessionContext>>;
}

/// Hydration rank: `importance * context_completeness * actionability`,
/// floored so sparse events still compete on importance alone
#[must_use]
pub fn hydration_rank(event: &EpisodicEvent) -> f32 {
    event.importance * event.context_completeness.max(0.2) * event.actionability.max(0.2)
}

/// Session lifecycle orchestration
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    episodic: Arc<dyn EpisodicStore>,
    semantic: Arc<dyn SemanticStore>,
    working: Arc<dyn WorkingStore>,
    consolidation: Arc<ConsolidationEngine>,
    consol_config: ConsolConfig,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        episodic: Arc<dyn EpisodicStore>,
        semantic: Arc<dyn SemanticStore>,
        working: Arc<dyn WorkingStore>,
        consolidation: Arc<ConsolidationEngine>,
        consol_config: ConsolConfig,
    ) -> Self {
        Self {
            sessions,
            episodic,
            semantic,
            working,
            consolidation,
            consol_config,
        }
    }

    /// Start a session and hydrate working memory from recent knowledge
    pub async fn start_session(&self, project_id: &str) -> Result<SessionContext> {
        let session = SessionContext::new(project_id);
        self.sessions.create(session.clone()).await?;
        let hydrated = self.hydrate_working_memory(project_id).await?;
        info!(
            "Session {} started for project {project_id}, hydrated {hydrated} items",
            session.session_id
        );
        Ok(session)
    }

    /// Record an event against a session; the event is appended to the
    /// episodic store with session linkage
    pub async fn record_session_event(
        &self,
        session_id: Uuid,
        mut event: EpisodicEvent,
    ) -> Result<Uuid> {
        let mut session = self.require_active(session_id).await?;
        event.session_id = Some(session_id);
        event.validate()?;
        let outcome = self.episodic.append(event).await?;
        if outcome.inserted {
            session.event_ids.push(outcome.id);
            self.sessions.update(session).await?;
        }
        Ok(outcome.id)
    }

    /// Update the session's task/phase context
    pub async fn update_context(
        &self,
        session_id: Uuid,
        task: Option<String>,
        phase: Option<TaskPhase>,
    ) -> Result<SessionContext> {
        let mut session = self.require_active(session_id).await?;
        if task.is_some() {
            session.task = task;
        }
        if phase.is_some() {
            session.phase = phase;
        }
        self.sessions.update(session.clone()).await?;
        Ok(session)
    }

    /// Current working memory, strongest first, capped to `k`
    pub async fn get_working_memory(
        &self,
        project_id: &str,
        k: usize,
    ) -> Result<Vec<WorkingMemoryItem>> {
        let mut items = self.working.get_current(project_id).await?;
        items.truncate(if k == 0 { TARGET_CAPACITY } else { k });
        Ok(items)
    }

    /// End a session and run a consolidation pass over its events
    pub async fn end_session(&self, session_id: Uuid) -> Result<ConsolidationReport> {
        let mut session = self.require_active(session_id).await?;
        session.ended_at = Some(Utc::now());
        self.sessions.update(session.clone()).await?;

        let params = ConsolidationParams {
            project_id: session.project_id.clone(),
            max_events: self.consol_config.max_events.min(session.event_ids.len().max(1)),
            time_window: None,
            strategy: self.consol_config.strategy,
            session_id: Some(session_id),
        };
        let report = self.consolidation.run(&params).await?;
        info!(
            "Session {session_id} ended: consolidated {} events into {} memories",
            report.selected_events, report.promoted_semantic
        );
        Ok(report)
    }

    async fn require_active(&self, session_id: Uuid) -> Result<SessionContext> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(Error::NotFound(session_id))?;
        if !session.is_active() {
            return Err(Error::InvalidInput(format!(
                "session {session_id} already ended"
            )));
        }
        Ok(session)
    }

    /// Hydrate working memory: top-K recent episodic events and semantic
    /// memories by combined rank, rebalanced across components
    async fn hydrate_working_memory(&self, project_id: &str) -> Result<usize> {
        self.working.clear(project_id).await?;

        let since = Utc::now() - Duration::hours(HYDRATION_WINDOW_HOURS);
        let filter = EventFilter {
            since: Some(since),
            ..Default::default()
        };
        let mut events = self.episodic.list(project_id, &filter, 50, 0).await?;
        events.sort_by(|a, b| {
            hydration_rank(b)
                .partial_cmp(&hydration_rank(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let semantics = self.semantic.list_all(project_id, 20).await?;
        let mut recent_semantics: Vec<_> = semantics
            .into_iter()
            .filter(|m| m.last_accessed >= since || m.updated_at >= since)
            .collect();
        recent_semantics.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut inserted = 0usize;
        let episodic_budget = TARGET_CAPACITY / 2 + 1;
        for event in events.into_iter().take(episodic_budget) {
            let item = WorkingMemoryItem::new(project_id, event.content, WmComponent::EpisodicBuffer)
                .with_importance(event.importance);
            self.working.insert(item, true).await?;
            inserted += 1;
        }
        for memory in recent_semantics
            .into_iter()
            .take(TARGET_CAPACITY.saturating_sub(inserted))
        {
            let item =
                WorkingMemoryItem::new(project_id, memory.content, WmComponent::CentralExecutive)
                    .with_importance(memory.confidence);
            self.working.insert(item, true).await?;
            inserted += 1;
        }

        debug!("Hydrated {inserted} working-memory items for {project_id}");
        Ok(inserted)
    }
}
