//! # Episodic Store
//!
//! Append-only event log with lifecycle state. Events are the raw material
//! of the memory system: everything the agent observes lands here first and
//! is later promoted by consolidation. Content is never edited after append;
//! the only mutations are lifecycle advancement and causality linkage.

use crate::error::{Error, Result};
use crate::hash::event_content_hash;
use crate::types::{EventType, Lifecycle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A recorded observation attributable to a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEvent {
    pub id: Uuid,
    pub project_id: String,
    pub session_id: Option<Uuid>,
    pub source_id: Option<String>,
    pub event_type: EventType,
    pub content: String,
    pub structured_context: serde_json::Map<String, serde_json::Value>,
    /// SHA-256 over canonical JSON, hex-encoded; dedup key within a project
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub timestamp: DateTime<Utc>,
    pub lifecycle: Lifecycle,
    pub importance: f32,
    pub actionability: f32,
    pub context_completeness: f32,
    pub causality_parent: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EpisodicEvent {
    /// Create a new active event, computing its content hash
    #[must_use]
    pub fn new(project_id: impl Into<String>, event_type: EventType, content: impl Into<String>) -> Self {
        let content = content.into();
        let structured_context = serde_json::Map::new();
        let content_hash = event_content_hash(event_type.as_str(), &content, &structured_context);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            session_id: None,
            source_id: None,
            importance: heuristic_importance(event_type, &content),
            actionability: heuristic_actionability(event_type),
            context_completeness: 0.0,
            event_type,
            content,
            structured_context,
            content_hash,
            embedding: None,
            timestamp: now,
            lifecycle: Lifecycle::Active,
            causality_parent: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach structured context and recompute the content hash
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.structured_context = context;
        self.content_hash = event_content_hash(
            self.event_type.as_str(),
            &self.content,
            &self.structured_context,
        );
        self.context_completeness = completeness_of(&self.structured_context);
        self
    }

    /// Validate field bounds before storage
    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            return Err(Error::InvalidInput("event project_id is empty".into()));
        }
        if self.content.is_empty() {
            return Err(Error::InvalidInput("event content is empty".into()));
        }
        for (name, value) in [
            ("importance", self.importance),
            ("actionability", self.actionability),
            ("context_completeness", self.context_completeness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidInput(format!("event {name} out of [0, 1]")));
            }
        }
        Ok(())
    }
}

/// Heuristic importance at ingest time.
///
/// LLM scoring is opt-in and layered on top; the baseline uses event-type
/// priors plus content markers so ingestion never waits on a provider.
#[must_use]
pub fn heuristic_importance(event_type: EventType, content: &str) -> f32 {
    let prior = match event_type {
        EventType::Error => 0.7,
        EventType::Decision => 0.65,
        EventType::UserInput => 0.6,
        EventType::FileChange => 0.5,
        EventType::ToolExecution => 0.45,
        EventType::AgentOutput => 0.4,
        EventType::External => 0.35,
    };
    let lower = content.to_lowercase();
    let mut score: f32 = prior;
    if lower.contains("error") || lower.contains("fail") || lower.contains("panic") {
        score += 0.1;
    }
    if lower.contains("fixed") || lower.contains("resolved") || lower.contains("success") {
        score += 0.05;
    }
    if content.len() < 16 {
        score -= 0.1;
    }
    score.clamp(0.0, 1.0)
}

fn heuristic_actionability(event_type: EventType) -> f32 {
    match event_type {
        EventType::Decision | EventType::Error => 0.7,
        EventType::ToolExecution | EventType::FileChange => 0.5,
        EventType::UserInput => 0.4,
        EventType::AgentOutput | EventType::External => 0.3,
    }
}

fn completeness_of(context: &serde_json::Map<String, serde_json::Value>) -> f32 {
    // Saturates at eight populated context keys
    (context.len() as f32 / 8.0).min(1.0)
}

/// Filter for listing and counting events
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
    pub session_id: Option<Uuid>,
    pub source_id: Option<String>,
    pub lifecycle: Option<Lifecycle>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// Check a single event against the filter
    #[must_use]
    pub fn matches(&self, event: &EpisodicEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(session) = self.session_id {
            if event.session_id != Some(session) {
                return false;
            }
        }
        if let Some(ref source) = self.source_id {
            if event.source_id.as_deref() != Some(source.as_str()) {
                return false;
            }
        }
        if let Some(lifecycle) = self.lifecycle {
            if event.lifecycle != lifecycle {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Inclusive time window for temporal recall
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Result of a single append: `inserted = false` means the content hash
/// already existed and the stored event's id is returned
#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    pub id: Uuid,
    pub inserted: bool,
}

/// Result of a batch append with per-item dedup accounting
#[derive(Debug, Clone, Default)]
pub struct BatchAppendOutcome {
    /// One id per input event, in order; deduplicates map to the stored id
    pub ids: Vec<Uuid>,
    pub inserted: usize,
    pub skipped_duplicate: usize,
}

/// Storage interface for the episodic layer
#[async_trait]
pub trait EpisodicStore: Send + Sync {
    /// Append one event; re-appending the same `(project_id, content_hash)`
    /// is a no-op returning the existing id
    async fn append(&self, event: EpisodicEvent) -> Result<AppendOutcome>;

    /// Append a batch transactionally with in-batch and in-store dedup
    async fn append_batch(&self, events: Vec<EpisodicEvent>) -> Result<BatchAppendOutcome>;

    /// Fetch by id
    async fn get(&self, id: Uuid) -> Result<Option<EpisodicEvent>>;

    /// List events matching a filter, newest first
    async fn list(
        &self,
        project_id: &str,
        filter: &EventFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EpisodicEvent>>;

    /// Events within a time window, newest first
    async fn recall_temporal(
        &self,
        project_id: &str,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>>;

    /// Advance lifecycle for a set of events; rejects backward transitions
    async fn mark_lifecycle(&self, ids: &[Uuid], new_state: Lifecycle) -> Result<()>;

    /// Record a causality edge from parent to child
    async fn link_causality(&self, parent: Uuid, child: Uuid) -> Result<()>;

    /// Count events matching a filter
    async fn count(&self, project_id: &str, filter: &EventFilter) -> Result<usize>;

    /// Atomically select up to `max_events` active events in the window and
    /// mark them `consolidating`; returns the claimed snapshot
    async fn claim_for_consolidation(
        &self,
        project_id: &str,
        window: TimeWindow,
        max_events: usize,
    ) -> Result<Vec<EpisodicEvent>>;

    /// Check which of the given content hashes already exist in the project
    async fn existing_hashes(&self, project_id: &str, hashes: &[String]) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_event_has_hash_and_active_lifecycle() {
        let event = EpisodicEvent::new("proj", EventType::UserInput, "login failed");
        assert_eq!(event.lifecycle, Lifecycle::Active);
        assert_eq!(event.content_hash.len(), 64);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_same_content_same_hash() {
        let a = EpisodicEvent::new("proj", EventType::UserInput, "login failed");
        let b = EpisodicEvent::new("proj", EventType::UserInput, "login failed");
        assert_ne!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_context_changes_hash() {
        let plain = EpisodicEvent::new("proj", EventType::ToolExecution, "ran tests");
        let mut ctx = serde_json::Map::new();
        ctx.insert("exit_code".to_string(), json!(1));
        let with_ctx =
            EpisodicEvent::new("proj", EventType::ToolExecution, "ran tests").with_context(ctx);
        assert_ne!(plain.content_hash, with_ctx.content_hash);
    }

    #[test]
    fn test_error_events_rank_above_agent_output() {
        let error = heuristic_importance(EventType::Error, "connection error in pool");
        let output = heuristic_importance(EventType::AgentOutput, "here is the summary you asked");
        assert!(error > output);
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let mut event = EpisodicEvent::new("proj", EventType::UserInput, "x");
        event.content = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let event = EpisodicEvent::new("proj", EventType::Error, "boom")
            .with_source("ci");

        let mut filter = EventFilter::default();
        assert!(filter.matches(&event));

        filter.event_types = vec![EventType::Error];
        assert!(filter.matches(&event));

        filter.source_id = Some("ci".to_string());
        assert!(filter.matches(&event));

        filter.event_types = vec![EventType::UserInput];
        assert!(!filter.matches(&event));
    }

    #[test]
    fn test_filter_time_bounds() {
        let event = EpisodicEvent::new("proj", EventType::UserInput, "hello");
        let filter = EventFilter {
            since: Some(event.timestamp + chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!filter.matches(&event));
    }
}
