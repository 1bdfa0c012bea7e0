//! In-memory episodic store.

use crate::episodic::{
    AppendOutcome, BatchAppendOutcome, EpisodicEvent, EpisodicStore, EventFilter, TimeWindow,
};
use crate::error::{Error, Result};
use crate::types::Lifecycle;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Hash-indexed event log held in process memory
#[derive(Default)]
pub struct InMemoryEpisodicStore {
    events: RwLock<HashMap<Uuid, EpisodicEvent>>,
    /// `(project_id, content_hash)` -> event id
    by_hash: RwLock<HashMap<(String, String), Uuid>>,
}

impl InMemoryEpisodicStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_locked(
        events: &mut HashMap<Uuid, EpisodicEvent>,
        by_hash: &mut HashMap<(String, String), Uuid>,
        event: EpisodicEvent,
    ) -> AppendOutcome {
        let key = (event.project_id.clone(), event.content_hash.clone());
        if let Some(&existing) = by_hash.get(&key) {
            return AppendOutcome {
                id: existing,
                inserted: false,
            };
        }
        let id = event.id;
        by_hash.insert(key, id);
        events.insert(id, event);
        AppendOutcome { id, inserted: true }
    }
}

#[async_trait]
impl EpisodicStore for InMemoryEpisodicStore {
    async fn append(&self, event: EpisodicEvent) -> Result<AppendOutcome> {
        event.validate()?;
        let mut events = self.events.write();
        let mut by_hash = self.by_hash.write();
        Ok(Self::insert_locked(&mut events, &mut by_hash, event))
    }

    async fn append_batch(&self, batch: Vec<EpisodicEvent>) -> Result<BatchAppendOutcome> {
        for event in &batch {
            event.validate()?;
        }
        let mut events = self.events.write();
        let mut by_hash = self.by_hash.write();
        let mut outcome = BatchAppendOutcome::default();
        for event in batch {
            let result = Self::insert_locked(&mut events, &mut by_hash, event);
            outcome.ids.push(result.id);
            if result.inserted {
                outcome.inserted += 1;
            } else {
                outcome.skipped_duplicate += 1;
            }
        }
        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> Result<Option<EpisodicEvent>> {
        Ok(self.events.read().get(&id).cloned())
    }

    async fn list(
        &self,
        project_id: &str,
        filter: &EventFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let events = self.events.read();
        let mut matched: Vec<EpisodicEvent> = events
            .values()
            .filter(|e| e.project_id == project_id && filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn recall_temporal(
        &self,
        project_id: &str,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let filter = EventFilter {
            since: Some(window.start),
            until: Some(window.end),
            ..Default::default()
        };
        self.list(project_id, &filter, limit, 0).await
    }

    async fn mark_lifecycle(&self, ids: &[Uuid], new_state: Lifecycle) -> Result<()> {
        let mut events = self.events.write();
        // Validate the whole set before mutating any of it
        for id in ids {
            let event = events.get(id).ok_or(Error::NotFound(*id))?;
            if event.lifecycle != new_state && !event.lifecycle.can_transition_to(new_state) {
                return Err(Error::InvalidLifecycleTransition {
                    from: event.lifecycle.to_string(),
                    to: new_state.to_string(),
                });
            }
        }
        let now = Utc::now();
        for id in ids {
            if let Some(event) = events.get_mut(id) {
                event.lifecycle = new_state;
                event.updated_at = now;
            }
        }
        Ok(())
    }

    async fn link_causality(&self, parent: Uuid, child: Uuid) -> Result<()> {
        if parent == child {
            return Err(Error::InvalidInput("event cannot cause itself".into()));
        }
        let mut events = self.events.write();
        if !events.contains_key(&parent) {
            return Err(Error::NotFound(parent));
        }
        let child_event = events.get_mut(&child).ok_or(Error::NotFound(child))?;
        child_event.causality_parent = Some(parent);
        child_event.updated_at = Utc::now();
        Ok(())
    }

    async fn count(&self, project_id: &str, filter: &EventFilter) -> Result<usize> {
        let events = self.events.read();
        Ok(events
            .values()
            .filter(|e| e.project_id == project_id && filter.matches(e))
            .count())
    }

    async fn claim_for_consolidation(
        &self,
        project_id: &str,
        window: TimeWindow,
        max_events: usize,
    ) -> Result<Vec<EpisodicEvent>> {
        let mut events = self.events.write();
        let mut eligible: Vec<(chrono::DateTime<Utc>, Uuid)> = events
            .values()
            .filter(|e| {
                e.project_id == project_id
                    && e.lifecycle == Lifecycle::Active
                    && e.timestamp >= window.start
                    && e.timestamp <= window.end
            })
            .map(|e| (e.timestamp, e.id))
            .collect();
        eligible.sort();
        let claimed: Vec<Uuid> = eligible
            .into_iter()
            .take(max_events)
            .map(|(_, id)| id)
            .collect();

        let now = Utc::now();
        let mut snapshot = Vec::with_capacity(claimed.len());
        for id in claimed {
            if let Some(event) = events.get_mut(&id) {
                event.lifecycle = Lifecycle::Consolidating;
                event.updated_at = now;
                snapshot.push(event.clone());
            }
        }
        Ok(snapshot)
    }

    async fn existing_hashes(&self, project_id: &str, hashes: &[String]) -> Result<Vec<String>> {
        let by_hash = self.by_hash.read();
        Ok(hashes
            .iter()
            .filter(|h| by_hash.contains_key(&(project_id.to_string(), (*h).clone())))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    #[tokio::test]
    async fn test_append_dedup_returns_existing_id() {
        let store = InMemoryEpisodicStore::new();
        let first = store
            .append(EpisodicEvent::new("proj", EventType::UserInput, "login failed"))
            .await
            .unwrap();
        let second = store
            .append(EpisodicEvent::new("proj", EventType::UserInput, "login failed"))
            .await
            .unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.id, second.id);

        let filter = EventFilter::default();
        assert_eq!(store.count("proj", &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dedup_is_project_scoped() {
        let store = InMemoryEpisodicStore::new();
        let a = store
            .append(EpisodicEvent::new("proj-a", EventType::UserInput, "same"))
            .await
            .unwrap();
        let b = store
            .append(EpisodicEvent::new("proj-b", EventType::UserInput, "same"))
            .await
            .unwrap();
        assert!(a.inserted && b.inserted);
    }

    #[tokio::test]
    async fn test_batch_dedup_counts() {
        let store = InMemoryEpisodicStore::new();
        let batch = vec![
            EpisodicEvent::new("proj", EventType::UserInput, "e1"),
            EpisodicEvent::new("proj", EventType::UserInput, "e2"),
            EpisodicEvent::new("proj", EventType::UserInput, "e1"),
        ];
        let outcome = store.append_batch(batch).await.unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.skipped_duplicate, 1);
        assert_eq!(outcome.ids.len(), 3);
        assert_eq!(outcome.ids[0], outcome.ids[2]);
    }

    #[tokio::test]
    async fn test_lifecycle_rejects_backward_transition() {
        let store = InMemoryEpisodicStore::new();
        let outcome = store
            .append(EpisodicEvent::new("proj", EventType::UserInput, "x"))
            .await
            .unwrap();

        store
            .mark_lifecycle(&[outcome.id], Lifecycle::Consolidating)
            .await
            .unwrap();
        store
            .mark_lifecycle(&[outcome.id], Lifecycle::Consolidated)
            .await
            .unwrap();

        let err = store
            .mark_lifecycle(&[outcome.id], Lifecycle::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLifecycleTransition { .. }));
    }

    #[tokio::test]
    async fn test_claim_marks_consolidating() {
        let store = InMemoryEpisodicStore::new();
        for i in 0..5 {
            store
                .append(EpisodicEvent::new("proj", EventType::UserInput, format!("e{i}")))
                .await
                .unwrap();
        }

        let window = TimeWindow {
            start: Utc::now() - chrono::Duration::hours(1),
            end: Utc::now() + chrono::Duration::hours(1),
        };
        let claimed = store.claim_for_consolidation("proj", window, 3).await.unwrap();
        assert_eq!(claimed.len(), 3);
        assert!(claimed.iter().all(|e| e.lifecycle == Lifecycle::Consolidating));

        // A second claim only sees the remaining active events
        let second = store.claim_for_consolidation("proj", window, 10).await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_causality_linking() {
        let store = InMemoryEpisodicStore::new();
        let parent = store
            .append(EpisodicEvent::new("proj", EventType::Error, "root cause"))
            .await
            .unwrap();
        let child = store
            .append(EpisodicEvent::new("proj", EventType::Error, "downstream failure"))
            .await
            .unwrap();

        store.link_causality(parent.id, child.id).await.unwrap();
        let loaded = store.get(child.id).await.unwrap().unwrap();
        assert_eq!(loaded.causality_parent, Some(parent.id));

        assert!(store.link_causality(parent.id, parent.id).await.is_err());
    }

    #[tokio::test]
    async fn test_temporal_recall_window() {
        let store = InMemoryEpisodicStore::new();
        let old = EpisodicEvent::new("proj", EventType::UserInput, "old event")
            .with_timestamp(Utc::now() - chrono::Duration::days(2));
        let fresh = EpisodicEvent::new("proj", EventType::UserInput, "fresh event");
        store.append(old).await.unwrap();
        store.append(fresh).await.unwrap();

        let window = TimeWindow {
            start: Utc::now() - chrono::Duration::hours(1),
            end: Utc::now() + chrono::Duration::hours(1),
        };
        let events = store.recall_temporal("proj", window, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content, "fresh event");
    }
}
