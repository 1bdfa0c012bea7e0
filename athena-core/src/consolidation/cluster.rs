//! System-1 clustering of episodic events.
//!
//! Three passes, cheapest first: group by `(session_id, source_id)`, split
//! groups on temporal gaps, then split on embedding similarity. Above the
//! fallback threshold only the session grouping runs, keeping the pass
//! linear in the event count.

use crate::embed::cosine_similarity;
use crate::episodic::EpisodicEvent;
use uuid::Uuid;

/// Clustering knobs, taken from the consolidation config
#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    /// Temporal gap that splits a group, in seconds
    pub gap_seconds: i64,
    /// Cosine threshold for embedding cohesion
    pub min_similarity: f32,
    /// Event count above which only session grouping runs
    pub fallback_threshold: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            gap_seconds: 300,
            min_similarity: 0.78,
            fallback_threshold: 10_000,
        }
    }
}

/// A cluster of events considered one candidate pattern
#[derive(Debug, Clone)]
pub struct EventCluster {
    pub events: Vec<EpisodicEvent>,
}

impl EventCluster {
    #[must_use]
    pub fn event_ids(&self) -> Vec<Uuid> {
        self.events.iter().map(|e| e.id).collect()
    }

    /// Mean of member embeddings; `None` when no member carries one
    #[must_use]
    pub fn centroid(&self) -> Option<Vec<f32>> {
        let vectors: Vec<&Vec<f32>> = self
            .events
            .iter()
            .filter_map(|e| e.embedding.as_ref())
            .collect();
        if vectors.is_empty() {
            return None;
        }
        let dim = vectors[0].len();
        let mut centroid = vec![0.0f32; dim];
        for v in &vectors {
            if v.len() != dim {
                return None;
            }
            for (c, x) in centroid.iter_mut().zip(v.iter()) {
                *c += x;
            }
        }
        let n = vectors.len() as f32;
        for c in &mut centroid {
            *c /= n;
        }
        Some(centroid)
    }
}

/// Cluster a consolidation snapshot.
///
/// Events are sorted by timestamp inside each group so gap splitting is
/// well-defined regardless of select order.
#[must_use]
pub fn cluster_events(events: Vec<EpisodicEvent>, params: &ClusterParams) -> Vec<EventCluster> {
    if events.is_empty() {
        return Vec::new();
    }
    let oversize = events.len() > params.fallback_threshold;

    // Pass 1: session/source grouping
    let mut groups: Vec<Vec<EpisodicEvent>> = Vec::new();
    {
        use std::collections::HashMap;
        let mut by_key: HashMap<(Option<Uuid>, Option<String>), Vec<EpisodicEvent>> =
            HashMap::new();
        for event in events {
            by_key
                .entry((event.session_id, event.source_id.clone()))
                .or_default()
                .push(event);
        }
        // Deterministic order across runs
        let mut keyed: Vec<_> = by_key.into_iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, mut group) in keyed {
            group.sort_by_key(|e| (e.timestamp, e.id));
            groups.push(group);
        }
    }

    if oversize {
        return groups
            .into_iter()
            .map(|events| EventCluster { events })
            .collect();
    }

    // Pass 2: temporal gap splitting
    let mut temporal: Vec<Vec<EpisodicEvent>> = Vec::new();
    for group in groups {
        let mut current: Vec<EpisodicEvent> = Vec::new();
        for event in group {
            let split = current
                .last()
                .is_some_and(|prev: &EpisodicEvent| {
                    (event.timestamp - prev.timestamp).num_seconds() >= params.gap_seconds
                });
            if split {
                temporal.push(std::mem::take(&mut current));
            }
            current.push(event);
        }
        if !current.is_empty() {
            temporal.push(current);
        }
    }

    // Pass 3: embedding cohesion; events without embeddings stay with their
    // temporal cluster
    let mut clusters: Vec<EventCluster> = Vec::new();
    for group in temporal {
        let mut subclusters: Vec<Vec<EpisodicEvent>> = Vec::new();
        for event in group {
            let embedding = event.embedding.clone();
            let slot = match embedding {
                // No embedding: attach to the most recent subcluster
                None => subclusters.len().checked_sub(1),
                Some(embedding) => subclusters.iter().position(|sub| {
                    sub.iter()
                        .filter_map(|e| e.embedding.as_ref())
                        .all(|other| cosine_similarity(&embedding, other) >= params.min_similarity)
                }),
            };
            match slot {
                Some(index) => subclusters[index].push(event),
                None => subclusters.push(vec![event]),
            }
        }
        clusters.extend(
            subclusters
                .into_iter()
                .map(|events| EventCluster { events }),
        );
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;
    use crate::types::EventType;
    use chrono::{Duration, Utc};

    fn event_at(content: &str, offset_s: i64, session: Uuid) -> EpisodicEvent {
        EpisodicEvent::new("proj", EventType::ToolExecution, content)
            .with_session(session)
            .with_timestamp(Utc::now() + Duration::seconds(offset_s))
    }

    #[test]
    fn test_session_grouping() {
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let events = vec![
            event_at("a", 0, s1),
            event_at("b", 1, s2),
            event_at("c", 2, s1),
        ];
        let clusters = cluster_events(events, &ClusterParams::default());
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_temporal_gap_splits() {
        let s = Uuid::new_v4();
        let events = vec![
            event_at("a", 0, s),
            event_at("b", 10, s),
            // 10 minutes later: separate cluster
            event_at("c", 600, s),
        ];
        let clusters = cluster_events(events, &ClusterParams::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters.iter().map(|c| c.events.len()).sum::<usize>(), 3);
    }

    #[test]
    fn test_embedding_split_within_window() {
        let embedder = MockEmbedder::new(64);
        let s = Uuid::new_v4();
        let mut same_a = event_at("database connection error", 0, s);
        same_a.embedding = Some(embedder.generate("database connection error"));
        let mut same_b = event_at("database connection error", 5, s);
        same_b.embedding = Some(embedder.generate("database connection error"));
        let mut different = event_at("weather is sunny", 10, s);
        different.embedding = Some(embedder.generate("weather is sunny"));

        let clusters = cluster_events(vec![same_a, same_b, different], &ClusterParams::default());
        assert_eq!(clusters.len(), 2);
        let sizes: Vec<usize> = {
            let mut s: Vec<usize> = clusters.iter().map(|c| c.events.len()).collect();
            s.sort_unstable();
            s
        };
        assert_eq!(sizes, vec![1, 2]);
    }

    #[test]
    fn test_fallback_keeps_session_grouping_only() {
        let s = Uuid::new_v4();
        let events: Vec<EpisodicEvent> =
            (0..20).map(|i| event_at(&format!("e{i}"), i * 600, s)).collect();
        let params = ClusterParams {
            fallback_threshold: 10,
            ..Default::default()
        };
        // 20 events with huge gaps, but fallback collapses to one session group
        let clusters = cluster_events(events, &params);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn test_centroid_averages_embeddings() {
        let s = Uuid::new_v4();
        let mut a = event_at("a", 0, s);
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = event_at("b", 1, s);
        b.embedding = Some(vec![0.0, 1.0]);
        let cluster = EventCluster { events: vec![a, b] };
        assert_eq!(cluster.centroid(), Some(vec![0.5, 0.5]));
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_events(vec![], &ClusterParams::default()).is_empty());
    }
}
