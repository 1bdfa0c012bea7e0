//! # Consolidation Engine
//!
//! Dual-process promotion of episodic events into semantic, procedural, and
//! graph knowledge. System 1 clusters and scores heuristically; System 2
//! validates low-confidence clusters through the LLM client. Runs on demand,
//! on a schedule, or at session end.
//!
//! A run claims its snapshot transactionally (events move to
//! `consolidating`), so concurrent runs never double-promote. Failed
//! promotions release their events back to `active` and land in the
//! decision log.

mod cluster;
mod extract;
mod validate;

pub use cluster::{cluster_events, ClusterParams, EventCluster};
pub use extract::{extract_pattern, CandidatePattern, PatternFeatures};
pub use validate::{compress_description, needs_validation, validate_candidate, ValidationOutcome};

use crate::embed::FallbackEmbedder;
use crate::episodic::{EpisodicStore, TimeWindow};
use crate::error::Result;
use crate::graph::GraphStore;
use crate::hash::{content_hash, deterministic_uuid};
use crate::llm::LlmClient;
use crate::meta::{MetaStore, QualityMetrics};
use crate::observer::Observer;
use crate::procedural::{Procedure, ProceduralStore, ProcedureStep};
use crate::semantic::{SemanticMemory, SemanticStore};
use crate::types::{ConsolConfig, ConsolidationState, Lifecycle, Strategy, SubjectKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parameters for one consolidation run
#[derive(Debug, Clone)]
pub struct ConsolidationParams {
    pub project_id: String,
    pub max_events: usize,
    /// Window to draw events from; defaults to everything up to now
    pub time_window: Option<TimeWindow>,
    pub strategy: Strategy,
    /// Restrict to one session (used by session end)
    pub session_id: Option<Uuid>,
}

impl ConsolidationParams {
    #[must_use]
    pub fn for_project(project_id: impl Into<String>, config: &ConsolConfig) -> Self {
        Self {
            project_id: project_id.into(),
            max_events: config.max_events,
            time_window: None,
            strategy: config.strategy,
            session_id: None,
        }
    }
}

/// Report from one consolidation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub selected_events: usize,
    pub clusters: usize,
    pub promoted_semantic: usize,
    pub promoted_procedures: usize,
    pub entities_upserted: usize,
    pub relations_upserted: usize,
    pub rejected_clusters: usize,
    pub failed_clusters: usize,
    pub degraded: bool,
    pub duration_ms: u64,
}

/// Status of scheduled consolidation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationStatus {
    pub running: bool,
    pub last_report: Option<ConsolidationReport>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub runs_completed: u64,
}

/// The engine wiring stores, clients, and config
pub struct ConsolidationEngine {
    episodic: Arc<dyn EpisodicStore>,
    semantic: Arc<dyn SemanticStore>,
    procedural: Arc<dyn ProceduralStore>,
    graph: Arc<dyn GraphStore>,
    meta: Arc<dyn MetaStore>,
    embedder: Arc<FallbackEmbedder>,
    llm: Arc<dyn LlmClient>,
    observer: Arc<Observer>,
    config: ConsolConfig,
    status: parking_lot::Mutex<ConsolidationStatus>,
}

impl ConsolidationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        episodic: Arc<dyn EpisodicStore>,
        semantic: Arc<dyn SemanticStore>,
        procedural: Arc<dyn ProceduralStore>,
        graph: Arc<dyn GraphStore>,
        meta: Arc<dyn MetaStore>,
        embedder: Arc<FallbackEmbedder>,
        llm: Arc<dyn LlmClient>,
        observer: Arc<Observer>,
        config: ConsolConfig,
    ) -> Self {
        Self {
            episodic,
            semantic,
            procedural,
            graph,
            meta,
            embedder,
            llm,
            observer,
            config,
            status: parking_lot::Mutex::new(ConsolidationStatus::default()),
        }
    }

    /// Scheduled-run status snapshot
    #[must_use]
    pub fn status(&self) -> ConsolidationStatus {
        self.status.lock().clone()
    }

    /// Execute one run
    pub async fn run(&self, params: &ConsolidationParams) -> Result<ConsolidationReport> {
        let started = Instant::now();
        {
            let mut status = self.status.lock();
            status.running = true;
        }
        let result = self.run_inner(params, started).await;
        {
            let mut status = self.status.lock();
            status.running = false;
            status.last_run_at = Some(Utc::now());
            status.runs_completed += 1;
            if let Ok(ref report) = result {
                status.last_report = Some(report.clone());
            }
        }
        result
    }

    async fn run_inner(
        &self,
        params: &ConsolidationParams,
        started: Instant,
    ) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport::default();
        let deadline = Duration::from_millis(self.config.run_cap_ms);

        // Phase 1: claim a consistent snapshot
        let window = params.time_window.unwrap_or(TimeWindow {
            start: Utc::now() - ChronoDuration::days(365),
            end: Utc::now(),
        });
        let mut events = self
            .episodic
            .claim_for_consolidation(&params.project_id, window, params.max_events)
            .await?;
        if let Some(session_id) = params.session_id {
            // Session-end runs consolidate only their own events; the rest
            // are released untouched
            let (mine, others): (Vec<_>, Vec<_>) =
                events.into_iter().partition(|e| e.session_id == Some(session_id));
            if !others.is_empty() {
                let other_ids: Vec<Uuid> = others.iter().map(|e| e.id).collect();
                self.episodic
                    .mark_lifecycle(&other_ids, Lifecycle::Active)
                    .await?;
            }
            events = mine;
        }
        report.selected_events = events.len();
        if events.is_empty() {
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }
        info!(
            "Consolidation claimed {} events for project {}",
            events.len(),
            params.project_id
        );

        // Phase 2: System-1 clustering
        let cluster_params = ClusterParams {
            gap_seconds: self.config.cluster_gap_s,
            min_similarity: self.config.cluster_similarity,
            fallback_threshold: self.config.cluster_fallback_n,
        };
        let clusters = cluster_events(events, &cluster_params);
        report.clusters = clusters.len();

        // Existing pool for the novelty feature
        let existing = self.semantic.list_all(&params.project_id, 500).await?;

        // Phases 3-7 per cluster; partial success is allowed
        let mut boundary: Vec<(Option<Uuid>, DateTime<Utc>, Uuid, DateTime<Utc>, Uuid)> =
            Vec::new();
        for cluster in clusters {
            if started.elapsed() > deadline {
                warn!("Consolidation run hit the wall-clock cap, releasing remaining events");
                let ids = cluster.event_ids();
                self.episodic.mark_lifecycle(&ids, Lifecycle::Active).await?;
                report.failed_clusters += 1;
                continue;
            }

            let ids = cluster.event_ids();
            match self
                .consolidate_cluster(params, cluster, &existing, &mut report)
                .await
            {
                Ok(Some(bounds)) => boundary.push(bounds),
                Ok(None) => {}
                Err(e) => {
                    warn!("Cluster promotion failed, releasing events: {e}");
                    report.failed_clusters += 1;
                    self.observer
                        .record_failure("consolidate", &format!("promotion_failed: {e}"));
                    // Events already finalized by the failed cluster stay
                    // finalized; only the consolidating remainder is released
                    if let Err(release) =
                        self.episodic.mark_lifecycle(&ids, Lifecycle::Active).await
                    {
                        warn!("Lifecycle release after failure skipped: {release}");
                    }
                }
            }
        }

        // Phase 7: causality across cluster boundaries where timestamps agree
        boundary.sort_by_key(|(_, first_ts, _, _, _)| *first_ts);
        for pair in boundary.windows(2) {
            let (session_a, _, _, last_ts_a, last_id_a) = &pair[0];
            let (session_b, first_ts_b, first_id_b, _, _) = &pair[1];
            let gap = (*first_ts_b - *last_ts_a).num_seconds();
            if session_a == session_b && (0..self.config.cluster_gap_s).contains(&gap) {
                if let Err(e) = self.episodic.link_causality(*last_id_a, *first_id_b).await {
                    debug!("Causality link skipped: {e}");
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Consolidation run finished: {} semantic, {} procedures, {} clusters ({} failed), degraded={}",
            report.promoted_semantic,
            report.promoted_procedures,
            report.clusters,
            report.failed_clusters,
            report.degraded
        );
        Ok(report)
    }

    /// Phases 3-7 for one cluster. Returns the cluster's session and
    /// boundary timestamps for causality linking.
    #[allow(clippy::type_complexity)]
    async fn consolidate_cluster(
        &self,
        params: &ConsolidationParams,
        cluster: EventCluster,
        existing: &[SemanticMemory],
        report: &mut ConsolidationReport,
    ) -> Result<Option<(Option<Uuid>, DateTime<Utc>, Uuid, DateTime<Utc>, Uuid)>> {
        let session = cluster.events[0].session_id;
        let first = cluster
            .events
            .iter()
            .min_by_key(|e| e.timestamp)
            .map(|e| (e.timestamp, e.id));
        let last = cluster
            .events
            .iter()
            .max_by_key(|e| e.timestamp)
            .map(|e| (e.timestamp, e.id));

        // Phase 3: heuristic extraction
        let candidate = extract_pattern(cluster, existing);
        let event_ids = candidate.cluster.event_ids();

        // Phase 4: System-2 validation when warranted
        let validated = if needs_validation(&candidate, params.strategy, self.config.sys2_threshold)
        {
            let outcome = validate_candidate(
                self.llm.as_ref(),
                &candidate,
                Duration::from_millis(10_000),
                512,
            )
            .await;
            if outcome.degraded {
                report.degraded = true;
                self.observer.record_failure("consolidate", "llm_timeout");
            }
            Some(outcome)
        } else {
            None
        };

        let (accepted, mut description, confidence) = match &validated {
            Some(v) => (v.accepted, v.refined_description.clone(), v.confidence),
            None => (
                candidate.system1_confidence >= 0.3,
                candidate.description.clone(),
                candidate.system1_confidence,
            ),
        };

        if !accepted {
            debug!("Cluster rejected at confidence {confidence:.2}");
            report.rejected_clusters += 1;
            // Rejected observations stay episodic and become eligible again
            self.episodic
                .mark_lifecycle(&event_ids, Lifecycle::Active)
                .await?;
            return Ok(None);
        }

        // Phase 5: compression only on the externally validated path
        let compression_ratio = if validated.as_ref().is_some_and(|v| !v.degraded) {
            let before = description.len().max(1);
            description = compress_description(
                &description,
                self.config.compression_target,
                self.config.semantic_preserve_min,
            );
            description.len() as f32 / before as f32
        } else {
            1.0
        };

        // Phase 6: promotion. Deterministic id so re-promoting the same
        // frozen snapshot upserts rather than duplicates.
        let semantic_hash = content_hash(&serde_json::json!({
            "project_id": params.project_id,
            "content": description,
        }));
        let embedded = self.embedder.embed(&description).await;
        if embedded.degraded {
            report.degraded = true;
        }
        let mut memory = SemanticMemory::new(
            &params.project_id,
            description,
            candidate.memory_type,
            embedded.vectors.into_iter().next().unwrap_or_default(),
        );
        memory.id = deterministic_uuid(&format!("semantic:{semantic_hash}"));
        memory.provenance = event_ids.iter().copied().collect();
        memory.confidence = confidence;
        memory.consolidation_state = ConsolidationState::Consolidated;
        self.semantic.upsert(memory).await?;
        report.promoted_semantic += 1;

        // Graph extraction: co-occurring entities with weight increments
        let entities = &candidate.entities;
        for pair in entities.windows(2) {
            self.graph
                .upsert_relation_by_names(&params.project_id, &pair[0], &pair[1], "co_occurs_with")
                .await?;
            report.relations_upserted += 1;
        }
        report.entities_upserted += entities.len();

        // Procedure extraction for repeated successful action sequences
        if let Some(sequence) = &candidate.action_sequence {
            let name = procedure_name(sequence);
            let steps: Vec<ProcedureStep> = sequence
                .iter()
                .map(|action| ProcedureStep::new(action.clone()))
                .collect();
            let versions = self.procedural.versions(&params.project_id, &name).await?;
            if versions.is_empty() {
                let procedure = Procedure::new(&params.project_id, &name, steps)
                    .with_trigger(regex::escape(&sequence[0]))
                    .with_description(candidate.description.clone());
                self.procedural.create(procedure).await?;
                report.promoted_procedures += 1;
            } else if versions.last().is_some_and(|v| {
                v.steps.iter().map(|s| &s.action).ne(sequence.iter())
            }) {
                self.procedural
                    .new_version(&params.project_id, &name, steps, "updated action sequence")
                    .await?;
                report.promoted_procedures += 1;
            }
        }

        // Phase 7: finalize lifecycle and meta quality
        self.episodic
            .mark_lifecycle(&event_ids, Lifecycle::Consolidated)
            .await?;
        self.meta
            .record_quality(
                &params.project_id,
                SubjectKind::Domain,
                "semantic",
                QualityMetrics::new(1.0 - compression_ratio.min(1.0), confidence, 0.5),
            )
            .await?;

        match (first, last) {
            (Some((first_ts, first_id)), Some((last_ts, last_id))) => {
                Ok(Some((session, first_ts, first_id, last_ts, last_id)))
            }
            _ => Ok(None),
        }
    }
}

/// Stable procedure name from an action sequence
fn procedure_name(sequence: &[String]) -> String {
    let head = sequence
        .first()
        .map(String::as_str)
        .unwrap_or("sequence");
    let slug: String = head
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    format!("learned-{}", slug.trim_matches('-'))
}

/// Spawn a background task running consolidation every `interval`.
///
/// The handle must be aborted at shutdown; a run failure is logged, not
/// fatal to the schedule.
pub fn spawn_scheduler(
    engine: Arc<ConsolidationEngine>,
    params: ConsolidationParams,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so "every N" means N
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = engine.run(&params).await {
                warn!("Scheduled consolidation failed: {e}");
            }
        }
    })
}
