//! # Manager Facade
//!
//! The public entry point: `remember`, `recall`, `forget`, `consolidate`,
//! and `health`, plus the transport-neutral operation surface in
//! [`ops`]. The facade owns the wiring: stores, clients, engines, gateway,
//! and observer are constructed here in dependency order
//! (config -> stores -> clients -> engines -> facade).

pub mod ops;

use crate::consolidation::{
    spawn_scheduler, ConsolidationEngine, ConsolidationParams, ConsolidationReport,
    ConsolidationStatus,
};
use crate::embed::{EmbeddingProvider, FallbackEmbedder, MockEmbedder};
use crate::error::{Error, Result};
use crate::hash::content_hash;
use crate::ingest::IngestionPipeline;
use crate::inmem::StoreSet;
use crate::llm::{HeuristicLlm, LlmClient};
use crate::observer::Observer;
use crate::retrieval::{RecallItem, RecallOptions, RecallOutput, RetrievalPlanner};
use crate::session::SessionManager;
use crate::types::{AthenaConfig, EventType, Lifecycle, MemoryType, Strategy};
use crate::verify::{Gateway, OpKind, Verification, VerifyItem, VerifyRequest};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

/// What kind of record a `remember` call writes
#[derive(Debug, Clone)]
pub enum RememberKind {
    /// An episodic event
    Event(EventType),
    /// A directly stored semantic memory
    Semantic(MemoryType),
}

/// A recall response after verification
#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub results: Vec<RecallItem>,
    pub used_tier: u8,
    pub cache_hit: bool,
    pub degraded: bool,
    pub verification: Verification,
}

/// Aggregated component health
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub health_score: f32,
    pub embedder_available: bool,
    pub llm_available: bool,
    pub consolidation: ConsolidationStatus,
    pub pending_ingest: usize,
}

/// The memory engine facade
pub struct AthenaMemory {
    config: AthenaConfig,
    stores: StoreSet,
    embedder: Arc<FallbackEmbedder>,
    llm: Arc<dyn LlmClient>,
    observer: Arc<Observer>,
    gateway: Gateway,
    planner: Arc<RetrievalPlanner>,
    consolidation: Arc<ConsolidationEngine>,
    sessions: SessionManager,
    pipeline: Arc<IngestionPipeline>,
    scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for AthenaMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl AthenaMemory {
    /// In-memory engine with mock embeddings and the heuristic LLM
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AthenaConfig::default())
    }

    /// In-memory engine with custom configuration
    #[must_use]
    pub fn with_config(config: AthenaConfig) -> Self {
        let stores = StoreSet::in_memory(config.embed.dimension);
        let embedder = Arc::new(
            MockEmbedder::new(config.embed.dimension).with_batch_max(config.embed.batch_max),
        ) as Arc<dyn EmbeddingProvider>;
        let llm = Arc::new(HeuristicLlm::new()) as Arc<dyn LlmClient>;
        Self::with_stores(config, stores, embedder, llm)
    }

    /// Engine over explicit stores and clients (the durable-backend path)
    #[must_use]
    pub fn with_stores(
        config: AthenaConfig,
        stores: StoreSet,
        provider: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let embedder = Arc::new(FallbackEmbedder::new(provider));
        let observer = Arc::new(Observer::default());
        let gateway = Gateway::new(config.verify.clone(), observer.clone());

        let planner = Arc::new(RetrievalPlanner::new(
            stores.episodic.clone(),
            stores.semantic.clone(),
            stores.procedural.clone(),
            stores.prospective.clone(),
            stores.graph.clone(),
            stores.working.clone(),
            stores.meta.clone(),
            embedder.clone(),
            llm.clone(),
            config.recall.clone(),
        ));

        let consolidation = Arc::new(ConsolidationEngine::new(
            stores.episodic.clone(),
            stores.semantic.clone(),
            stores.procedural.clone(),
            stores.graph.clone(),
            stores.meta.clone(),
            embedder.clone(),
            llm.clone(),
            observer.clone(),
            config.consol.clone(),
        ));

        let sessions = SessionManager::new(
            stores.sessions.clone(),
            stores.episodic.clone(),
            stores.semantic.clone(),
            stores.working.clone(),
            consolidation.clone(),
            config.consol.clone(),
        );

        let pipeline = Arc::new(
            IngestionPipeline::new(
                stores.episodic.clone(),
                stores.cursors.clone(),
                embedder.clone(),
                config.ingest.clone(),
            )
            .with_prospective(stores.prospective.clone()),
        );

        Self {
            config,
            stores,
            embedder,
            llm,
            observer,
            gateway,
            planner,
            consolidation,
            sessions,
            pipeline,
            scheduler: Mutex::new(None),
        }
    }

    /// Store new knowledge; routes by kind, embeds, and gates the write
    pub async fn remember(
        &self,
        project_id: &str,
        content: &str,
        kind: RememberKind,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Uuid> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("remember content is empty".into()));
        }

        // Cardinality gate before any write
        let request = VerifyRequest {
            op: OpKind::Store,
            operation: "remember".to_string(),
            items: Vec::new(),
            k: 1,
            payload_bytes: Some(content.len()),
            batch_len: Some(1),
            expected_dimension: self.config.embed.dimension,
            latency_ms: None,
        };
        self.gateway.verify(&request)?;

        let id = match kind {
            RememberKind::Event(event_type) => {
                let mut event =
                    crate::episodic::EpisodicEvent::new(project_id, event_type, content);
                if let Some(metadata) = metadata {
                    event = event.with_context(metadata);
                }
                let embedded = self.embedder.embed(content).await;
                if !embedded.degraded {
                    event.embedding = embedded.vectors.into_iter().next();
                }
                self.stores.episodic.append(event).await?.id
            }
            RememberKind::Semantic(memory_type) => {
                let embedded = self.embedder.embed(content).await;
                let memory = crate::semantic::SemanticMemory::new(
                    project_id,
                    content,
                    memory_type,
                    embedded.vectors.into_iter().next().unwrap_or_default(),
                );
                let id = memory.id;
                self.stores.semantic.upsert(memory).await?;
                id
            }
        };

        self.planner.invalidate(project_id);
        Ok(id)
    }

    /// Retrieve knowledge through the planner and the verification gateway
    pub async fn recall(&self, query: &str, options: &RecallOptions) -> Result<RecallResponse> {
        let started = Instant::now();
        let output = self.planner.recall(query, options).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.verify_recall(query, options, output, latency_ms)
    }

    fn verify_recall(
        &self,
        _query: &str,
        options: &RecallOptions,
        output: RecallOutput,
        latency_ms: u64,
    ) -> Result<RecallResponse> {
        let k = if options.k == 0 {
            self.config.recall.k_default
        } else {
            options.k
        };
        let items: Vec<VerifyItem> = output
            .results
            .iter()
            .map(|r| VerifyItem {
                id: r.id,
                score: r.score,
                consolidated_semantic: r.consolidated_semantic,
                provenance_count: r.provenance_count,
                contradiction: false,
                vector_len: r.vector_len,
                age_seconds: r.age_seconds,
                durable: r.durable,
            })
            .collect();

        let request = VerifyRequest {
            op: OpKind::Retrieve,
            operation: "recall".to_string(),
            items,
            k,
            payload_bytes: None,
            batch_len: None,
            expected_dimension: self.config.embed.dimension,
            latency_ms: Some(latency_ms),
        };
        let verification = self.gateway.verify(&request)?;

        // Apply remediation: drop flagged items, cap the list
        let mut results: Vec<RecallItem> = output
            .results
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !verification.drop_indices.contains(i))
            .map(|(_, item)| item)
            .collect();
        if let Some(cap) = verification.cap_to {
            results.truncate(cap);
        }

        Ok(RecallResponse {
            results,
            used_tier: output.used_tier,
            cache_hit: output.cache_hit,
            degraded: output.degraded,
            verification,
        })
    }

    /// Archive or delete a record, protecting consolidated provenance
    pub async fn forget(&self, project_id: &str, id: Uuid) -> Result<()> {
        // Episodic events archive in place; provenance rows never disappear
        if self.stores.episodic.get(id).await?.is_some() {
            self.stores
                .episodic
                .mark_lifecycle(&[id], Lifecycle::Archived)
                .await?;
            self.planner.invalidate(project_id);
            return Ok(());
        }

        let semantics = self.stores.semantic.fetch_by_ids(&[id]).await?;
        let Some(memory) = semantics.into_iter().next() else {
            return Err(Error::NotFound(id));
        };

        let provenance: Vec<Uuid> = memory.provenance.iter().copied().collect();
        if !provenance.is_empty() {
            let dependents = self
                .stores
                .semantic
                .referencing_provenance(project_id, &provenance, id)
                .await?;
            if !dependents.is_empty() {
                return Err(Error::IntegrityViolation {
                    reason: format!(
                        "semantic {id} shares provenance with {} consolidated item(s)",
                        dependents.len()
                    ),
                    hint: "archive the memory instead of deleting it".to_string(),
                });
            }
        }

        self.stores.semantic.delete(id).await?;
        self.planner.invalidate(project_id);
        Ok(())
    }

    /// Run one consolidation pass
    pub async fn consolidate(&self, params: &ConsolidationParams) -> Result<ConsolidationReport> {
        let report = self.consolidation.run(params).await?;
        self.planner.invalidate(&params.project_id);
        Ok(report)
    }

    /// Start scheduled consolidation for a project; replaces a prior schedule
    pub fn schedule_consolidation(&self, project_id: &str, strategy: Strategy) {
        let mut params = ConsolidationParams::for_project(project_id, &self.config.consol);
        params.strategy = strategy;
        let interval = Duration::from_secs(self.config.consol.window_s);
        let handle = spawn_scheduler(self.consolidation.clone(), params, interval);
        let mut scheduler = self.scheduler.lock();
        if let Some(previous) = scheduler.replace(handle) {
            previous.abort();
        }
        info!("Scheduled consolidation for {project_id} every {interval:?}");
    }

    /// Stop scheduled consolidation
    pub fn stop_schedule(&self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
        }
    }

    /// Aggregate component health
    pub async fn health(&self) -> HealthReport {
        let (embedder, llm) = futures::join!(self.embedder.health(), self.llm.health());
        let score = self.observer.health_score(Utc::now());
        let consolidation = self.consolidation.status();
        HealthReport {
            healthy: embedder.available && score.score >= 0.5,
            health_score: score.score,
            embedder_available: embedder.available,
            llm_available: llm.available,
            consolidation,
            pending_ingest: self.pipeline.pending(),
        }
    }

    /// Maintenance pass: decay sweep plus archival of old consolidated events
    pub async fn optimize(&self, project_id: &str) -> Result<OptimizeReport> {
        let dropped = self
            .stores
            .working
            .apply_decay(project_id, Utc::now())
            .await?;

        let cutoff = Utc::now() - chrono::Duration::days(90);
        let filter = crate::episodic::EventFilter {
            lifecycle: Some(Lifecycle::Consolidated),
            until: Some(cutoff),
            ..Default::default()
        };
        let stale = self
            .stores
            .episodic
            .list(project_id, &filter, 1000, 0)
            .await?;
        let stale_ids: Vec<Uuid> = stale.iter().map(|e| e.id).collect();
        if !stale_ids.is_empty() {
            self.stores
                .episodic
                .mark_lifecycle(&stale_ids, Lifecycle::Archived)
                .await?;
        }

        Ok(OptimizeReport {
            working_memory_dropped: dropped,
            events_archived: stale_ids.len(),
        })
    }

    /// Content hash helper exposed for callers building events off-process
    #[must_use]
    pub fn hash_payload(&self, payload: &serde_json::Value) -> String {
        content_hash(payload)
    }

    /// Drop cached recall results for a project after an out-of-band write
    pub fn invalidate_recall(&self, project_id: &str) {
        self.planner.invalidate(project_id);
    }

    /// Recall cache effectiveness counters
    #[must_use]
    pub fn recall_cache_metrics(&self) -> crate::retrieval::RecallCacheMetrics {
        self.planner.cache_metrics()
    }

    // Accessors used by the operation surface and tests

    #[must_use]
    pub fn config(&self) -> &AthenaConfig {
        &self.config
    }

    #[must_use]
    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    #[must_use]
    pub fn observer(&self) -> &Arc<Observer> {
        &self.observer
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    #[must_use]
    pub fn consolidation_status(&self) -> ConsolidationStatus {
        self.consolidation.status()
    }
}

impl Drop for AthenaMemory {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
        }
    }
}

/// Result of an `optimize` maintenance pass
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub working_memory_dropped: usize,
    pub events_archived: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remember_then_recall_sees_the_write() {
        let memory = AthenaMemory::new();
        let id = memory
            .remember(
                "proj",
                "the staging database rejects connections during backups",
                RememberKind::Semantic(MemoryType::Fact),
                None,
            )
            .await
            .unwrap();

        let options = RecallOptions::for_project("proj").with_k(5);
        let response = memory
            .recall("staging database connections", &options)
            .await
            .unwrap();
        assert!(response.results.iter().any(|r| r.id == id));
        assert!(!response.results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let memory = AthenaMemory::new();
        let options = RecallOptions::for_project("proj");
        let err = memory.recall("  ", &options).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_forget_event_archives() {
        let memory = AthenaMemory::new();
        let id = memory
            .remember(
                "proj",
                "temporary observation",
                RememberKind::Event(EventType::AgentOutput),
                None,
            )
            .await
            .unwrap();

        memory.forget("proj", id).await.unwrap();
        let event = memory.stores().episodic.get(id).await.unwrap().unwrap();
        assert_eq!(event.lifecycle, Lifecycle::Archived);
    }

    #[tokio::test]
    async fn test_forget_unknown_id() {
        let memory = AthenaMemory::new();
        let err = memory.forget("proj", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remember_recall_round_trip_scores_above_floor() {
        let memory = AthenaMemory::new();
        let text = "retry with exponential backoff fixed the flaky sync";
        memory
            .remember("proj", text, RememberKind::Semantic(MemoryType::Insight), None)
            .await
            .unwrap();

        let options = RecallOptions::for_project("proj").with_k(1);
        let response = memory.recall(text, &options).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.results[0].score >= memory.config().recall.min_similarity);
    }

    #[tokio::test]
    async fn test_oversized_payload_fails_hard_and_writes_nothing() {
        let memory = AthenaMemory::new();
        let huge = "x".repeat(2 * 1024 * 1024);
        let err = memory
            .remember("proj", &huge, RememberKind::Semantic(MemoryType::Fact), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VerificationFailed { .. }));

        let count = memory
            .stores()
            .semantic
            .count("proj", &crate::semantic::SemanticFilter::default())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_health_reports_healthy_defaults() {
        let memory = AthenaMemory::new();
        let health = memory.health().await;
        assert!(health.healthy);
        assert!(health.embedder_available);
        assert!(health.llm_available);
    }
}
