//! The ingestion pipeline: dedup, hash, existence check, enrichment,
//! persistence, and statistics.
//!
//! Stage order per batch:
//! 1. in-memory LRU dedup on content hash (and in-batch duplicates)
//! 2. canonical hash recomputation
//! 3. bulk existence check against the store
//! 4. best-effort batch embedding (skipped when the client is degraded)
//! 5. transactional persistence
//! 6. statistics rollup, trigger evaluation, and cursor save
//!
//! Per-source failures never stop other sources; transient failures retry
//! with the ingestion backoff schedule.

use super::rate::TokenBucket;
use super::source::{CursorStore, EventSource};
use super::stats::IngestStats;
use crate::embed::FallbackEmbedder;
use crate::episodic::{EpisodicEvent, EpisodicStore};
use crate::error::Result;
use crate::hash::event_content_hash;
use crate::prospective::ProspectiveStore;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::types::IngestConfig;
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-batch ingestion report
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub inserted: usize,
    pub skipped_duplicate: usize,
    pub degraded: bool,
}

/// Per-source run report
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub source_id: String,
    pub batches: usize,
    pub inserted: usize,
    pub skipped_duplicate: usize,
    pub failed: bool,
    pub error: Option<String>,
}

/// Multi-source event intake with dedup, batching, and retry
pub struct IngestionPipeline {
    episodic: Arc<dyn EpisodicStore>,
    cursors: Arc<dyn CursorStore>,
    embedder: Arc<FallbackEmbedder>,
    prospective: Option<Arc<dyn ProspectiveStore>>,
    config: IngestConfig,
    dedup: Mutex<LruCache<String, ()>>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    /// Per-source submit buffers awaiting a size or time flush
    buffers: Mutex<HashMap<String, (Vec<EpisodicEvent>, Instant)>>,
    stats: Arc<IngestStats>,
    pending: AtomicUsize,
    retry: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(
        episodic: Arc<dyn EpisodicStore>,
        cursors: Arc<dyn CursorStore>,
        embedder: Arc<FallbackEmbedder>,
        config: IngestConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.dedup_cache_size.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            episodic,
            cursors,
            embedder,
            prospective: None,
            retry: RetryPolicy::new(
                RetryConfig::ingestion().with_max_retries(config.retries_max),
            ),
            config,
            dedup: Mutex::new(LruCache::new(capacity)),
            buckets: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            stats: Arc::new(IngestStats::new()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Wire the prospective store so inbound events evaluate task triggers
    #[must_use]
    pub fn with_prospective(mut self, prospective: Arc<dyn ProspectiveStore>) -> Self {
        self.prospective = Some(prospective);
        self
    }

    /// Shared statistics handle
    #[must_use]
    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Events currently buffered for persistence; drives back-pressure
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Buffer one event for batched ingestion; flushes when the buffer
    /// reaches `ingest.batch_size` or `ingest.flush_ms` has elapsed since the
    /// first buffered event
    pub async fn submit(
        &self,
        source_id: &str,
        event: EpisodicEvent,
    ) -> Result<Option<BatchReport>> {
        let due = {
            let mut buffers = self.buffers.lock();
            let (events, started) = buffers
                .entry(source_id.to_string())
                .or_insert_with(|| (Vec::new(), Instant::now()));
            if events.is_empty() {
                *started = Instant::now();
            }
            events.push(event);
            match should_flush(events.len(), started.elapsed(), &self.config) {
                FlushReason::NotYet => None,
                _ => Some(std::mem::take(events)),
            }
        };
        match due {
            Some(events) => Ok(Some(self.ingest_batch(source_id, events).await?)),
            None => Ok(None),
        }
    }

    /// Flush every submit buffer regardless of thresholds
    pub async fn flush(&self) -> Result<Vec<(String, BatchReport)>> {
        let drained: Vec<(String, Vec<EpisodicEvent>)> = {
            let mut buffers = self.buffers.lock();
            buffers
                .iter_mut()
                .filter(|(_, (events, _))| !events.is_empty())
                .map(|(source, (events, _))| (source.clone(), std::mem::take(events)))
                .collect()
        };
        let mut reports = Vec::with_capacity(drained.len());
        for (source_id, events) in drained {
            let report = self.ingest_batch(&source_id, events).await?;
            reports.push((source_id, report));
        }
        Ok(reports)
    }

    /// Ingest one batch through all pipeline stages
    pub async fn ingest_batch(
        &self,
        source_id: &str,
        mut events: Vec<EpisodicEvent>,
    ) -> Result<BatchReport> {
        if events.is_empty() {
            return Ok(BatchReport::default());
        }

        let total = events.len();
        self.pending.fetch_add(total, Ordering::Relaxed);
        let result = self.ingest_batch_inner(source_id, &mut events).await;
        self.pending.fetch_sub(total, Ordering::Relaxed);
        result
    }

    async fn ingest_batch_inner(
        &self,
        source_id: &str,
        events: &mut Vec<EpisodicEvent>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        // Stage 2 first on the raw batch: trust nothing a caller assembled
        for event in events.iter_mut() {
            event.content_hash = event_content_hash(
                event.event_type.as_str(),
                &event.content,
                &event.structured_context,
            );
        }

        // Stage 1: in-memory dedup cache plus in-batch duplicates
        let mut fresh: Vec<EpisodicEvent> = Vec::with_capacity(events.len());
        {
            let mut cache = self.dedup.lock();
            let mut seen_in_batch: HashSet<String> = HashSet::new();
            for event in events.drain(..) {
                let key = format!("{}:{}", event.project_id, event.content_hash);
                if cache.contains(&key) || !seen_in_batch.insert(key.clone()) {
                    report.skipped_duplicate += 1;
                } else {
                    fresh.push(event);
                }
            }
        }
        if fresh.is_empty() {
            self.stats
                .record_batch(source_id, 0, report.skipped_duplicate, 0);
            return Ok(report);
        }

        // Stage 3: bulk existence check in the store, grouped per project
        // because the hash index is project-scoped
        let mut by_project: HashMap<String, Vec<String>> = HashMap::new();
        for event in &fresh {
            by_project
                .entry(event.project_id.clone())
                .or_default()
                .push(event.content_hash.clone());
        }
        let mut existing: HashSet<(String, String)> = HashSet::new();
        for (project_id, hashes) in by_project {
            for hash in self.episodic.existing_hashes(&project_id, &hashes).await? {
                existing.insert((project_id.clone(), hash));
            }
        }
        let (to_insert, skipped): (Vec<_>, Vec<_>) = fresh.into_iter().partition(|e| {
            !existing.contains(&(e.project_id.clone(), e.content_hash.clone()))
        });
        report.skipped_duplicate += skipped.len();

        let mut to_insert = to_insert;

        // Stage 4: best-effort enrichment; degraded output is dropped so
        // mock vectors never pollute semantic scoring
        let needs_embedding: Vec<usize> = to_insert
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if !needs_embedding.is_empty() {
            let texts: Vec<String> = needs_embedding
                .iter()
                .map(|&i| to_insert[i].content.clone())
                .collect();
            let embedded = self.embedder.embed_batch(&texts).await;
            if embedded.degraded {
                debug!("Embedding client degraded, skipping enrichment for batch");
                report.degraded = true;
            } else {
                for (&i, vector) in needs_embedding.iter().zip(embedded.vectors) {
                    to_insert[i].embedding = Some(vector);
                }
            }
        }

        // Stage 5: transactional persistence with retry on transient errors
        let attempts = AtomicUsize::new(0);
        let outcome = {
            let episodic = self.episodic.clone();
            let batch = to_insert.clone();
            self.retry
                .execute(|| {
                    attempts.fetch_add(1, Ordering::Relaxed);
                    let episodic = episodic.clone();
                    let batch = batch.clone();
                    async move { episodic.append_batch(batch).await }
                })
                .await
        };
        let retried = attempts.load(Ordering::Relaxed).saturating_sub(1);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.record_failure(source_id, to_insert.len());
                return Err(e);
            }
        };

        report.inserted = outcome.inserted;
        report.skipped_duplicate += outcome.skipped_duplicate;

        // Successful commit: remember hashes in the dedup cache
        {
            let mut cache = self.dedup.lock();
            for event in &to_insert {
                cache.put(format!("{}:{}", event.project_id, event.content_hash), ());
            }
        }

        // Stage 6: statistics and prospective trigger evaluation
        self.stats
            .record_batch(source_id, report.inserted, report.skipped_duplicate, retried);
        if let Some(ref prospective) = self.prospective {
            let now = Utc::now();
            for event in &to_insert {
                if let Err(e) = prospective
                    .fire_triggers(&event.project_id, now, Some(event))
                    .await
                {
                    warn!("Trigger evaluation failed for inbound event: {e}");
                }
            }
        }

        Ok(report)
    }

    /// Drain one source completely, honoring rate limits, back-pressure, and
    /// cursor persistence
    pub async fn run_source(&self, source: &mut dyn EventSource) -> SourceReport {
        let source_id = source.id().to_string();
        let mut report = SourceReport {
            source_id: source_id.clone(),
            ..Default::default()
        };

        if !source.validate() {
            report.failed = true;
            report.error = Some("source validation failed".to_string());
            return report;
        }

        if source.supports_incremental() {
            match self.cursors.get_cursor(&source_id).await {
                Ok(Some(cursor)) => source.set_cursor(&cursor.cursor_blob),
                Ok(None) => {}
                Err(e) => warn!("Cursor load failed for {source_id}: {e}"),
            }
        }

        loop {
            // Back-pressure with hysteresis: pause above the high-water mark,
            // resume only once pending falls below the low-water mark
            if self.pending() > self.config.high_water {
                debug!(
                    "Back-pressure engaged for {source_id}, pending={}",
                    self.pending()
                );
                while self.pending() > self.config.low_water {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }

            let batch = match source.generate().await {
                Ok(batch) => batch,
                Err(e) => {
                    report.failed = true;
                    report.error = Some(e.to_string());
                    self.stats.record_failure(&source_id, 0);
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            // Soft rate limit per source
            let wait = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets
                    .entry(source_id.clone())
                    .or_insert_with(|| TokenBucket::per_minute(self.config.rate_limit_per_min));
                if bucket.try_acquire(batch.len()) {
                    None
                } else {
                    Some(bucket.wait_for(batch.len()))
                }
            };
            if let Some(wait) = wait {
                debug!("Rate limit reached for {source_id}, waiting {wait:?}");
                tokio::time::sleep(wait).await;
            }

            match self.ingest_batch(&source_id, batch).await {
                Ok(batch_report) => {
                    report.batches += 1;
                    report.inserted += batch_report.inserted;
                    report.skipped_duplicate += batch_report.skipped_duplicate;
                }
                Err(e) => {
                    report.failed = true;
                    report.error = Some(e.to_string());
                    break;
                }
            }

            // Cursor save only after a successful commit
            if source.supports_incremental() {
                if let Some(cursor) = source.get_cursor() {
                    if let Err(e) = self.cursors.set_cursor(&source_id, &cursor).await {
                        warn!("Cursor save failed for {source_id}: {e}");
                    }
                }
            }
        }

        info!(
            "Source {} drained: {} inserted, {} duplicates, failed={}",
            source_id, report.inserted, report.skipped_duplicate, report.failed
        );
        report
    }

    /// Run every source; one source failing never stops the others
    pub async fn run_all(&self, sources: &mut [Box<dyn EventSource>]) -> Vec<SourceReport> {
        let mut reports = Vec::with_capacity(sources.len());
        for source in sources.iter_mut() {
            reports.push(self.run_source(source.as_mut()).await);
        }
        reports
    }
}

/// Flush decision for buffered submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Elapsed,
    NotYet,
}

/// Decide whether a buffered batch should flush: at `batch_size` events or
/// after `flush_ms` since the first buffered event
#[must_use]
pub fn should_flush(buffered: usize, elapsed: Duration, config: &IngestConfig) -> FlushReason {
    if buffered >= config.batch_size {
        FlushReason::Size
    } else if buffered > 0 && elapsed >= Duration::from_millis(config.flush_ms) {
        FlushReason::Elapsed
    } else {
        FlushReason::NotYet
    }
}
