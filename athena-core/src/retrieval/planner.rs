//! The tier cascade.

use super::cache::{RecallCache, RecallCacheKey};
use super::expansion::QueryExpander;
use super::{layer_weight, RecallItem, RecallOptions, RecallOutput};
use crate::embed::FallbackEmbedder;
use crate::episodic::{EpisodicStore, EventFilter};
use crate::error::{Error, Result};
use crate::graph::GraphStore;
use crate::llm::{generate_with_deadline, LlmClient};
use crate::meta::{layer_attention_weight, MetaStore};
use crate::procedural::ProceduralStore;
use crate::prospective::ProspectiveStore;
use crate::search::{keyword_boost, lexical::normalize_min_max, Bm25Scorer};
use crate::semantic::{SearchParams, SemanticStore};
use crate::types::{MemoryLayer, RecallConfig, SubjectKind, TaskStatus};
use crate::working::WorkingStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cascading recall over all memory layers
pub struct RetrievalPlanner {
    episodic: Arc<dyn EpisodicStore>,
    semantic: Arc<dyn SemanticStore>,
    procedural: Arc<dyn ProceduralStore>,
    prospective: Arc<dyn ProspectiveStore>,
    graph: Arc<dyn GraphStore>,
    working: Arc<dyn WorkingStore>,
    meta: Arc<dyn MetaStore>,
    embedder: Arc<FallbackEmbedder>,
    llm: Arc<dyn LlmClient>,
    expander: QueryExpander,
    cache: RecallCache<RecallOutput>,
    /// Per-project concurrency caps
    project_limits: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Semaphore>>>,
    config: RecallConfig,
}

impl RetrievalPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        episodic: Arc<dyn EpisodicStore>,
        semantic: Arc<dyn SemanticStore>,
        procedural: Arc<dyn ProceduralStore>,
        prospective: Arc<dyn ProspectiveStore>,
        graph: Arc<dyn GraphStore>,
        working: Arc<dyn WorkingStore>,
        meta: Arc<dyn MetaStore>,
        embedder: Arc<FallbackEmbedder>,
        llm: Arc<dyn LlmClient>,
        config: RecallConfig,
    ) -> Self {
        let cache = RecallCache::new(config.cache_size, Duration::from_secs(config.cache_ttl_s));
        Self {
            episodic,
            semantic,
            procedural,
            prospective,
            graph,
            working,
            meta,
            embedder,
            llm,
            expander: QueryExpander::new(),
            cache,
            project_limits: parking_lot::Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Invalidate cached results for a project after any write
    pub fn invalidate(&self, project_id: &str) {
        self.cache.invalidate_project(project_id);
    }

    /// Cache effectiveness counters
    #[must_use]
    pub fn cache_metrics(&self) -> super::RecallCacheMetrics {
        self.cache.metrics()
    }

    /// Run the cascade for a query
    pub async fn recall(&self, query: &str, options: &RecallOptions) -> Result<RecallOutput> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("recall query is empty".into()));
        }
        if options.project_id.is_empty() {
            return Err(Error::InvalidInput("recall project_id is empty".into()));
        }

        let k = if options.k == 0 {
            self.config.k_default
        } else {
            options.k
        };
        let min_similarity = options.min_similarity.unwrap_or(self.config.min_similarity);
        let layers: Vec<MemoryLayer> = if options.layers.is_empty() {
            MemoryLayer::ALL.to_vec()
        } else {
            options.layers.clone()
        };

        let cache_key = RecallCacheKey {
            project_id: options.project_id.clone(),
            query: query.to_string(),
            k,
            cascade_depth: options.cascade_depth,
            layers: layers.iter().map(|l| l.as_str().to_string()).collect(),
        };
        if let Some(mut cached) = self.cache.get(&cache_key) {
            cached.cache_hit = true;
            return Ok(cached);
        }

        // Per-project concurrency cap; held for the whole cascade
        let limiter = {
            let mut limits = self.project_limits.lock();
            limits
                .entry(options.project_id.clone())
                .or_insert_with(|| {
                    Arc::new(tokio::sync::Semaphore::new(
                        self.config.max_concurrent_per_project.max(1),
                    ))
                })
                .clone()
        };
        let _permit = limiter
            .acquire()
            .await
            .map_err(|_| Error::BackendUnavailable("recall limiter closed".into()))?;

        let mut output = RecallOutput::default();

        // Hydrate context: bias the working query by the active task/phase
        let biased_query = match &options.session {
            Some(hint) => {
                let mut parts: Vec<&str> = Vec::new();
                if let Some(task) = hint.task.as_deref() {
                    parts.push(task);
                }
                if let Some(phase) = hint.phase.as_deref() {
                    parts.push(phase);
                }
                if parts.is_empty() {
                    query.to_string()
                } else {
                    format!("{} {query}", parts.join(" "))
                }
            }
            None => query.to_string(),
        };

        // Expansion
        let expand = options.expand_queries.unwrap_or(self.config.expand_queries);
        let queries = if expand {
            self.expander
                .expand(self.llm.as_ref(), &biased_query, Duration::from_millis(500))
                .await
        } else {
            vec![biased_query.clone()]
        };
        output.expanded_queries = queries.clone();

        // Tier 1: parallel per-layer probes under the tier deadline
        let tier1_deadline = Duration::from_millis(self.config.tier_timeouts_ms[0]);
        let per_layer_cap = k * 3;
        let mut candidates = match tokio::time::timeout(
            tier1_deadline,
            self.tier1(&queries, options, &layers, per_layer_cap, min_similarity),
        )
        .await
        {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // Tier-1 deadline passed: best effort is an empty result
                warn!("Tier 1 deadline elapsed for query '{query}'");
                output.used_tier = 0;
                return Ok(output);
            }
        };
        output.used_tier = 1;
        sort_candidates(&mut candidates);

        // Tier 2 when Tier 1 looks weak
        let tier2_wanted = options.cascade_depth >= 2
            && (top_score(&candidates) < self.config.tier2_score_floor || candidates.len() < k);
        if tier2_wanted {
            let tier2_deadline = Duration::from_millis(self.config.tier_timeouts_ms[1]);
            match tokio::time::timeout(
                tier2_deadline,
                self.tier2(&biased_query, options, candidates.clone()),
            )
            .await
            {
                Ok(Ok(reranked)) => {
                    candidates = reranked;
                    output.used_tier = 2;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!("Tier 2 deadline elapsed, serving Tier 1 result");
                }
            }
        }

        // Tier 3 on continued weakness or by explicit request
        let tier3_wanted = output.used_tier >= 2
            && (options.cascade_depth == 3 || top_score(&candidates) < self.config.tier3_score_floor)
            && options.rerank.unwrap_or(true);
        if tier3_wanted {
            let tier3_deadline = Duration::from_millis(self.config.tier_timeouts_ms[2]);
            match tokio::time::timeout(
                tier3_deadline,
                self.tier3(&biased_query, candidates.clone()),
            )
            .await
            {
                Ok((reranked, degraded)) => {
                    candidates = reranked;
                    output.degraded |= degraded;
                    output.used_tier = 3;
                }
                Err(_) => {
                    debug!("Tier 3 deadline elapsed, serving Tier 2 result");
                }
            }
        }

        // Merge, dedup, and trim
        let mut merged = dedup_candidates(candidates);
        merged.retain(|c| c.score >= min_similarity);
        sort_candidates(&mut merged);
        merged.truncate(k.min(self.config.global_cap));
        output.results = merged;

        self.cache.put(&cache_key, output.clone());
        Ok(output)
    }

    /// Fast parallel probes across the selected layers
    async fn tier1(
        &self,
        queries: &[String],
        options: &RecallOptions,
        layers: &[MemoryLayer],
        cap: usize,
        min_similarity: f32,
    ) -> Result<Vec<RecallItem>> {
        let project = options.project_id.as_str();
        let primary = queries.first().map(String::as_str).unwrap_or_default();

        let episodic = async {
            if !layers.contains(&MemoryLayer::Episodic) {
                return Ok::<_, Error>(Vec::new());
            }
            let filter = EventFilter::default();
            let events = self.episodic.list(project, &filter, cap * 2, 0).await?;
            let now = Utc::now();
            Ok(events
                .into_iter()
                .map(|e| {
                    let relevance = queries
                        .iter()
                        .map(|q| keyword_boost(q, &e.content))
                        .fold(0.0f32, f32::max);
                    let age_hours =
                        (now - e.timestamp).num_seconds().max(0) as f32 / 3600.0;
                    let recency = 0.5f32.powf(age_hours / 48.0);
                    RecallItem {
                        layer: MemoryLayer::Episodic,
                        id: e.id,
                        score: 0.7 * relevance + 0.3 * recency,
                        content: e.content,
                        timestamp: e.timestamp,
                        consolidated_semantic: false,
                        provenance_count: 0,
                        vector_len: e.embedding.as_ref().map(Vec::len),
                        durable: true,
                        age_seconds: None,
                    }
                })
                .collect())
        };

        let semantic = async {
            if !layers.contains(&MemoryLayer::Semantic) {
                return Ok::<_, Error>(Vec::new());
            }
            let embedded = self.embedder.embed(primary).await;
            let query_vec = embedded.vectors.into_iter().next().unwrap_or_default();
            let params = SearchParams {
                limit: cap,
                min_similarity,
                ..Default::default()
            };
            let hits = self
                .semantic
                .search(project, primary, &query_vec, &params)
                .await?;
            Ok(hits
                .into_iter()
                .map(|hit| RecallItem {
                    layer: MemoryLayer::Semantic,
                    id: hit.memory.id,
                    score: hit.score,
                    content: hit.memory.content,
                    timestamp: hit.memory.updated_at,
                    consolidated_semantic: hit.memory.consolidation_state
                        == crate::types::ConsolidationState::Consolidated,
                    provenance_count: hit.memory.provenance.len(),
                    vector_len: Some(hit.memory.embedding.len()),
                    durable: true,
                    age_seconds: None,
                })
                .collect())
        };

        let procedural = async {
            if !layers.contains(&MemoryLayer::Procedural) {
                return Ok::<_, Error>(Vec::new());
            }
            let now = Utc::now();
            let procedures = self.procedural.find(project, primary, cap).await?;
            Ok(procedures
                .into_iter()
                .map(|p| RecallItem {
                    layer: MemoryLayer::Procedural,
                    id: p.id,
                    score: p.ranking_score(now),
                    content: format!("{}: {}", p.name, p.description),
                    timestamp: p.updated_at,
                    consolidated_semantic: false,
                    provenance_count: 0,
                    vector_len: None,
                    durable: true,
                    age_seconds: None,
                })
                .collect())
        };

        let prospective = async {
            if !layers.contains(&MemoryLayer::Prospective) {
                return Ok::<_, Error>(Vec::new());
            }
            let now = Utc::now();
            let tasks = self.prospective.list_active(project, cap).await?;
            Ok(tasks
                .into_iter()
                .map(|t| {
                    let text = format!("{} {}", t.title, t.description);
                    let relevance = keyword_boost(primary, &text);
                    let priority = f32::from(t.priority) / 10.0;
                    let age = (now - t.updated_at).num_seconds();
                    RecallItem {
                        layer: MemoryLayer::Prospective,
                        id: t.id,
                        score: 0.6 * relevance + 0.4 * priority,
                        content: t.title,
                        timestamp: t.updated_at,
                        consolidated_semantic: false,
                        provenance_count: 0,
                        vector_len: None,
                        durable: t.status != TaskStatus::Active,
                        age_seconds: Some(age),
                    }
                })
                .collect())
        };

        let graph = async {
            if !layers.contains(&MemoryLayer::Graph) {
                return Ok::<_, Error>(Vec::new());
            }
            let entities = self.graph.search_entities(project, primary, cap).await?;
            Ok(entities
                .into_iter()
                .map(|e| {
                    let text = format!("{} {}", e.name, e.description);
                    RecallItem {
                        layer: MemoryLayer::Graph,
                        id: e.id,
                        score: keyword_boost(primary, &text),
                        content: e.name,
                        timestamp: e.updated_at,
                        consolidated_semantic: false,
                        provenance_count: 0,
                        vector_len: None,
                        durable: true,
                        age_seconds: None,
                    }
                })
                .collect())
        };

        let (episodic, semantic, procedural, prospective, graph) =
            tokio::join!(episodic, semantic, procedural, prospective, graph);

        let mut candidates = Vec::new();
        for result in [episodic, semantic, procedural, prospective, graph] {
            match result {
                Ok(mut items) => {
                    items.truncate(cap);
                    candidates.append(&mut items);
                }
                // A single failing layer degrades the probe, not the call
                Err(e) => warn!("Layer probe failed: {e}"),
            }
        }
        Ok(candidates)
    }

    /// Hybrid re-ranking with attention weighting plus working memory
    async fn tier2(
        &self,
        query: &str,
        options: &RecallOptions,
        mut candidates: Vec<RecallItem>,
    ) -> Result<Vec<RecallItem>> {
        // Attention weights per layer from meta-memory quality
        let mut attention: HashMap<MemoryLayer, f32> = HashMap::new();
        for layer in MemoryLayer::ALL {
            let quality = self
                .meta
                .get_quality(&options.project_id, SubjectKind::Domain, layer.as_str())
                .await?;
            attention.insert(
                layer,
                layer_attention_weight(quality.composite(), self.config.attention_threshold),
            );
        }

        // Working memory joins the pool
        if options.layers.is_empty() || options.layers.contains(&MemoryLayer::Working) {
            let items = self.working.get_current(&options.project_id).await?;
            let now = Utc::now();
            for item in items {
                let relevance = keyword_boost(query, &item.content);
                let activation = item.current_activation(now);
                candidates.push(RecallItem {
                    layer: MemoryLayer::Working,
                    id: item.id,
                    score: 0.6 * relevance + 0.4 * activation,
                    content: item.content,
                    timestamp: item.last_accessed,
                    consolidated_semantic: false,
                    provenance_count: 0,
                    vector_len: item.embedding.as_ref().map(Vec::len),
                    durable: true,
                    age_seconds: None,
                });
            }
        }

        // Pool-wide lexical re-score blended with the tier-1 score
        let contents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        let lexical = Bm25Scorer::new(&contents).score_all_normalized(query);
        let tier1_scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        let tier1_norm = normalize_min_max(&tier1_scores);

        for ((candidate, lex), base) in candidates.iter_mut().zip(lexical).zip(tier1_norm) {
            let weight = attention.get(&candidate.layer).copied().unwrap_or(1.0);
            candidate.score = weight * (0.55 * base + 0.45 * lex);
        }

        sort_candidates(&mut candidates);
        Ok(candidates)
    }

    /// LLM reranking over the top candidates; failure keeps the input order
    async fn tier3(
        &self,
        query: &str,
        mut candidates: Vec<RecallItem>,
    ) -> (Vec<RecallItem>, bool) {
        let pool = candidates.len().min(50);
        if pool < 2 {
            return (candidates, false);
        }

        let mut prompt = format!(
            "Rank the following memory snippets by relevance to the query.\nQuery: {query}\n"
        );
        for (i, candidate) in candidates[..pool].iter().enumerate() {
            let head: String = candidate.content.chars().take(120).collect();
            prompt.push_str(&format!("{}. {head}\n", i + 1));
        }
        prompt.push_str("Reply with the numbers in ranked order, comma separated.\n");

        match generate_with_deadline(self.llm.as_ref(), &prompt, 128, Duration::from_millis(1500))
            .await
        {
            Ok(response) => {
                let order: Vec<usize> = response
                    .split(|c: char| !c.is_ascii_digit())
                    .filter_map(|token| token.parse::<usize>().ok())
                    .filter(|&n| n >= 1 && n <= pool)
                    .map(|n| n - 1)
                    .collect();
                let mut deduped: Vec<usize> = Vec::new();
                for index in order {
                    if !deduped.contains(&index) {
                        deduped.push(index);
                    }
                }
                if deduped.len() < 2 {
                    // Response carried no usable ordering
                    return (candidates, true);
                }

                let mut reranked: Vec<RecallItem> = Vec::with_capacity(candidates.len());
                let top_score = candidates.first().map_or(1.0, |c| c.score.max(0.01));
                for (rank, &index) in deduped.iter().enumerate() {
                    let mut item = candidates[index].clone();
                    // Preserve score scale while honoring the LLM order
                    item.score = top_score * (1.0 - rank as f32 * 0.02);
                    reranked.push(item);
                }
                for (i, item) in candidates.into_iter().enumerate() {
                    if !deduped.contains(&i) {
                        reranked.push(item);
                    }
                }
                (reranked, false)
            }
            Err(e) => {
                debug!("Tier 3 rerank degraded: {e}");
                sort_candidates(&mut candidates);
                (candidates, true)
            }
        }
    }
}

fn top_score(candidates: &[RecallItem]) -> f32 {
    candidates.first().map_or(0.0, |c| c.score)
}

/// Score descending, recency descending on ties
fn sort_candidates(candidates: &mut [RecallItem]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
}

/// Dedup by `(layer, id)`, then by identical content across layers keeping
/// the highest layer-weighted score
fn dedup_candidates(candidates: Vec<RecallItem>) -> Vec<RecallItem> {
    let mut by_identity: HashMap<(MemoryLayer, uuid::Uuid), RecallItem> = HashMap::new();
    for candidate in candidates {
        match by_identity.entry((candidate.layer, candidate.id)) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if candidate.score > slot.get().score {
                    slot.insert(candidate);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
        }
    }

    let mut by_content: HashMap<String, RecallItem> = HashMap::new();
    for candidate in by_identity.into_values() {
        let key = candidate.content.clone();
        match by_content.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let existing_weighted = slot.get().score * layer_weight(slot.get().layer);
                let candidate_weighted = candidate.score * layer_weight(candidate.layer);
                if candidate_weighted > existing_weighted {
                    slot.insert(candidate);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
        }
    }
    by_content.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(layer: MemoryLayer, content: &str, score: f32) -> RecallItem {
        RecallItem {
            layer,
            id: uuid::Uuid::new_v4(),
            content: content.to_string(),
            score,
            timestamp: Utc::now(),
            consolidated_semantic: false,
            provenance_count: 0,
            vector_len: None,
            durable: true,
            age_seconds: None,
        }
    }

    #[test]
    fn test_dedup_same_content_keeps_weighted_winner() {
        // Same content in episodic (0.9 weight) and semantic (1.0 weight)
        let episodic = item(MemoryLayer::Episodic, "db timeout", 0.8);
        let semantic = item(MemoryLayer::Semantic, "db timeout", 0.78);

        let deduped = dedup_candidates(vec![episodic, semantic]);
        assert_eq!(deduped.len(), 1);
        // 0.78 * 1.0 > 0.8 * 0.9
        assert_eq!(deduped[0].layer, MemoryLayer::Semantic);
    }

    #[test]
    fn test_dedup_distinct_content_kept() {
        let deduped = dedup_candidates(vec![
            item(MemoryLayer::Episodic, "one", 0.5),
            item(MemoryLayer::Episodic, "two", 0.4),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_sort_orders_by_score_then_recency() {
        let mut old_high = item(MemoryLayer::Semantic, "a", 0.9);
        old_high.timestamp = Utc::now() - chrono::Duration::hours(2);
        let new_high = item(MemoryLayer::Semantic, "b", 0.9);
        let low = item(MemoryLayer::Semantic, "c", 0.2);

        let mut all = vec![low, old_high, new_high];
        sort_candidates(&mut all);
        assert_eq!(all[0].content, "b");
        assert_eq!(all[1].content, "a");
        assert_eq!(all[2].content, "c");
    }
}
