// ============================================================================
// Configuration
// ============================================================================

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Database backend configuration.
///
/// Pool bounds of zero mean "derive from worker count" using the sizing
/// formula in [`DbConfig::pool_bounds`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Database URL or local file path
    pub url: String,
    /// Auth token for remote backends (empty for local files)
    pub auth_token: String,
    /// Minimum pool size (0 = derived from workers)
    pub pool_min: u32,
    /// Maximum pool size (0 = derived from workers)
    pub pool_max: u32,
    /// Per-acquire timeout in milliseconds
    pub timeout_ms: u64,
    /// Idle connection recycle period in seconds
    pub idle_recycle_s: u64,
    /// Connection lifetime recycle period in seconds
    pub lifetime_recycle_s: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: ":memory:".to_string(),
            auth_token: String::new(),
            pool_min: 0,
            pool_max: 0,
            timeout_ms: 30_000,
            idle_recycle_s: 300,
            lifetime_recycle_s: 3600,
        }
    }
}

impl DbConfig {
    /// Derive `(min, max)` pool bounds from the worker count.
    ///
    /// min = clamp(ceil(workers * 0.1), 2, 5), max = clamp(ceil(workers * 0.5), 10, 20).
    /// Explicit non-zero `pool_min`/`pool_max` override the formula.
    #[must_use]
    pub fn pool_bounds(&self, workers: usize) -> (u32, u32) {
        let derived_min = ((workers as f64 * 0.1).ceil() as u32).clamp(2, 5);
        let derived_max = ((workers as f64 * 0.5).ceil() as u32).clamp(10, 20);
        let min = if self.pool_min > 0 {
            self.pool_min
        } else {
            derived_min
        };
        let max = if self.pool_max > 0 {
            self.pool_max
        } else {
            derived_max
        };
        (min, max.max(min))
    }
}

/// Embedding provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedProviderKind {
    Local,
    Remote,
    Mock,
}

/// Embedding client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Which provider to construct
    pub provider: EmbedProviderKind,
    /// Fixed embedding dimension; all stored vectors must match
    pub dimension: usize,
    /// Provider-declared maximum batch size
    pub batch_max: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: EmbedProviderKind::Mock,
            dimension: 768,
            batch_max: 64,
        }
    }
}

/// LLM client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("heuristic" uses the built-in fallback only)
    pub provider: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum tokens per generation
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "heuristic".to_string(),
            timeout_ms: 10_000,
            max_tokens: 1024,
        }
    }
}

/// Retrieval planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Default number of results
    pub k_default: usize,
    /// Minimum similarity for a candidate to survive
    pub min_similarity: f32,
    /// Per-tier deadlines in milliseconds: [tier1, tier2, tier3]
    pub tier_timeouts_ms: [u64; 3],
    /// Whether to expand queries via the LLM client
    pub expand_queries: bool,
    /// Query cache TTL in seconds
    pub cache_ttl_s: u64,
    /// Query cache capacity (entries)
    pub cache_size: usize,
    /// Hybrid weight for vector similarity
    pub weight_vector: f32,
    /// Hybrid weight for lexical score
    pub weight_lexical: f32,
    /// Hybrid weight for keyword boost
    pub weight_boost: f32,
    /// Tier-2 trigger: Tier-1 top score below this invokes Tier 2
    pub tier2_score_floor: f32,
    /// Tier-3 trigger: Tier-2 top score below this invokes Tier 3
    pub tier3_score_floor: f32,
    /// Meta-memory attention quality threshold for layer penalties
    pub attention_threshold: f32,
    /// Global result cap
    pub global_cap: usize,
    /// Concurrent recall calls allowed per project
    pub max_concurrent_per_project: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            k_default: 5,
            min_similarity: 0.3,
            tier_timeouts_ms: [100, 300, 2000],
            expand_queries: true,
            cache_ttl_s: 300,
            cache_size: 50_000,
            weight_vector: 0.6,
            weight_lexical: 0.3,
            weight_boost: 0.1,
            tier2_score_floor: 0.65,
            tier3_score_floor: 0.6,
            attention_threshold: 0.4,
            global_cap: 100,
            max_concurrent_per_project: 8,
        }
    }
}

/// Consolidation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolConfig {
    /// Scheduled run interval in seconds
    pub window_s: u64,
    /// Maximum events per run
    pub max_events: usize,
    /// Default strategy
    pub strategy: super::enums::Strategy,
    /// System-2 validation threshold on system-1 confidence
    pub sys2_threshold: f32,
    /// Prompt compression target ratio
    pub compression_target: f32,
    /// Minimum semantic preservation for compression
    pub semantic_preserve_min: f32,
    /// Embedding cosine threshold for cluster membership
    pub cluster_similarity: f32,
    /// Temporal proximity gap for clustering, in seconds
    pub cluster_gap_s: i64,
    /// Event count above which clustering falls back to session grouping
    pub cluster_fallback_n: usize,
    /// Per-run wall-clock cap in milliseconds
    pub run_cap_ms: u64,
}

impl Default for ConsolConfig {
    fn default() -> Self {
        Self {
            window_s: 300,
            max_events: 1000,
            strategy: super::enums::Strategy::Balanced,
            sys2_threshold: 0.7,
            compression_target: 0.35,
            semantic_preserve_min: 0.95,
            cluster_similarity: 0.78,
            cluster_gap_s: 300,
            cluster_fallback_n: 10_000,
            run_cap_ms: 60_000,
        }
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Flush when a batch reaches this many events
    pub batch_size: usize,
    /// Flush when this much time has elapsed since the first buffered event
    pub flush_ms: u64,
    /// Maximum retry attempts for transient failures
    pub retries_max: u32,
    /// In-memory dedup cache capacity (content hashes)
    pub dedup_cache_size: usize,
    /// Per-source soft rate limit, events per minute
    pub rate_limit_per_min: u32,
    /// Pause sources when pending inserts exceed this
    pub high_water: usize,
    /// Resume sources when pending inserts fall below this
    pub low_water: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            flush_ms: 200,
            retries_max: 3,
            dedup_cache_size: 5000,
            rate_limit_per_min: 100,
            high_water: 4096,
            low_water: 1024,
        }
    }
}

/// Verification gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Confidence floor for the top result
    pub confidence_floor: f32,
    /// Gate names enabled; empty means all gates
    pub enabled_gates: Vec<String>,
    /// Freshness TTL for prospective/active items, in seconds
    pub freshness_ttl_s: i64,
    /// Maximum payload size for write operations, in bytes
    pub max_payload_bytes: usize,
    /// Maximum batch length for write operations
    pub max_batch_len: usize,
    /// Global result-count cap across all operations
    pub global_cap: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
            enabled_gates: Vec::new(),
            freshness_ttl_s: 7 * 24 * 3600,
            max_payload_bytes: 1_048_576,
            max_batch_len: 1000,
            global_cap: 100,
        }
    }
}

/// Top-level configuration for the Athena memory engine.
///
/// # Examples
///
/// ```
/// use athena_core::types::AthenaConfig;
///
/// let config = AthenaConfig::default();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.embed.dimension, 768);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AthenaConfig {
    pub db: DbConfig,
    pub embed: EmbedConfig,
    pub llm: LlmConfig,
    pub recall: RecallConfig,
    pub consol: ConsolConfig,
    pub ingest: IngestConfig,
    pub verify: VerifyConfig,
}

impl AthenaConfig {
    /// Load configuration from a TOML string
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AthenaConfig = toml::from_str(raw)
            .map_err(|e| Error::Configuration(format!("invalid config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults plus environment overrides.
    ///
    /// Recognized variables: `ATHENA_DB_URL`, `ATHENA_DB_AUTH_TOKEN`,
    /// `ATHENA_EMBED_DIMENSION`, `ATHENA_RECALL_K`, `ATHENA_CONSOL_STRATEGY`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ATHENA_DB_URL") {
            config.db.url = url;
        }
        if let Ok(token) = std::env::var("ATHENA_DB_AUTH_TOKEN") {
            config.db.auth_token = token;
        }
        if let Ok(dim) = std::env::var("ATHENA_EMBED_DIMENSION") {
            if let Ok(value) = dim.parse::<usize>() {
                config.embed.dimension = value;
            }
        }
        if let Ok(k) = std::env::var("ATHENA_RECALL_K") {
            if let Ok(value) = k.parse::<usize>() {
                config.recall.k_default = value;
            }
        }
        if let Ok(strategy) = std::env::var("ATHENA_CONSOL_STRATEGY") {
            match super::enums::Strategy::parse(&strategy.to_lowercase()) {
                Some(value) => config.consol.strategy = value,
                None => {
                    tracing::warn!(
                        "Invalid ATHENA_CONSOL_STRATEGY '{}', using default 'balanced'",
                        strategy
                    );
                }
            }
        }

        config
    }

    /// Validate bounds; returns `Error::Configuration` naming the first bad key
    pub fn validate(&self) -> Result<()> {
        if self.embed.dimension == 0 {
            return Err(Error::Configuration(
                "embed.dimension must be positive".to_string(),
            ));
        }
        if self.embed.batch_max == 0 {
            return Err(Error::Configuration(
                "embed.batch_max must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recall.min_similarity) {
            return Err(Error::Configuration(
                "recall.min_similarity must be in [0, 1]".to_string(),
            ));
        }
        let weight_sum =
            self.recall.weight_vector + self.recall.weight_lexical + self.recall.weight_boost;
        if weight_sum <= 0.0 {
            return Err(Error::Configuration(
                "recall weights must sum to a positive value".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.verify.confidence_floor) {
            return Err(Error::Configuration(
                "verify.confidence_floor must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.consol.sys2_threshold) {
            return Err(Error::Configuration(
                "consol.sys2_threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.consol.max_events == 0 {
            return Err(Error::Configuration(
                "consol.max_events must be positive".to_string(),
            ));
        }
        if self.ingest.batch_size == 0 {
            return Err(Error::Configuration(
                "ingest.batch_size must be positive".to_string(),
            ));
        }
        if self.ingest.low_water >= self.ingest.high_water {
            return Err(Error::Configuration(
                "ingest.low_water must be below ingest.high_water".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AthenaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_pool_bounds_formula() {
        let db = DbConfig::default();
        assert_eq!(db.pool_bounds(1), (2, 10));
        assert_eq!(db.pool_bounds(8), (2, 10));
        assert_eq!(db.pool_bounds(64), (5, 20));
    }

    #[test]
    fn test_pool_bounds_explicit_override() {
        let db = DbConfig {
            pool_min: 3,
            pool_max: 12,
            ..Default::default()
        };
        assert_eq!(db.pool_bounds(64), (3, 12));
    }

    #[test]
    fn test_invalid_dimension_rejected() {
        let mut config = AthenaConfig::default();
        config.embed.dimension = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("embed.dimension"));
    }

    #[test]
    fn test_water_marks_validated() {
        let mut config = AthenaConfig::default();
        config.ingest.low_water = 5000;
        config.ingest.high_water = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let raw = r#"
            [db]
            url = "athena.db"
            timeout_ms = 5000

            [recall]
            k_default = 10

            [consol]
            strategy = "quality"
        "#;
        let config = AthenaConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.db.url, "athena.db");
        assert_eq!(config.db.timeout_ms, 5000);
        assert_eq!(config.recall.k_default, 10);
        assert_eq!(
            config.consol.strategy,
            crate::types::enums::Strategy::Quality
        );
        // Unspecified keys keep their defaults
        assert_eq!(config.embed.dimension, 768);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = AthenaConfig::from_toml_str("recall = 3").unwrap_err();
        assert_eq!(err.code(), "E_CONFIG");
    }
}
