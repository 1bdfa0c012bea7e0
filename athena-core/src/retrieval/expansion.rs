//! Query expansion via the LLM client, cached by query hash.
//!
//! At most four paraphrases per query; the original query always leads the
//! expanded set. Provider failures and disabled expansion both degrade to
//! the original query alone.

use crate::llm::{generate_with_deadline, LlmClient};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Maximum paraphrases added to the original query
pub const MAX_PARAPHRASES: usize = 4;
/// Expansion cache capacity
pub const EXPANSION_CACHE_SIZE: usize = 1000;
/// Expansion cache TTL
pub const EXPANSION_CACHE_TTL: Duration = Duration::from_secs(3600);

struct CachedExpansion {
    queries: Vec<String>,
    cached_at: Instant,
}

/// Paraphrase generator with an LRU + TTL cache
pub struct QueryExpander {
    cache: Mutex<LruCache<u64, CachedExpansion>>,
    ttl: Duration,
}

impl QueryExpander {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(EXPANSION_CACHE_SIZE, EXPANSION_CACHE_TTL)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Expand a query; the result always starts with the original
    pub async fn expand(
        &self,
        llm: &dyn LlmClient,
        query: &str,
        deadline: Duration,
    ) -> Vec<String> {
        let hash = {
            let mut hasher = DefaultHasher::new();
            query.hash(&mut hasher);
            hasher.finish()
        };

        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get(&hash) {
                if entry.cached_at.elapsed() <= self.ttl {
                    return entry.queries.clone();
                }
                cache.pop(&hash);
            }
        }

        let prompt = format!(
            "Rewrite the following search query {MAX_PARAPHRASES} different ways, one per line, \
             keeping the meaning:\n{query}"
        );
        let queries = match generate_with_deadline(llm, &prompt, 256, deadline).await {
            Ok(response) => {
                let mut queries = vec![query.to_string()];
                for line in response.lines() {
                    let cleaned = line
                        .trim()
                        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-')
                        .trim();
                    if !cleaned.is_empty()
                        && cleaned != query
                        && !queries.iter().any(|q| q == cleaned)
                    {
                        queries.push(cleaned.to_string());
                    }
                    if queries.len() > MAX_PARAPHRASES {
                        break;
                    }
                }
                queries
            }
            Err(e) => {
                debug!("Query expansion degraded to the original query: {e}");
                vec![query.to_string()]
            }
        };

        self.cache.lock().put(
            hash,
            CachedExpansion {
                queries: queries.clone(),
                cached_at: Instant::now(),
            },
        );
        queries
    }
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new()
    }
}
