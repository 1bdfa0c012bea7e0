//! Recall result cache: LRU with TTL and per-project lazy invalidation.
//!
//! Writes to a project mark its cached entries invalid; the entries are
//! filtered out on access rather than eagerly removed, keeping writes cheap.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Cache key over the semantic identity of a recall call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecallCacheKey {
    pub project_id: String,
    pub query: String,
    pub k: usize,
    pub cascade_depth: u8,
    pub layers: Vec<String>,
}

impl RecallCacheKey {
    fn hashed(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Counters for cache effectiveness
#[derive(Debug, Clone, Copy, Default)]
pub struct RecallCacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

struct CachedEntry<T> {
    value: T,
    project_id: String,
    cached_at: Instant,
}

/// LRU + TTL cache for recall outputs
pub struct RecallCache<T> {
    entries: Mutex<LruCache<u64, CachedEntry<T>>>,
    project_index: Mutex<HashMap<String, HashSet<u64>>>,
    invalidated: Mutex<HashSet<u64>>,
    metrics: Mutex<RecallCacheMetrics>,
    ttl: Duration,
}

impl<T: Clone> RecallCache<T> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            project_index: Mutex::new(HashMap::new()),
            invalidated: Mutex::new(HashSet::new()),
            metrics: Mutex::new(RecallCacheMetrics::default()),
            ttl,
        }
    }

    /// Fetch a live entry
    #[must_use]
    pub fn get(&self, key: &RecallCacheKey) -> Option<T> {
        let hash = key.hashed();

        if self.invalidated.lock().contains(&hash) {
            self.metrics.lock().misses += 1;
            return None;
        }

        let mut entries = self.entries.lock();
        let mut metrics = self.metrics.lock();
        match entries.get(&hash) {
            Some(entry) if entry.cached_at.elapsed() <= self.ttl => {
                metrics.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.pop(&hash);
                metrics.misses += 1;
                metrics.evictions += 1;
                None
            }
            None => {
                metrics.misses += 1;
                None
            }
        }
    }

    /// Store an entry
    pub fn put(&self, key: &RecallCacheKey, value: T) {
        let hash = key.hashed();
        self.invalidated.lock().remove(&hash);
        self.entries.lock().put(
            hash,
            CachedEntry {
                value,
                project_id: key.project_id.clone(),
                cached_at: Instant::now(),
            },
        );
        self.project_index
            .lock()
            .entry(key.project_id.clone())
            .or_default()
            .insert(hash);
    }

    /// Invalidate every cached entry for a project (called on writes)
    pub fn invalidate_project(&self, project_id: &str) {
        let hashes = self.project_index.lock().remove(project_id);
        if let Some(hashes) = hashes {
            let count = hashes.len() as u64;
            let mut invalidated = self.invalidated.lock();
            invalidated.extend(hashes);
            self.metrics.lock().invalidations += count;
        }
    }

    #[must_use]
    pub fn metrics(&self) -> RecallCacheMetrics {
        *self.metrics.lock()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
