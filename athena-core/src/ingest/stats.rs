//! Ingestion statistics rollup.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Counters for one source
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourceStats {
    pub inserted: u64,
    pub skipped_duplicate: u64,
    pub failed: u64,
    pub retried: u64,
    pub batches: u64,
}

/// Aggregated ingestion statistics, queryable per source and overall
#[derive(Debug, Default)]
pub struct IngestStats {
    per_source: RwLock<HashMap<String, SourceStats>>,
}

impl IngestStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(
        &self,
        source_id: &str,
        inserted: usize,
        skipped_duplicate: usize,
        retried: usize,
    ) {
        let mut stats = self.per_source.write();
        let entry = stats.entry(source_id.to_string()).or_default();
        entry.inserted += inserted as u64;
        entry.skipped_duplicate += skipped_duplicate as u64;
        entry.retried += retried as u64;
        entry.batches += 1;
    }

    pub fn record_failure(&self, source_id: &str, count: usize) {
        let mut stats = self.per_source.write();
        let entry = stats.entry(source_id.to_string()).or_default();
        entry.failed += count as u64;
    }

    /// Counters for one source
    #[must_use]
    pub fn source(&self, source_id: &str) -> SourceStats {
        self.per_source
            .read()
            .get(source_id)
            .copied()
            .unwrap_or_default()
    }

    /// Sum over all sources
    #[must_use]
    pub fn totals(&self) -> SourceStats {
        let stats = self.per_source.read();
        let mut total = SourceStats::default();
        for s in stats.values() {
            total.inserted += s.inserted;
            total.skipped_duplicate += s.skipped_duplicate;
            total.failed += s.failed;
            total.retried += s.retried;
            total.batches += s.batches;
        }
        total
    }

    /// Snapshot of every source's counters
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, SourceStats> {
        self.per_source.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_accumulates() {
        let stats = IngestStats::new();
        stats.record_batch("a", 10, 2, 1);
        stats.record_batch("a", 5, 0, 0);
        stats.record_batch("b", 3, 3, 0);
        stats.record_failure("b", 4);

        let a = stats.source("a");
        assert_eq!(a.inserted, 15);
        assert_eq!(a.skipped_duplicate, 2);
        assert_eq!(a.retried, 1);
        assert_eq!(a.batches, 2);

        let totals = stats.totals();
        assert_eq!(totals.inserted, 18);
        assert_eq!(totals.failed, 4);
        assert_eq!(totals.batches, 3);
    }

    #[test]
    fn test_unknown_source_is_zeroed() {
        let stats = IngestStats::new();
        assert_eq!(stats.source("missing").inserted, 0);
    }
}
