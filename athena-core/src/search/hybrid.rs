//! Hybrid scoring: weighted blend of vector, lexical, and boost signals.

use serde::{Deserialize, Serialize};

/// Weights for the hybrid blend; normalized to sum to 1.0 at construction
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridWeights {
    pub vector: f32,
    pub lexical: f32,
    pub boost: f32,
}

impl HybridWeights {
    /// Create normalized weights
    #[must_use]
    pub fn new(vector: f32, lexical: f32, boost: f32) -> Self {
        let total = (vector + lexical + boost).max(f32::EPSILON);
        Self {
            vector: vector / total,
            lexical: lexical / total,
            boost: boost / total,
        }
    }
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self::new(0.6, 0.3, 0.1)
    }
}

/// A candidate with its component and blended scores
#[derive(Debug, Clone)]
pub struct ScoredCandidate<T> {
    pub item: T,
    pub score: f32,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub boost_score: f32,
}

/// Blends component scores and ranks candidates
#[derive(Debug, Clone, Default)]
pub struct HybridScorer {
    weights: HybridWeights,
}

impl HybridScorer {
    #[must_use]
    pub fn new(weights: HybridWeights) -> Self {
        Self { weights }
    }

    #[must_use]
    pub fn weights(&self) -> HybridWeights {
        self.weights
    }

    /// Blend one candidate's component scores
    #[must_use]
    pub fn blend(&self, vector: f32, lexical: f32, boost: f32) -> f32 {
        self.weights.vector * vector + self.weights.lexical * lexical + self.weights.boost * boost
    }

    /// Score a pool of candidates given per-candidate component scores.
    ///
    /// `components` holds `(item, vector, lexical, boost)` tuples. The result
    /// drops candidates below `min_score`, sorts by blended score descending
    /// and truncates to `limit`.
    #[must_use]
    pub fn rank<T>(
        &self,
        components: Vec<(T, f32, f32, f32)>,
        min_score: f32,
        limit: usize,
    ) -> Vec<ScoredCandidate<T>> {
        let mut scored: Vec<ScoredCandidate<T>> = components
            .into_iter()
            .map(|(item, v, l, b)| ScoredCandidate {
                score: self.blend(v, l, b),
                item,
                vector_score: v,
                lexical_score: l,
                boost_score: b,
            })
            .filter(|c| c.score >= min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_normalize() {
        let w = HybridWeights::new(6.0, 3.0, 1.0);
        assert!((w.vector - 0.6).abs() < 1e-6);
        assert!((w.lexical - 0.3).abs() < 1e-6);
        assert!((w.boost - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_blend_default_weights() {
        let scorer = HybridScorer::default();
        let score = scorer.blend(0.8, 0.5, 1.0);
        assert!((score - (0.6 * 0.8 + 0.3 * 0.5 + 0.1)).abs() < 1e-6);
    }

    #[test]
    fn test_rank_sorts_and_filters() {
        let scorer = HybridScorer::default();
        let ranked = scorer.rank(
            vec![
                ("weak", 0.1, 0.0, 0.0),
                ("strong", 0.9, 0.8, 1.0),
                ("middle", 0.6, 0.4, 0.2),
            ],
            0.3,
            10,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].item, "strong");
        assert_eq!(ranked[1].item, "middle");
    }

    #[test]
    fn test_rank_respects_limit() {
        let scorer = HybridScorer::default();
        let pool: Vec<(usize, f32, f32, f32)> =
            (0..20).map(|i| (i, 0.5 + i as f32 * 0.01, 0.5, 0.5)).collect();
        let ranked = scorer.rank(pool, 0.0, 5);
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].item, 19);
    }
}
