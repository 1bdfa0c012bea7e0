//! BM25-style lexical scoring over candidate content.
//!
//! The scorer is built per query over the candidate pool (not a persistent
//! index): candidate sets are already bounded by the per-layer caps, so a
//! one-pass in-process score is cheaper than maintaining an FTS index per
//! table.

use std::collections::HashMap;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// Lowercase alphanumeric tokenization
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(ToString::to_string)
        .collect()
}

/// BM25 scorer over a fixed candidate pool
pub struct Bm25Scorer {
    /// Document frequency per term
    doc_freq: HashMap<String, usize>,
    /// Tokenized documents
    docs: Vec<Vec<String>>,
    avg_len: f32,
}

impl Bm25Scorer {
    /// Build the scorer from candidate contents
    #[must_use]
    pub fn new(contents: &[&str]) -> Self {
        let docs: Vec<Vec<String>> = contents.iter().map(|c| tokenize(c)).collect();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in &docs {
            let mut seen: Vec<&String> = Vec::new();
            for term in doc {
                if !seen.contains(&term) {
                    *doc_freq.entry(term.clone()).or_insert(0) += 1;
                    seen.push(term);
                }
            }
        }
        let total_len: usize = docs.iter().map(Vec::len).sum();
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f32 / docs.len() as f32
        };
        Self {
            doc_freq,
            docs,
            avg_len,
        }
    }

    /// Number of candidate documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Raw BM25 score of document `index` for `query`
    #[must_use]
    pub fn score(&self, query: &str, index: usize) -> f32 {
        let Some(doc) = self.docs.get(index) else {
            return 0.0;
        };
        if doc.is_empty() || self.avg_len == 0.0 {
            return 0.0;
        }

        let n = self.docs.len() as f32;
        let doc_len = doc.len() as f32;
        let mut term_freq: HashMap<&String, usize> = HashMap::new();
        for term in doc {
            *term_freq.entry(term).or_insert(0) += 1;
        }

        let mut total = 0.0f32;
        for term in tokenize(query) {
            let Some(&df) = self.doc_freq.get(&term) else {
                continue;
            };
            let Some(&tf) = term_freq.get(&term) else {
                continue;
            };
            let tf = tf as f32;
            let idf = ((n - df as f32 + 0.5) / (df as f32 + 0.5) + 1.0).ln();
            let norm = tf * (BM25_K1 + 1.0)
                / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / self.avg_len));
            total += idf * norm;
        }
        total
    }

    /// Score all documents for `query`, min-max normalized to [0, 1]
    #[must_use]
    pub fn score_all_normalized(&self, query: &str) -> Vec<f32> {
        let raw: Vec<f32> = (0..self.docs.len()).map(|i| self.score(query, i)).collect();
        normalize_min_max(&raw)
    }
}

/// Min-max normalization; a constant vector maps to all-zeros unless the
/// constant is positive, in which case every score is 1.0
#[must_use]
pub fn normalize_min_max(scores: &[f32]) -> Vec<f32> {
    let Some(&max) = scores
        .iter()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return Vec::new();
    };
    let min = scores
        .iter()
        .copied()
        .fold(f32::INFINITY, f32::min)
        .min(max);
    let range = max - min;
    scores
        .iter()
        .map(|&s| {
            if range > 0.0 {
                (s - min) / range
            } else if max > 0.0 {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Keyword boost: fraction of query tokens present in the content, with
/// Jaro-Winkler credit for near-misses
#[must_use]
pub fn keyword_boost(query: &str, content: &str) -> f32 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens = tokenize(content);
    if content_tokens.is_empty() {
        return 0.0;
    }

    let mut matched = 0.0f32;
    for qt in &query_tokens {
        if content_tokens.contains(qt) {
            matched += 1.0;
        } else {
            let best = content_tokens
                .iter()
                .map(|ct| strsim::jaro_winkler(qt, ct) as f32)
                .fold(0.0f32, f32::max);
            if best >= 0.92 {
                matched += best * 0.5;
            }
        }
    }
    (matched / query_tokens.len() as f32).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_punctuation_and_single_chars() {
        let tokens = tokenize("DB connection failed: retry #3, a");
        assert_eq!(tokens, vec!["db", "connection", "failed", "retry"]);
    }

    #[test]
    fn test_bm25_prefers_matching_document() {
        let scorer = Bm25Scorer::new(&[
            "database connection error while opening pool",
            "user clicked the dashboard button",
            "connection timeout connecting to database",
        ]);
        let scores = scorer.score_all_normalized("database connection");
        assert!(scores[0] > scores[1]);
        assert!(scores[2] > scores[1]);
    }

    #[test]
    fn test_bm25_empty_pool() {
        let scorer = Bm25Scorer::new(&[]);
        assert!(scorer.is_empty());
        assert!(scorer.score_all_normalized("anything").is_empty());
    }

    #[test]
    fn test_normalized_scores_in_unit_range() {
        let scorer = Bm25Scorer::new(&["alpha beta", "beta gamma", "gamma delta"]);
        for s in scorer.score_all_normalized("beta") {
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_min_max_constant_positive() {
        assert_eq!(normalize_min_max(&[2.0, 2.0]), vec![1.0, 1.0]);
        assert_eq!(normalize_min_max(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_keyword_boost_exact_and_fuzzy() {
        let exact = keyword_boost("authentication", "authentication flow rebuilt");
        assert!(exact > 0.9);

        let fuzzy = keyword_boost("authentification", "authentication flow rebuilt");
        assert!(fuzzy > 0.0 && fuzzy < exact);

        let none = keyword_boost("kubernetes", "authentication flow rebuilt");
        assert_eq!(none, 0.0);
    }
}
