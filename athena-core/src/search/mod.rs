//! Search and ranking functionality.
//!
//! Hybrid scoring combines three signals over the same candidate pool:
//! vector cosine similarity, a BM25-style lexical score, and a keyword
//! boost with fuzzy matching. Lexical scores are min-max normalized before
//! blending because BM25 is unbounded.

pub mod hybrid;
pub mod lexical;

pub use hybrid::{HybridScorer, HybridWeights, ScoredCandidate};
pub use lexical::{keyword_boost, tokenize, Bm25Scorer};
