//! # Ingestion Pipeline
//!
//! Multi-source event intake with content-hash deduplication, cursor-based
//! incremental sync, batching, and retry. Sources are registered by kind and
//! isolated from each other: one failing source never stalls the rest.

mod pipeline;
mod rate;
mod source;
mod stats;

pub use pipeline::{should_flush, BatchReport, FlushReason, IngestionPipeline, SourceReport};
pub use rate::TokenBucket;
pub use source::{
    CursorStore, EventSource, IngestionCursor, SourceRegistry, SourceSpec, StaticSource,
};
pub use stats::{IngestStats, SourceStats};
