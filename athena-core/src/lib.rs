#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::float_cmp)]

//! # Athena Memory Core
//!
//! Persistent, multi-layer cognitive memory engine for AI agents: events
//! flow in through the ingestion pipeline, consolidate into durable
//! knowledge, and come back out through context-aware retrieval with
//! quality gating.
//!
//! ## Memory layers
//!
//! - **Episodic** ([`episodic`]): append-only event log with lifecycle state
//! - **Semantic** ([`semantic`]): consolidated knowledge with hybrid search
//! - **Procedural** ([`procedural`]): versioned workflows with effectiveness
//! - **Prospective** ([`prospective`]): tasks and goals with typed triggers
//! - **Graph** ([`graph`]): entities, weighted relations, communities
//! - **Meta** ([`meta`]): quality tracking and attention budgets
//! - **Working** ([`working`]): bounded 7±2 activation set with decay
//!
//! ## Engines
//!
//! - [`ingest`]: multi-source intake with dedup, batching, and retry
//! - [`consolidation`]: dual-process promotion of events into knowledge
//! - [`retrieval`]: tiered cascade with hybrid ranking and caching
//! - [`verify`]: seven quality gates over retrieve/store operations
//! - [`observer`]: decision log, trends, anomalies, and health scoring
//!
//! ## Quick start
//!
//! ```no_run
//! use athena_core::manager::{AthenaMemory, RememberKind};
//! use athena_core::retrieval::RecallOptions;
//! use athena_core::types::MemoryType;
//!
//! #[tokio::main]
//! async fn main() -> athena_core::Result<()> {
//!     let memory = AthenaMemory::new();
//!
//!     memory
//!         .remember(
//!             "my-project",
//!             "the build breaks when the schema migration is skipped",
//!             RememberKind::Semantic(MemoryType::Fact),
//!             None,
//!         )
//!         .await?;
//!
//!     let options = RecallOptions::for_project("my-project").with_k(5);
//!     let response = memory.recall("schema migration build", &options).await?;
//!     println!("top result: {:?}", response.results.first());
//!     Ok(())
//! }
//! ```
//!
//! Storage is pluggable: [`manager::AthenaMemory::new`] runs fully in
//! memory; `athena-storage-libsql` provides the durable relational backend
//! behind the same store traits.

pub mod breaker;
pub mod consolidation;
pub mod embed;
pub mod episodic;
pub mod error;
pub mod graph;
pub mod hash;
pub mod ingest;
pub mod inmem;
pub mod llm;
pub mod manager;
pub mod meta;
pub mod observer;
pub mod procedural;
pub mod prospective;
pub mod retrieval;
pub mod retry;
pub mod search;
pub mod semantic;
pub mod session;
pub mod types;
pub mod verify;
pub mod working;

// Re-export commonly used types
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use consolidation::{ConsolidationEngine, ConsolidationParams, ConsolidationReport};
pub use embed::{EmbeddingProvider, FallbackEmbedder, MockEmbedder};
pub use episodic::{EpisodicEvent, EpisodicStore, EventFilter, TimeWindow};
pub use error::{Error, Result};
pub use graph::{Community, Entity, GraphStore, Relation};
pub use ingest::{EventSource, IngestionPipeline, SourceRegistry, SourceSpec};
pub use inmem::StoreSet;
pub use llm::{HeuristicLlm, LlmClient, LlmError};
pub use manager::{AthenaMemory, RecallResponse, RememberKind};
pub use meta::{MetaRecord, MetaStore, QualityMetrics};
pub use observer::{DecisionRecord, Observer};
pub use procedural::{Procedure, ProceduralStore, ProcedureStep};
pub use prospective::{ProspectiveStore, Task, Trigger};
pub use retrieval::{RecallItem, RecallOptions, RetrievalPlanner};
pub use retry::{RetryConfig, RetryPolicy};
pub use semantic::{SemanticMemory, SemanticStore};
pub use session::{SessionContext, SessionManager, SessionStore};
pub use types::{
    AthenaConfig, ConsolidationState, EventType, Lifecycle, MemoryLayer, MemoryType, Strategy,
    TaskPhase, TaskStatus, WmComponent,
};
pub use verify::{Gateway, Verification};
pub use working::{WorkingMemoryItem, WorkingStore};
