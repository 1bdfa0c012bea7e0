//! # In-Memory Backend
//!
//! Process-local implementations of every store trait. This is the default
//! backend when the engine is constructed without a database, and the
//! backend the engine's own tests run against. Semantics match the
//! relational backend; only durability differs.

mod episodic;
mod graph;
mod meta;
mod procedural;
mod prospective;
mod semantic;
mod session;
mod working;

pub use episodic::InMemoryEpisodicStore;
pub use graph::InMemoryGraphStore;
pub use meta::InMemoryMetaStore;
pub use procedural::InMemoryProceduralStore;
pub use prospective::InMemoryProspectiveStore;
pub use semantic::InMemorySemanticStore;
pub use session::{InMemoryCursorStore, InMemorySessionStore};
pub use working::InMemoryWorkingStore;

use crate::episodic::EpisodicStore;
use crate::graph::GraphStore;
use crate::ingest::CursorStore;
use crate::meta::MetaStore;
use crate::procedural::ProceduralStore;
use crate::prospective::ProspectiveStore;
use crate::semantic::SemanticStore;
use crate::session::SessionStore;
use crate::working::WorkingStore;
use std::sync::Arc;

/// Handles to a complete set of stores
#[derive(Clone)]
pub struct StoreSet {
    pub episodic: Arc<dyn EpisodicStore>,
    pub semantic: Arc<dyn SemanticStore>,
    pub procedural: Arc<dyn ProceduralStore>,
    pub prospective: Arc<dyn ProspectiveStore>,
    pub graph: Arc<dyn GraphStore>,
    pub meta: Arc<dyn MetaStore>,
    pub working: Arc<dyn WorkingStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub cursors: Arc<dyn CursorStore>,
}

impl StoreSet {
    /// A fully in-memory store set of the given embedding dimension
    #[must_use]
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            episodic: Arc::new(InMemoryEpisodicStore::new()),
            semantic: Arc::new(InMemorySemanticStore::new(dimension)),
            procedural: Arc::new(InMemoryProceduralStore::new()),
            prospective: Arc::new(InMemoryProspectiveStore::new()),
            graph: Arc::new(InMemoryGraphStore::new()),
            meta: Arc::new(InMemoryMetaStore::new()),
            working: Arc::new(InMemoryWorkingStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            cursors: Arc::new(InMemoryCursorStore::new()),
        }
    }
}
