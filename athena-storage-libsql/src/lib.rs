#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Athena libSQL Storage
//!
//! Durable relational backend for the `athena-core` memory engine. Every
//! store trait is implemented over a single libSQL database behind a sized
//! connection pool; schema bootstrap is idempotent and versioned.
//!
//! ```no_run
//! use athena_core::manager::AthenaMemory;
//! use athena_core::types::AthenaConfig;
//! use athena_storage_libsql::LibsqlStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> athena_core::Result<()> {
//! let mut config = AthenaConfig::default();
//! config.db.url = "athena.db".to_string();
//!
//! let storage = LibsqlStorage::connect(&config).await?;
//! let memory = AthenaMemory::with_stores(
//!     config,
//!     storage.store_set(),
//!     Arc::new(athena_core::MockEmbedder::new(768)),
//!     Arc::new(athena_core::HeuristicLlm::new()),
//! );
//! # Ok(())
//! # }
//! ```

pub mod migrations;
pub mod pool;
pub mod schema;
pub mod stores;
pub mod vector;

pub use pool::{DbPool, PoolHealth};
pub use stores::{
    LibsqlCursorStore, LibsqlEpisodicStore, LibsqlGraphStore, LibsqlMetaStore,
    LibsqlProceduralStore, LibsqlProspectiveStore, LibsqlSemanticStore, LibsqlSessionStore,
    LibsqlWorkingStore,
};

use athena_core::error::{Error, Result};
use athena_core::inmem::StoreSet;
use athena_core::types::AthenaConfig;
use std::sync::Arc;
use tracing::info;

/// A connected, migrated libSQL backend
pub struct LibsqlStorage {
    pool: Arc<DbPool>,
    dimension: usize,
}

impl LibsqlStorage {
    /// Open (or create) the database named by `config.db`, apply migrations,
    /// and warm the pool
    pub async fn connect(config: &AthenaConfig) -> Result<Self> {
        config.validate()?;
        let db = if config.db.auth_token.is_empty() {
            libsql::Builder::new_local(config.db.url.clone())
                .build()
                .await
                .map_err(|e| Error::BackendUnavailable(e.to_string()))?
        } else {
            libsql::Builder::new_remote(config.db.url.clone(), config.db.auth_token.clone())
                .build()
                .await
                .map_err(|e| Error::BackendUnavailable(e.to_string()))?
        };
        let db = Arc::new(db);

        let bootstrap_conn = db
            .connect()
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;
        let version = migrations::run_migrations(&bootstrap_conn).await?;
        info!("Connected to {} at schema v{version}", config.db.url);

        let pool = Arc::new(DbPool::new(db, &config.db));
        pool.warm_up().await?;

        Ok(Self {
            pool,
            dimension: config.embed.dimension,
        })
    }

    /// The shared connection pool
    #[must_use]
    pub fn pool(&self) -> Arc<DbPool> {
        self.pool.clone()
    }

    /// Backend health probe
    pub async fn health(&self) -> PoolHealth {
        self.pool.health().await
    }

    /// Build the complete store set over this backend
    #[must_use]
    pub fn store_set(&self) -> StoreSet {
        StoreSet {
            episodic: Arc::new(LibsqlEpisodicStore::new(self.pool.clone())),
            semantic: Arc::new(LibsqlSemanticStore::new(self.pool.clone(), self.dimension)),
            procedural: Arc::new(LibsqlProceduralStore::new(self.pool.clone())),
            prospective: Arc::new(LibsqlProspectiveStore::new(self.pool.clone())),
            graph: Arc::new(LibsqlGraphStore::new(self.pool.clone())),
            meta: Arc::new(LibsqlMetaStore::new(self.pool.clone())),
            working: Arc::new(LibsqlWorkingStore::new(self.pool.clone())),
            sessions: Arc::new(LibsqlSessionStore::new(self.pool.clone())),
            cursors: Arc::new(LibsqlCursorStore::new(self.pool.clone())),
        }
    }
}
