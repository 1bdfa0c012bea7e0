//! Versioned, ordered, idempotent schema migrations.
//!
//! Each migration is a batch of statements applied inside one transaction;
//! the recorded version advances with it. Bootstrapping a database whose
//! recorded version is newer than this binary fails with `SchemaMismatch`.

use crate::schema;
use athena_core::error::{Error, Result};
use libsql::Connection;
use tracing::{debug, info};

/// One migration step
struct Migration {
    version: u32,
    statements: &'static [&'static str],
}

/// All migrations, in application order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        statements: &[
            schema::CREATE_EVENTS_TABLE,
            schema::CREATE_EVENT_HASHES_TABLE,
            schema::CREATE_SEMANTIC_TABLE,
            schema::CREATE_PROCEDURES_TABLE,
            schema::CREATE_TASKS_TABLE,
            schema::CREATE_ENTITIES_TABLE,
            schema::CREATE_RELATIONS_TABLE,
            schema::CREATE_COMMUNITIES_TABLE,
            schema::CREATE_EVENTS_TIME_INDEX,
            schema::CREATE_EVENTS_HASH_INDEX,
            schema::CREATE_EVENTS_LIFECYCLE_INDEX,
            schema::CREATE_SEMANTIC_PROJECT_INDEX,
            schema::CREATE_RELATIONS_FROM_INDEX,
            schema::CREATE_TASKS_STATUS_INDEX,
            schema::CREATE_PROCEDURES_NAME_INDEX,
        ],
    },
    Migration {
        version: 2,
        statements: &[
            schema::CREATE_META_TABLE,
            schema::CREATE_ATTENTION_TABLE,
            schema::CREATE_WORKING_TABLE,
            schema::CREATE_SESSIONS_TABLE,
            schema::CREATE_CURSORS_TABLE,
        ],
    },
];

/// Apply pending migrations, returning the resulting schema version
pub async fn run_migrations(conn: &Connection) -> Result<u32> {
    conn.execute(schema::CREATE_SCHEMA_VERSION_TABLE, ())
        .await
        .map_err(driver)?;

    let current = current_version(conn).await?;
    if current > schema::SCHEMA_VERSION {
        return Err(Error::SchemaMismatch {
            stored: current,
            supported: schema::SCHEMA_VERSION,
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        debug!("Applying schema migration v{}", migration.version);
        let tx = conn.transaction().await.map_err(driver)?;
        for statement in migration.statements {
            tx.execute(statement, ()).await.map_err(driver)?;
        }
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [i64::from(migration.version)],
        )
        .await
        .map_err(driver)?;
        tx.commit().await.map_err(driver)?;
        info!("Schema migrated to v{}", migration.version);
    }

    current_version(conn).await
}

async fn current_version(conn: &Connection) -> Result<u32> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await
        .map_err(driver)?;
    let row = rows
        .next()
        .await
        .map_err(driver)?
        .ok_or_else(|| Error::Storage("schema_version query returned no rows".into()))?;
    let version: i64 = row.get(0).map_err(driver)?;
    Ok(version as u32)
}

pub(crate) fn driver(err: libsql::Error) -> Error {
    athena_core::retry::classify_driver_error(&err.to_string())
}
