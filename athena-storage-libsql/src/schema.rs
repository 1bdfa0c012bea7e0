//! Database schema definitions for the libSQL backend.
//!
//! Complex fields are JSON TEXT columns; embeddings are little-endian f32
//! BLOBs of the configured dimension. Timestamps are epoch milliseconds.

/// Schema version this binary supports
pub const SCHEMA_VERSION: u32 = 2;

/// Tracks applied migrations
pub const CREATE_SCHEMA_VERSION_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY NOT NULL,
    applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
)
";

/// Episodic event log
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS episodic_events (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    session_id TEXT,
    source_id TEXT,
    event_type TEXT NOT NULL,
    content TEXT NOT NULL,
    structured_context TEXT NOT NULL DEFAULT '{}',
    content_hash TEXT NOT NULL,
    embedding BLOB,
    timestamp INTEGER NOT NULL,
    lifecycle TEXT NOT NULL DEFAULT 'active',
    importance REAL NOT NULL DEFAULT 0.5,
    actionability REAL NOT NULL DEFAULT 0.5,
    context_completeness REAL NOT NULL DEFAULT 0.0,
    causality_parent TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
";

/// Physical dedup index over event content hashes
pub const CREATE_EVENT_HASHES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS event_hashes (
    project_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    event_id TEXT NOT NULL,
    first_seen_at INTEGER NOT NULL,
    PRIMARY KEY (project_id, content_hash)
)
";

/// Semantic memories
pub const CREATE_SEMANTIC_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS semantic_memories (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    memory_type TEXT NOT NULL,
    provenance TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 0.5,
    consolidation_state TEXT NOT NULL DEFAULT 'unconsolidated',
    last_accessed INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
";

/// Versioned procedures
pub const CREATE_PROCEDURES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS procedures (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT 'general',
    version INTEGER NOT NULL,
    steps TEXT NOT NULL,
    trigger_pattern TEXT NOT NULL DEFAULT '',
    execution_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    last_executed INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (project_id, name, version)
)
";

/// Prospective tasks
pub const CREATE_TASKS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    parent_id TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 5,
    phase TEXT NOT NULL DEFAULT 'planning',
    triggers TEXT NOT NULL DEFAULT '[]',
    dependencies TEXT NOT NULL DEFAULT '[]',
    deadline INTEGER,
    progress REAL NOT NULL DEFAULT 0.0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
";

/// Graph entities
pub const CREATE_ENTITIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    properties TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (project_id, name)
)
";

/// Graph relations
pub const CREATE_RELATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS relations (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    from_entity TEXT NOT NULL,
    to_entity TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 0.5,
    observation_count INTEGER NOT NULL DEFAULT 1,
    temporal_start INTEGER,
    temporal_end INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (project_id, from_entity, to_entity, relation_type)
)
";

/// Graph communities (rebuilt wholesale per run)
pub const CREATE_COMMUNITIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS communities (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    member_entities TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    generation INTEGER NOT NULL,
    created_at INTEGER NOT NULL
)
";

/// Meta-memory quality records
pub const CREATE_META_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS meta_records (
    project_id TEXT NOT NULL,
    subject_kind TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    compression REAL NOT NULL DEFAULT 0.5,
    recall REAL NOT NULL DEFAULT 0.5,
    consistency REAL NOT NULL DEFAULT 0.5,
    attention_weight REAL NOT NULL DEFAULT 0.5,
    last_evaluated INTEGER NOT NULL,
    PRIMARY KEY (project_id, subject_kind, subject_id)
)
";

/// Per-project attention budgets
pub const CREATE_ATTENTION_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS attention_budgets (
    project_id TEXT PRIMARY KEY NOT NULL,
    budget REAL NOT NULL DEFAULT 0.5,
    updated_at INTEGER NOT NULL
)
";

/// Working-memory items
pub const CREATE_WORKING_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS working_memory (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    content TEXT NOT NULL,
    component TEXT NOT NULL,
    activation REAL NOT NULL DEFAULT 1.0,
    decay_rate REAL NOT NULL DEFAULT 0.001,
    importance REAL NOT NULL DEFAULT 0.5,
    last_accessed INTEGER NOT NULL,
    embedding BLOB
)
";

/// Session records
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    task TEXT,
    phase TEXT,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    event_ids TEXT NOT NULL DEFAULT '[]'
)
";

/// Ingestion cursors
pub const CREATE_CURSORS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS ingestion_cursors (
    source_id TEXT PRIMARY KEY NOT NULL,
    cursor_blob TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)
";

/// Index on events for chronological project queries
pub const CREATE_EVENTS_TIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_project_time
ON episodic_events(project_id, timestamp DESC)
";

/// Unique dedup index on events
pub const CREATE_EVENTS_HASH_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_project_hash
ON episodic_events(project_id, content_hash)
";

/// Index on events for lifecycle selection
pub const CREATE_EVENTS_LIFECYCLE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_project_lifecycle
ON episodic_events(project_id, lifecycle, timestamp)
";

/// Index on semantic memories per project
pub const CREATE_SEMANTIC_PROJECT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_semantic_project
ON semantic_memories(project_id, updated_at DESC)
";

/// Index on relations by source endpoint and type
pub const CREATE_RELATIONS_FROM_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_relations_from_type
ON relations(from_entity, relation_type)
";

/// Index on tasks for status/priority/deadline queries
pub const CREATE_TASKS_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_tasks_status_priority
ON tasks(project_id, status, priority DESC, deadline)
";

/// Index on procedures for latest-version lookups
pub const CREATE_PROCEDURES_NAME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_procedures_name_version
ON procedures(project_id, name, version DESC)
";
