//! Fixtures and harnesses shared by the workspace's tests.
//!
//! Builders mint deterministic-ish domain records with minimal ceremony;
//! the harness functions stand up an engine over either backend.

use athena_core::episodic::EpisodicEvent;
use athena_core::manager::AthenaMemory;
use athena_core::prospective::Task;
use athena_core::semantic::SemanticMemory;
use athena_core::types::{AthenaConfig, EventType, MemoryType};
use athena_core::{HeuristicLlm, MockEmbedder};
use athena_storage_libsql::LibsqlStorage;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Default embedding dimension for tests; small keeps fixtures fast
pub const TEST_DIMENSION: usize = 64;

/// Initialize test logging once; honors `RUST_LOG`, defaults to warnings
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A test config over a small mock embedding dimension
#[must_use]
pub fn test_config() -> AthenaConfig {
    let mut config = AthenaConfig::default();
    config.embed.dimension = TEST_DIMENSION;
    config
}

/// An in-memory engine with the test config
#[must_use]
pub fn memory_engine() -> AthenaMemory {
    AthenaMemory::with_config(test_config())
}

/// An engine over an ephemeral libSQL file; keep the guard alive for the
/// test's duration
pub async fn durable_engine() -> anyhow::Result<(AthenaMemory, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let mut config = test_config();
    config.db.url = dir.path().join("athena.db").to_string_lossy().to_string();

    let storage = LibsqlStorage::connect(&config).await?;
    let memory = AthenaMemory::with_stores(
        config,
        storage.store_set(),
        Arc::new(MockEmbedder::new(TEST_DIMENSION)),
        Arc::new(HeuristicLlm::new()),
    );
    Ok((memory, dir))
}

/// An event with an embedding already attached
#[must_use]
pub fn embedded_event(project: &str, event_type: EventType, content: &str) -> EpisodicEvent {
    let mut event = EpisodicEvent::new(project, event_type, content);
    event.embedding = Some(MockEmbedder::new(TEST_DIMENSION).generate(content));
    event
}

/// A burst of session-linked events spaced `gap_s` apart
#[must_use]
pub fn session_burst(
    project: &str,
    session: Uuid,
    contents: &[&str],
    gap_s: i64,
) -> Vec<EpisodicEvent> {
    let start = Utc::now() - Duration::seconds(gap_s * contents.len() as i64);
    contents
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let mut event = embedded_event(project, EventType::ToolExecution, content);
            event.session_id = Some(session);
            event.timestamp = start + Duration::seconds(gap_s * i as i64);
            event
        })
        .collect()
}

/// A semantic memory with a valid embedding for the test dimension
#[must_use]
pub fn semantic_fact(project: &str, content: &str) -> SemanticMemory {
    SemanticMemory::new(
        project,
        content,
        MemoryType::Fact,
        MockEmbedder::new(TEST_DIMENSION).generate(content),
    )
}

/// A pending task with one event trigger
#[must_use]
pub fn triggered_task(project: &str, title: &str, trigger_contains: &str) -> Task {
    Task::new(project, title).with_trigger(athena_core::Trigger::on_event(
        EventType::Error,
        trigger_contains,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_produce_valid_records() {
        let event = embedded_event("proj", EventType::Error, "boom");
        assert!(event.validate().is_ok());
        assert_eq!(event.embedding.as_ref().map(Vec::len), Some(TEST_DIMENSION));

        let memory = semantic_fact("proj", "a fact");
        assert!(memory.validate(TEST_DIMENSION).is_ok());

        let task = triggered_task("proj", "investigate", "timeout");
        assert!(task.validate().is_ok());
        assert_eq!(task.triggers.len(), 1);
    }

    #[test]
    fn test_session_burst_is_ordered() {
        let session = Uuid::new_v4();
        let burst = session_burst("proj", session, &["a", "b", "c"], 10);
        assert_eq!(burst.len(), 3);
        assert!(burst.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(burst.iter().all(|e| e.session_id == Some(session)));
    }
}
