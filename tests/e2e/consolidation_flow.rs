//! Consolidation scenarios: cluster promotion, provenance, idempotence, and
//! degraded LLM handling.

use athena_core::consolidation::ConsolidationParams;
use athena_core::inmem::StoreSet;
use athena_core::manager::AthenaMemory;
use athena_core::semantic::SemanticFilter;
use athena_core::types::{ConsolidationState, EventType, Lifecycle, Strategy};
use athena_core::MockEmbedder;
use e2e_tests::TimingOutLlm;
use std::collections::BTreeSet;
use std::sync::Arc;
use test_utils::{memory_engine, session_burst, test_config, TEST_DIMENSION};
use uuid::Uuid;

/// Six related events in one session within five minutes; embeddings are
/// pinned to one vector because the mock embedder has no semantics
async fn seed_error_burst(memory: &AthenaMemory) -> Vec<Uuid> {
    let session = Uuid::new_v4();
    let shared_embedding = MockEmbedder::new(TEST_DIMENSION).generate("database connection error");
    let mut events = session_burst(
        "proj",
        session,
        &[
            "database connection error while opening the pool",
            "database connection error retry 1",
            "database connection error retry 2",
            "database connection error on worker 3",
            "database connection error persists",
            "database connection error escalated",
        ],
        30,
    );
    for event in &mut events {
        event.embedding = Some(shared_embedding.clone());
    }

    let outcome = memory
        .stores()
        .episodic
        .append_batch(events)
        .await
        .unwrap();
    assert_eq!(outcome.inserted, 6);
    outcome.ids
}

#[tokio::test]
async fn balanced_run_promotes_one_memory_with_full_provenance() {
    test_utils::init_tracing();
    let memory = memory_engine();
    let ids = seed_error_burst(&memory).await;

    let mut params = ConsolidationParams::for_project("proj", &memory.config().consol);
    params.strategy = Strategy::Balanced;
    let report = memory.consolidate(&params).await.unwrap();

    assert_eq!(report.selected_events, 6);
    assert_eq!(report.clusters, 1);
    assert_eq!(report.promoted_semantic, 1);

    let memories = memory.stores().semantic.list_all("proj", 10).await.unwrap();
    assert_eq!(memories.len(), 1);
    let promoted = &memories[0];
    assert_eq!(promoted.consolidation_state, ConsolidationState::Consolidated);
    assert_eq!(
        promoted.provenance,
        ids.iter().copied().collect::<BTreeSet<Uuid>>()
    );
    assert!(promoted.confidence >= 0.7);

    // Source events moved to consolidated
    for id in &ids {
        let event = memory.stores().episodic.get(*id).await.unwrap().unwrap();
        assert_eq!(event.lifecycle, Lifecycle::Consolidated);
    }
}

#[tokio::test]
async fn second_run_over_consolidated_events_changes_nothing() {
    let memory = memory_engine();
    seed_error_burst(&memory).await;

    let params = ConsolidationParams::for_project("proj", &memory.config().consol);
    memory.consolidate(&params).await.unwrap();

    let before = memory.stores().semantic.list_all("proj", 10).await.unwrap();
    let provenance_before: Vec<BTreeSet<Uuid>> =
        before.iter().map(|m| m.provenance.clone()).collect();

    let second = memory.consolidate(&params).await.unwrap();
    assert_eq!(second.selected_events, 0);
    assert_eq!(second.promoted_semantic, 0);

    let after = memory.stores().semantic.list_all("proj", 10).await.unwrap();
    assert_eq!(before.len(), after.len());
    let provenance_after: Vec<BTreeSet<Uuid>> =
        after.iter().map(|m| m.provenance.clone()).collect();
    assert_eq!(provenance_before, provenance_after);
}

#[tokio::test]
async fn llm_timeout_degrades_and_lands_in_the_decision_log() {
    let config = test_config();
    let memory = AthenaMemory::with_stores(
        config,
        StoreSet::in_memory(TEST_DIMENSION),
        Arc::new(MockEmbedder::new(TEST_DIMENSION)),
        Arc::new(TimingOutLlm),
    );
    seed_error_burst(&memory).await;

    let mut params = ConsolidationParams::for_project("proj", &memory.config().consol);
    params.strategy = Strategy::Quality;
    let report = memory.consolidate(&params).await.unwrap();

    // Heuristics carried the run
    assert!(report.degraded);
    assert_eq!(report.promoted_semantic, 1);

    let violations = memory.observer().violations(20);
    assert!(violations
        .iter()
        .any(|d| d.violations.contains(&"llm_timeout".to_string())));
}

#[tokio::test]
async fn speed_strategy_skips_validation_entirely() {
    let config = test_config();
    let memory = AthenaMemory::with_stores(
        config,
        StoreSet::in_memory(TEST_DIMENSION),
        Arc::new(MockEmbedder::new(TEST_DIMENSION)),
        // Would flag degraded if it were consulted
        Arc::new(TimingOutLlm),
    );
    seed_error_burst(&memory).await;

    let mut params = ConsolidationParams::for_project("proj", &memory.config().consol);
    params.strategy = Strategy::Speed;
    let report = memory.consolidate(&params).await.unwrap();
    assert!(!report.degraded);
    assert_eq!(report.promoted_semantic, 1);
}

#[tokio::test]
async fn repeated_successful_tool_runs_become_a_procedure() {
    let memory = memory_engine();
    let session = Uuid::new_v4();
    let shared = MockEmbedder::new(TEST_DIMENSION).generate("run integration tests");

    let mut events = Vec::new();
    for i in 0..4 {
        let mut ctx = serde_json::Map::new();
        ctx.insert("tool".to_string(), serde_json::json!("run_tests"));
        ctx.insert("success".to_string(), serde_json::json!(true));
        let mut event = athena_core::EpisodicEvent::new(
            "proj",
            EventType::ToolExecution,
            format!("run integration tests attempt {i}"),
        )
        .with_session(session)
        .with_context(ctx);
        event.embedding = Some(shared.clone());
        event.timestamp = chrono::Utc::now() - chrono::Duration::seconds(120 - i * 30);
        events.push(event);
    }
    memory.stores().episodic.append_batch(events).await.unwrap();

    let params = ConsolidationParams::for_project("proj", &memory.config().consol);
    let report = memory.consolidate(&params).await.unwrap();
    assert_eq!(report.promoted_procedures, 1);

    let found = memory
        .stores()
        .procedural
        .find("proj", "run_tests", 5)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].version, 1);
}

#[tokio::test]
async fn failed_session_filter_releases_foreign_events() {
    let memory = memory_engine();
    let mine = Uuid::new_v4();
    let other = Uuid::new_v4();

    let mut events = session_burst("proj", mine, &["mine one", "mine two"], 10);
    events.extend(session_burst("proj", other, &["other one"], 10));
    memory.stores().episodic.append_batch(events).await.unwrap();

    let mut params = ConsolidationParams::for_project("proj", &memory.config().consol);
    params.session_id = Some(mine);
    memory.consolidate(&params).await.unwrap();

    // The foreign session's event is active again, not stuck consolidating
    let filter = athena_core::EventFilter {
        session_id: Some(other),
        ..Default::default()
    };
    let foreign = memory
        .stores()
        .episodic
        .list("proj", &filter, 10, 0)
        .await
        .unwrap();
    assert_eq!(foreign.len(), 1);
    assert_eq!(foreign[0].lifecycle, Lifecycle::Active);

    let consolidated_count = memory
        .stores()
        .semantic
        .count("proj", &SemanticFilter::default())
        .await
        .unwrap();
    assert!(consolidated_count >= 1);
}
