//! Facade-level scenarios: ingest/recall round trips, provenance-protected
//! forget, duplicate relations, and cache behavior.

use athena_core::episodic::EpisodicEvent;
use athena_core::error::Error;
use athena_core::ingest::StaticSource;
use athena_core::manager::RememberKind;
use athena_core::retrieval::RecallOptions;
use athena_core::types::{ConsolidationState, EventType, MemoryType};
use test_utils::{embedded_event, memory_engine, semantic_fact};
use uuid::Uuid;

#[tokio::test]
async fn ingest_batch_dedups_and_recall_finds_both_events() {
    let memory = memory_engine();

    // Three events, one a duplicate of the first
    let events = vec![
        EpisodicEvent::new("proj", EventType::UserInput, "login failed"),
        EpisodicEvent::new("proj", EventType::UserInput, "login succeeded"),
        EpisodicEvent::new("proj", EventType::UserInput, "login failed"),
    ];
    let mut source = StaticSource::new("auth-log", events);
    let report = memory.pipeline().run_source(&mut source).await;

    assert!(!report.failed);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped_duplicate, 1);

    let options = RecallOptions::for_project("proj").with_k(5);
    let response = memory.recall("login", &options).await.unwrap();
    let contents: Vec<&str> = response.results.iter().map(|r| r.content.as_str()).collect();
    assert!(contents.contains(&"login failed"));
    assert!(contents.contains(&"login succeeded"));
}

#[tokio::test]
async fn recall_is_sorted_capped_and_cached() {
    let memory = memory_engine();
    for i in 0..12 {
        memory
            .remember(
                "proj",
                &format!("authentication fact number {i} about token flows"),
                RememberKind::Semantic(MemoryType::Fact),
                None,
            )
            .await
            .unwrap();
    }

    let options = RecallOptions::for_project("proj").with_k(5).with_depth(1);
    let first = memory.recall("authentication", &options).await.unwrap();
    assert!(first.results.len() <= 5);
    assert!(first
        .results
        .windows(2)
        .all(|w| w[0].score >= w[1].score));
    assert!(!first.cache_hit);

    let second = memory.recall("authentication", &options).await.unwrap();
    assert!(second.cache_hit);
}

#[tokio::test]
async fn writes_invalidate_the_recall_cache() {
    let memory = memory_engine();
    memory
        .remember(
            "proj",
            "deploys roll back automatically on failed health checks",
            RememberKind::Semantic(MemoryType::Fact),
            None,
        )
        .await
        .unwrap();

    let options = RecallOptions::for_project("proj").with_k(5);
    let _ = memory.recall("deploys", &options).await.unwrap();

    memory
        .remember(
            "proj",
            "deploys pause during the friday freeze window",
            RememberKind::Semantic(MemoryType::Fact),
            None,
        )
        .await
        .unwrap();

    let after_write = memory.recall("deploys", &options).await.unwrap();
    assert!(!after_write.cache_hit);
    assert_eq!(after_write.results.len(), 2);
}

#[tokio::test]
async fn forget_semantic_with_shared_provenance_is_rejected() {
    let memory = memory_engine();
    let shared_event = Uuid::new_v4();

    let mut first = semantic_fact("proj", "timeouts correlate with backup windows");
    first.provenance.insert(shared_event);
    first.consolidation_state = ConsolidationState::Consolidated;
    let first_id = first.id;

    let mut second = semantic_fact("proj", "backups saturate the disk at 2am");
    second.provenance.insert(shared_event);
    second.consolidation_state = ConsolidationState::Consolidated;

    memory.stores().semantic.upsert(first).await.unwrap();
    memory.stores().semantic.upsert(second).await.unwrap();

    let err = memory.forget("proj", first_id).await.unwrap_err();
    match err {
        Error::IntegrityViolation { hint, .. } => {
            assert!(hint.contains("archive"));
        }
        other => panic!("expected IntegrityViolation, got {other}"),
    }

    // The memory is still there
    let still_there = memory
        .stores()
        .semantic
        .fetch_by_ids(&[first_id])
        .await
        .unwrap();
    assert_eq!(still_there.len(), 1);
}

#[tokio::test]
async fn duplicate_relation_keeps_one_row_with_higher_weight() {
    let memory = memory_engine();
    memory
        .op_create_relation("proj", "A", "B", "depends_on")
        .await
        .unwrap();
    memory
        .op_create_relation("proj", "A", "B", "depends_on")
        .await
        .unwrap();

    let a = memory
        .stores()
        .graph
        .find_entity_by_name("proj", "A")
        .await
        .unwrap()
        .unwrap();
    let neighborhood = memory
        .stores()
        .graph
        .get_neighborhood(a.id, 1, None)
        .await
        .unwrap();
    assert_eq!(neighborhood.relations.len(), 1);
    assert_eq!(neighborhood.relations[0].observation_count, 2);
    assert!(neighborhood.relations[0].weight > 0.5);
}

#[tokio::test]
async fn record_event_triggers_prospective_tasks() {
    let memory = memory_engine();
    let task = test_utils::triggered_task("proj", "investigate timeouts", "timeout");
    let task_id = memory.stores().prospective.create_task(task).await.unwrap();

    let events = vec![embedded_event(
        "proj",
        EventType::Error,
        "gateway timeout after 30 seconds",
    )];
    let mut source = StaticSource::new("alerts", events);
    let report = memory.pipeline().run_source(&mut source).await;
    assert_eq!(report.inserted, 1);

    let task = memory
        .stores()
        .prospective
        .get(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, athena_core::types::TaskStatus::Active);
}

#[tokio::test]
async fn verification_decisions_land_in_the_observer() {
    let memory = memory_engine();
    memory
        .remember(
            "proj",
            "observability matters",
            RememberKind::Semantic(MemoryType::Insight),
            None,
        )
        .await
        .unwrap();
    let options = RecallOptions::for_project("proj").with_k(3);
    let response = memory.recall("observability", &options).await.unwrap();

    let decisions = memory.observer().recent(10);
    assert!(decisions
        .iter()
        .any(|d| d.id == response.verification.decision_id));
    assert!(decisions.iter().any(|d| d.operation == "recall"));
}
