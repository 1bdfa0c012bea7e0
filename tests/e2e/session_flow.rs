//! Session lifecycle scenarios: hydration, event recording, and session-end
//! consolidation, on both backends.

use athena_core::episodic::EpisodicEvent;
use athena_core::manager::RememberKind;
use athena_core::types::{EventType, MemoryType, TaskPhase};
use test_utils::{durable_engine, memory_engine};

#[tokio::test]
async fn start_session_hydrates_working_memory() {
    let memory = memory_engine();
    for i in 0..5 {
        memory
            .remember(
                "proj",
                &format!("recent error pattern {i} in the payment flow"),
                RememberKind::Event(EventType::Error),
                None,
            )
            .await
            .unwrap();
    }
    memory
        .remember(
            "proj",
            "payments fail closed when the ledger is unreachable",
            RememberKind::Semantic(MemoryType::Rule),
            None,
        )
        .await
        .unwrap();

    let session = memory.sessions().start_session("proj").await.unwrap();
    assert!(session.is_active());

    let working = memory.sessions().get_working_memory("proj", 7).await.unwrap();
    assert!(!working.is_empty());
    assert!(working.len() <= 7);
}

#[tokio::test]
async fn session_events_are_linked_and_consolidated_at_end() {
    let memory = memory_engine();
    let session = memory.sessions().start_session("proj").await.unwrap();

    for i in 0..3 {
        let event = EpisodicEvent::new(
            "proj",
            EventType::ToolExecution,
            format!("session step {i} rebuilding the index"),
        );
        memory
            .sessions()
            .record_session_event(session.session_id, event)
            .await
            .unwrap();
    }

    let updated = memory
        .sessions()
        .update_context(
            session.session_id,
            Some("rebuild search index".to_string()),
            Some(TaskPhase::Executing),
        )
        .await
        .unwrap();
    assert_eq!(updated.task.as_deref(), Some("rebuild search index"));

    let report = memory
        .sessions()
        .end_session(session.session_id)
        .await
        .unwrap();
    assert_eq!(report.selected_events, 3);

    // Ending twice is an error
    assert!(memory
        .sessions()
        .end_session(session.session_id)
        .await
        .is_err());
}

#[tokio::test]
async fn duplicate_session_event_does_not_grow_the_session() {
    let memory = memory_engine();
    let session = memory.sessions().start_session("proj").await.unwrap();

    let first = memory
        .sessions()
        .record_session_event(
            session.session_id,
            EpisodicEvent::new("proj", EventType::UserInput, "same message"),
        )
        .await
        .unwrap();
    let second = memory
        .sessions()
        .record_session_event(
            session.session_id,
            EpisodicEvent::new("proj", EventType::UserInput, "same message"),
        )
        .await
        .unwrap();
    assert_eq!(first, second);

    let stored = memory
        .stores()
        .sessions
        .get(session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.event_ids.len(), 1);
}

#[tokio::test]
async fn session_flow_works_on_the_durable_backend() {
    let (memory, _dir) = durable_engine().await.unwrap();
    let session = memory.sessions().start_session("proj").await.unwrap();

    memory
        .sessions()
        .record_session_event(
            session.session_id,
            EpisodicEvent::new("proj", EventType::Decision, "chose libsql for durability"),
        )
        .await
        .unwrap();

    let report = memory
        .sessions()
        .end_session(session.session_id)
        .await
        .unwrap();
    assert_eq!(report.selected_events, 1);

    let stored = memory
        .stores()
        .sessions
        .get(session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_active());
}
