//! Ingestion pipeline scenarios: mass dedup, cursor resume, per-source
//! isolation, and statistics rollup.

use athena_core::episodic::EpisodicEvent;
use athena_core::error::{Error, Result};
use athena_core::ingest::{EventSource, SourceRegistry, SourceSpec, StaticSource};
use athena_core::types::EventType;
use async_trait::async_trait;
use test_utils::memory_engine;

#[tokio::test]
async fn ten_thousand_duplicates_write_one_row() {
    let memory = memory_engine();
    let events: Vec<EpisodicEvent> = (0..10_000)
        .map(|_| EpisodicEvent::new("proj", EventType::External, "the same observation"))
        .collect();

    let report = memory
        .pipeline()
        .ingest_batch("bulk", events)
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped_duplicate, 9999);

    let count = memory
        .stores()
        .episodic
        .count("proj", &athena_core::EventFilter::default())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn dedup_cache_skips_previously_committed_batches() {
    let memory = memory_engine();
    let batch = || {
        vec![
            EpisodicEvent::new("proj", EventType::External, "observation a"),
            EpisodicEvent::new("proj", EventType::External, "observation b"),
        ]
    };

    let first = memory.pipeline().ingest_batch("src", batch()).await.unwrap();
    assert_eq!(first.inserted, 2);

    let second = memory.pipeline().ingest_batch("src", batch()).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped_duplicate, 2);
}

#[tokio::test]
async fn cursor_resumes_across_runs() {
    let memory = memory_engine();
    let events: Vec<EpisodicEvent> = (0..5)
        .map(|i| EpisodicEvent::new("proj", EventType::External, format!("incremental {i}")))
        .collect();

    let mut source = StaticSource::new("feed", events.clone());
    memory.pipeline().run_source(&mut source).await;

    let cursor = memory
        .stores()
        .cursors
        .get_cursor("feed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cursor.cursor_blob, "5");

    // A fresh source instance over the same data resumes at the cursor and
    // produces nothing new
    let mut resumed = StaticSource::new("feed", events);
    let report = memory.pipeline().run_source(&mut resumed).await;
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped_duplicate, 0);
}

#[derive(Debug)]
struct BrokenSource;

#[async_trait]
impl EventSource for BrokenSource {
    fn id(&self) -> &str {
        "broken"
    }

    async fn generate(&mut self) -> Result<Vec<EpisodicEvent>> {
        Err(Error::Connection("upstream hung up".into()))
    }
}

#[tokio::test]
async fn one_failing_source_does_not_stop_others() {
    let memory = memory_engine();
    let mut sources: Vec<Box<dyn EventSource>> = vec![
        Box::new(BrokenSource),
        Box::new(StaticSource::new(
            "healthy",
            vec![EpisodicEvent::new(
                "proj",
                EventType::External,
                "survived the broken sibling",
            )],
        )),
    ];

    let reports = memory.pipeline().run_all(&mut sources).await;
    assert_eq!(reports.len(), 2);
    assert!(reports[0].failed);
    assert!(!reports[1].failed);
    assert_eq!(reports[1].inserted, 1);
}

#[tokio::test]
async fn unknown_source_kind_is_rejected() {
    let registry = SourceRegistry::new();
    let spec = SourceSpec {
        kind: "telepathy".to_string(),
        id: "t1".to_string(),
        credentials: serde_json::Map::new(),
        config: serde_json::Map::new(),
    };
    let err = registry.create(&spec).unwrap_err();
    assert!(matches!(err, Error::UnknownSource(_)));
}

#[tokio::test]
async fn statistics_roll_up_per_source() {
    let memory = memory_engine();
    let mut source = StaticSource::new(
        "stats-src",
        vec![
            EpisodicEvent::new("proj", EventType::External, "one"),
            EpisodicEvent::new("proj", EventType::External, "two"),
            EpisodicEvent::new("proj", EventType::External, "one"),
        ],
    );
    memory.pipeline().run_source(&mut source).await;

    let stats = memory.pipeline().stats().source("stats-src");
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.skipped_duplicate, 1);
    assert!(stats.batches >= 1);
}
