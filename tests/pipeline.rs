//! Integration tests for the Vigil pipeline
//!
//! Drives a [`Manager`] end to end against an in-memory engine.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::watch;
use vigil::manager::{MAPPINGS_KEY, STORE_BUCKET};
use vigil::*;

// ============================================================================
// Test engine
// ============================================================================

#[derive(Default)]
struct MemoryEngine {
    /// Windows returned per query statement. Unknown statements fail.
    windows: HashMap<String, Vec<Window>>,
    fail_records: bool,
    calls: AtomicUsize,
    recorded: Mutex<Vec<Window>>,
}

impl MemoryEngine {
    fn with(mut self, statement: &str, windows: Vec<Window>) -> Self {
        self.windows.insert(statement.to_string(), windows);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn recorded(&self) -> Vec<Window> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn get_windows(&self, query: &Query) -> Result<Vec<Window>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.windows
            .get(&query.statement)
            .cloned()
            .ok_or_else(|| EngineError::Query {
                query: query.name.clone(),
                reason: "unknown statement".to_string(),
            })
    }

    async fn record_anomalous(&self, window: Window) -> Result<(), EngineError> {
        if self.fail_records {
            return Err(EngineError::Record {
                window: window.name,
                reason: "sink offline".to_string(),
            });
        }
        self.recorded.lock().unwrap().push(window);
        Ok(())
    }
}

type Result<T, E> = std::result::Result<T, E>;

// ============================================================================
// Helpers
// ============================================================================

fn window(name: &str, value: f64) -> Window {
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    Window::new(name, start, vec![value; 32])
}

fn data_query(statement: &str) -> DataQuery {
    DataQuery::new(Query::new(statement, statement), Tags::new())
}

fn config(dir: &TempDir, workers: usize, capacity: usize) -> ManagerConfig {
    ManagerConfig {
        queue_capacity: capacity,
        worker_count: Some(workers),
        store_path: dir.path().join("vigil.db"),
    }
}

/// Detector flagging every window whose fingerprint is not yet the majority.
fn strict_detector() -> DetectorConfig {
    DetectorConfig {
        min_support: 1.0,
        ..Default::default()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_queued_before_start_are_all_executed() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::default().with("q", vec![]));
    let mut manager = Manager::new(
        Arc::new(Mapper::new()),
        Arc::clone(&engine) as Arc<dyn Engine>,
        Vec::new(),
        config(&dir, 3, 10),
    )
    .unwrap();

    for _ in 0..10 {
        manager.enqueue(data_query("q")).await.unwrap();
    }
    assert_eq!(engine.calls(), 0);

    manager.start().await.unwrap();
    let stats = manager.stop().await.unwrap();

    assert_eq!(engine.calls(), 10);
    assert_eq!(stats.queries_executed, 10);
}

#[tokio::test]
async fn test_enqueue_after_stop_is_rejected() {
    let dir = tempdir().unwrap();
    let mut manager = Manager::new(
        Arc::new(Mapper::new()),
        Arc::new(MemoryEngine::default()),
        Vec::new(),
        config(&dir, 1, 4),
    )
    .unwrap();

    manager.start().await.unwrap();
    manager.stop().await.unwrap();

    assert_eq!(
        manager.enqueue(data_query("q")).await,
        Err(QueueError::Closed)
    );
}

#[tokio::test]
async fn test_stop_drains_pending_work() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::default().with("q", vec![window("cpu", 0.5)]));
    let mut manager = Manager::new(
        Arc::new(Mapper::new()),
        Arc::clone(&engine) as Arc<dyn Engine>,
        Vec::new(),
        config(&dir, 2, 64),
    )
    .unwrap();

    manager.start().await.unwrap();
    for _ in 0..50 {
        manager.enqueue(data_query("q")).await.unwrap();
    }
    let stats = manager.stop().await.unwrap();

    assert_eq!(engine.calls(), 50);
    assert_eq!(stats.windows_processed, 50);
    assert_eq!(stats.unmapped_windows, 50);
}

// ============================================================================
// Worker behavior
// ============================================================================

#[tokio::test]
async fn test_anomalies_recorded_with_query_tags() {
    let dir = tempdir().unwrap();
    let mapper = Arc::new(Mapper::new());
    mapper
        .add_rule(RoutingRule::new("^cpu$", strict_detector()).with_tag("env", "^prod$"))
        .unwrap();

    let source = window("cpu", 0.9).with_tag("env", "staging").with_tag("host", "a");
    let engine = Arc::new(
        MemoryEngine::default().with("q", vec![window("cpu", 0.1), source]),
    );
    let mut manager = Manager::new(
        Arc::clone(&mapper),
        Arc::clone(&engine) as Arc<dyn Engine>,
        Vec::new(),
        config(&dir, 1, 4),
    )
    .unwrap();

    let mut tags = Tags::new();
    tags.insert("env".to_string(), "prod".to_string());

    manager.start().await.unwrap();
    manager
        .enqueue(DataQuery::new(Query::new("q", "q"), tags))
        .await
        .unwrap();
    let stats = manager.stop().await.unwrap();

    // First window seeds the detector, second is a new fingerprint at support 1/2
    assert_eq!(stats.anomalies_recorded, 1);
    let recorded = engine.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].data, vec![0.9; 32]);
    assert_eq!(recorded[0].tags.get("env").map(String::as_str), Some("prod"));
    assert_eq!(recorded[0].tags.get("host").map(String::as_str), Some("a"));
}

#[tokio::test]
async fn test_failures_are_not_fatal() {
    let dir = tempdir().unwrap();
    let mapper = Arc::new(Mapper::new());
    mapper.add_rule(RoutingRule::new("cpu", strict_detector())).unwrap();

    let engine = Arc::new(MemoryEngine {
        fail_records: true,
        ..MemoryEngine::default().with(
            "good",
            vec![
                window("cpu", 0.1),
                window("cpu", 0.9),
                window("disk", 0.5),
                // Outside the default [0, 1] range
                window("cpu", 7.0),
            ],
        )
    });
    let mut manager = Manager::new(
        mapper,
        Arc::clone(&engine) as Arc<dyn Engine>,
        Vec::new(),
        config(&dir, 1, 8),
    )
    .unwrap();

    manager.start().await.unwrap();
    manager.enqueue(data_query("missing")).await.unwrap();
    manager.enqueue(data_query("good")).await.unwrap();
    manager.enqueue(data_query("missing")).await.unwrap();
    let stats = manager.stop().await.unwrap();

    assert_eq!(
        stats,
        ManagerStats {
            queries_executed: 1,
            query_failures: 2,
            windows_processed: 4,
            unmapped_windows: 1,
            anomalies_recorded: 0,
            record_failures: 1,
            detection_errors: 1,
        }
    );
}

// ============================================================================
// Triggers
// ============================================================================

/// Fires once, then idles until shutdown.
struct OnceTrigger;

#[async_trait]
impl Trigger for OnceTrigger {
    async fn run(
        self: Box<Self>,
        query: Query,
        on_fire: FireCallback,
        mut shutdown: watch::Receiver<bool>,
    ) {
        on_fire.fire(query).await;
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_scheduled_queries_run_with_their_tags() {
    let dir = tempdir().unwrap();
    let mapper = Arc::new(Mapper::new());
    mapper
        .add_rule(RoutingRule::new("cpu", DetectorConfig::default()).with_tag("team", "^ops$"))
        .unwrap();
    let engine = Arc::new(MemoryEngine::default().with("select cpu", vec![window("cpu", 0.3)]));

    let mut tags = Tags::new();
    tags.insert("team".to_string(), "ops".to_string());
    let scheduled = vec![
        ScheduledQuery::new(Query::new("cpu", "select cpu"), tags, Box::new(OnceTrigger)),
        ScheduledQuery::new(
            Query::new("cpu-interval", "select cpu"),
            Tags::new(),
            Box::new(IntervalTrigger::new(Duration::from_secs(3600))),
        ),
    ];

    let mut manager = Manager::new(
        mapper,
        Arc::clone(&engine) as Arc<dyn Engine>,
        scheduled,
        config(&dir, 2, 8),
    )
    .unwrap();
    manager.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let stats = manager.stop().await.unwrap();

    // Only the tagged query's window matches the rule
    assert_eq!(stats.queries_executed, 2);
    assert_eq!(stats.unmapped_windows, 1);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_routing_table_survives_restart() {
    let dir = tempdir().unwrap();
    let rules = vec![
        RoutingRule::new("^cpu", DetectorConfig::default()).with_tag("env", "prod"),
        RoutingRule::new("^mem", strict_detector()),
        RoutingRule::new(".*", DetectorConfig::default()),
    ];

    let mapper = Arc::new(Mapper::new());
    for rule in &rules {
        mapper.add_rule(rule.clone()).unwrap();
    }
    let mut first = Manager::new(
        mapper,
        Arc::new(MemoryEngine::default()),
        Vec::new(),
        config(&dir, 1, 4),
    )
    .unwrap();
    first.start().await.unwrap();
    first.stop().await.unwrap();

    let restored = Arc::new(Mapper::new());
    let mut second = Manager::new(
        Arc::clone(&restored),
        Arc::new(MemoryEngine::default()),
        Vec::new(),
        config(&dir, 1, 4),
    )
    .unwrap();
    second.start().await.unwrap();

    assert_eq!(restored.rules(), rules);
    assert!(restored.map(&window("cpu", 0.5)).is_some());
    assert!(restored.map(&window("anything", 0.5)).is_some());

    second.stop().await.unwrap();
}

#[tokio::test]
async fn test_persisted_table_replaces_configured_rules() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(dir.path().join("vigil.db"), STORE_BUCKET).unwrap();
        let seeded = Mapper::new();
        seeded
            .add_rule(RoutingRule::new("^disk$", DetectorConfig::default()))
            .unwrap();
        store.put(MAPPINGS_KEY, seeded.save().unwrap()).unwrap();
        store.close().unwrap();
    }

    let mapper = Arc::new(Mapper::new());
    mapper
        .add_rule(RoutingRule::new("^cpu$", DetectorConfig::default()))
        .unwrap();
    let mut manager = Manager::new(
        Arc::clone(&mapper),
        Arc::new(MemoryEngine::default()),
        Vec::new(),
        config(&dir, 1, 4),
    )
    .unwrap();
    manager.start().await.unwrap();

    assert_eq!(mapper.len(), 1);
    assert!(mapper.map(&window("disk", 0.5)).is_some());
    assert!(mapper.map(&window("cpu", 0.5)).is_none());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_table_fails_start() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(dir.path().join("vigil.db"), STORE_BUCKET).unwrap();
        store.put(MAPPINGS_KEY, b"{not a table".to_vec()).unwrap();
        store.close().unwrap();
    }

    let mut manager = Manager::new(
        Arc::new(Mapper::new()),
        Arc::new(MemoryEngine::default()),
        Vec::new(),
        config(&dir, 1, 4),
    )
    .unwrap();

    let err = manager.start().await.unwrap_err();
    assert!(matches!(err, VigilError::Mapper(MapperError::Decode(_))));
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_corrupt_store_fails_start() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vigil.db");
    std::fs::write(&path, b"not a database").unwrap();

    let mut manager = Manager::new(
        Arc::new(Mapper::new()),
        Arc::new(MemoryEngine::default()),
        Vec::new(),
        config(&dir, 1, 4),
    )
    .unwrap();

    assert!(matches!(
        manager.start().await,
        Err(VigilError::Store(_))
    ));
    assert!(!manager.is_running());
}
