// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pipeline manager: triggers, dispatch queue and worker pool.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► start ──────────────────────────────► stop
//!          │ open store, load routing table      │ signal triggers, close queue
//!          │ spawn one task per trigger          │ drain and join workers
//!          │ spawn worker pool                   │ persist routing table
//!                                                │ close store
//! ```
//!
//! # Worker states
//!
//! Idle → ExecutingQuery → Tagging → Mapping → Detecting → Recording → Idle.
//! Mapping and Detecting repeat per window; Recording only for anomalies.
//! A failure at any step is logged, counted and skipped.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::engine::Engine;
use crate::error::{QueueError, Result, VigilError};
use crate::mapper::Mapper;
use crate::queue::DispatchQueue;
use crate::store::Store;
use crate::trigger::{FireCallback, ScheduledQuery};
use crate::window::{DataQuery, Window};

/// Default dispatch queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Bucket holding Vigil's persisted state
pub const STORE_BUCKET: &str = "vigil";

/// Key of the persisted routing table
pub const MAPPINGS_KEY: &str = "mappings";

/// Manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Dispatch queue capacity.
    pub queue_capacity: usize,
    /// Number of workers. `None` uses the available parallelism.
    pub worker_count: Option<usize>,
    /// Path of the store file holding the routing table.
    pub store_path: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_count: None,
            store_path: PathBuf::from("vigil.db"),
        }
    }
}

impl ManagerConfig {
    /// Resolved worker count, never zero.
    pub fn workers(&self) -> usize {
        self.worker_count
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    ExecutingQuery = 1,
    Tagging = 2,
    Mapping = 3,
    Detecting = 4,
    Recording = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::ExecutingQuery,
            2 => WorkerState::Tagging,
            3 => WorkerState::Mapping,
            4 => WorkerState::Detecting,
            5 => WorkerState::Recording,
            _ => WorkerState::Idle,
        }
    }
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub queries_executed: u64,
    pub query_failures: u64,
    pub windows_processed: u64,
    pub unmapped_windows: u64,
    pub anomalies_recorded: u64,
    pub record_failures: u64,
    pub detection_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queries_executed: AtomicU64,
    query_failures: AtomicU64,
    windows_processed: AtomicU64,
    unmapped_windows: AtomicU64,
    anomalies_recorded: AtomicU64,
    record_failures: AtomicU64,
    detection_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            query_failures: self.query_failures.load(Ordering::Relaxed),
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            unmapped_windows: self.unmapped_windows.load(Ordering::Relaxed),
            anomalies_recorded: self.anomalies_recorded.load(Ordering::Relaxed),
            record_failures: self.record_failures.load(Ordering::Relaxed),
            detection_errors: self.detection_errors.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the manager and its workers.
struct Pipeline {
    mapper: Arc<Mapper>,
    engine: Arc<dyn Engine>,
    queue: Arc<DispatchQueue>,
    counters: Counters,
    states: Vec<AtomicU8>,
}

impl Pipeline {
    fn set_state(&self, worker: usize, state: WorkerState) {
        if let Some(slot) = self.states.get(worker) {
            slot.store(state as u8, Ordering::Relaxed);
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        while let Some(item) = self.queue.dequeue().await {
            self.process_query(worker, item).await;
            self.set_state(worker, WorkerState::Idle);
        }
        debug!(worker, "Worker exiting");
    }

    async fn process_query(&self, worker: usize, item: DataQuery) {
        self.set_state(worker, WorkerState::ExecutingQuery);
        debug!(worker, query = %item.query, "Executing query");

        let mut windows = match self.engine.get_windows(&item.query).await {
            Ok(windows) => windows,
            Err(e) => {
                error!("Failed to execute query '{}': {}", item.query.name, e);
                Counters::bump(&self.counters.query_failures);
                return;
            }
        };
        Counters::bump(&self.counters.queries_executed);

        self.set_state(worker, WorkerState::Tagging);
        trace!(tags = ?item.tags, windows = windows.len(), "Adding query tags");
        for window in &mut windows {
            window.merge_tags(&item.tags);
        }

        self.process_windows(worker, windows).await;
    }

    async fn process_windows(&self, worker: usize, windows: Vec<Window>) {
        for window in windows {
            Counters::bump(&self.counters.windows_processed);

            self.set_state(worker, WorkerState::Mapping);
            let Some(detector) = self.mapper.map(&window) else {
                warn!("No mapping found for window {}", window);
                Counters::bump(&self.counters.unmapped_windows);
                continue;
            };

            self.set_state(worker, WorkerState::Detecting);
            match detector.is_anomalous(&window) {
                Ok(true) => {
                    self.set_state(worker, WorkerState::Recording);
                    self.record_anomalous(&window).await;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Detection failed for window {}: {}", window, e);
                    Counters::bump(&self.counters.detection_errors);
                }
            }
        }
    }

    async fn record_anomalous(&self, window: &Window) {
        info!("Found anomalous window: {}", window);
        match self.engine.record_anomalous(window.clone()).await {
            Ok(()) => Counters::bump(&self.counters.anomalies_recorded),
            Err(e) => {
                error!("Error recording anomaly: {}", e);
                Counters::bump(&self.counters.record_failures);
            }
        }
    }
}

/// Owns the pipeline and drives its lifecycle.
pub struct Manager {
    config: ManagerConfig,
    pipeline: Arc<Pipeline>,
    scheduled: Vec<ScheduledQuery>,
    store: Option<Store>,
    shutdown: watch::Sender<bool>,
    triggers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    running: bool,
    stopped: bool,
}

impl Manager {
    /// Create a stopped manager. Fails only on an invalid queue capacity.
    pub fn new(
        mapper: Arc<Mapper>,
        engine: Arc<dyn Engine>,
        scheduled: Vec<ScheduledQuery>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let queue = Arc::new(DispatchQueue::new(config.queue_capacity)?);
        let states = (0..config.workers())
            .map(|_| AtomicU8::new(WorkerState::Idle as u8))
            .collect();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            pipeline: Arc::new(Pipeline {
                mapper,
                engine,
                queue,
                counters: Counters::default(),
                states,
            }),
            scheduled,
            store: None,
            shutdown,
            triggers: Vec::new(),
            workers: Vec::new(),
            running: false,
            stopped: false,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.pipeline.mapper
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Open the store, load the routing table and spawn triggers and workers.
    ///
    /// A persisted table replaces whatever rules the mapper already holds; a
    /// table that fails to decode aborts the start. A stopped manager cannot
    /// be started again. Must be called from within a tokio runtime.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(VigilError::Lifecycle("manager already started".to_string()));
        }
        if self.stopped {
            return Err(VigilError::Lifecycle(
                "manager cannot be restarted after stop".to_string(),
            ));
        }

        let store = Store::open(&self.config.store_path, STORE_BUCKET)?;
        match store.get(MAPPINGS_KEY)? {
            Some(bytes) => {
                let count = self.pipeline.mapper.load(&bytes)?;
                info!(
                    "Loaded {} routing rules from {}",
                    count,
                    store.path().display()
                );
            }
            None => debug!(
                "No persisted routing table, using {} configured rules",
                self.pipeline.mapper.len()
            ),
        }
        self.store = Some(store);

        for scheduled in self.scheduled.drain(..) {
            let ScheduledQuery {
                query,
                tags,
                trigger,
            } = scheduled;
            let on_fire = FireCallback::new(Arc::clone(&self.pipeline.queue), tags);
            let shutdown = self.shutdown.subscribe();
            self.triggers
                .push(tokio::spawn(trigger.run(query, on_fire, shutdown)));
        }

        let worker_count = self.pipeline.states.len();
        for worker in 0..worker_count {
            let pipeline = Arc::clone(&self.pipeline);
            self.workers.push(tokio::spawn(pipeline.worker_loop(worker)));
        }

        self.running = true;
        info!(
            "Started {} workers and {} triggers",
            worker_count,
            self.triggers.len()
        );
        Ok(())
    }

    /// Submit a query for execution, waiting if the queue is full.
    ///
    /// Accepted before `start`; items wait in the queue until workers run.
    pub async fn enqueue(&self, item: DataQuery) -> std::result::Result<(), QueueError> {
        self.pipeline.queue.enqueue(item).await
    }

    /// Stop triggers, drain the queue, persist the routing table and close the store.
    pub async fn stop(&mut self) -> Result<ManagerStats> {
        if !self.running {
            return Err(VigilError::Lifecycle("manager not running".to_string()));
        }

        self.shutdown.send_replace(true);
        self.pipeline.queue.close();

        for handle in self.triggers.drain(..) {
            if let Err(e) = handle.await {
                error!("Trigger task failed: {}", e);
            }
        }
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }
        self.running = false;
        self.stopped = true;

        if let Some(store) = self.store.take() {
            persist_table(store, &self.pipeline.mapper)?;
        }

        let stats = self.stats();
        info!("Pipeline stopped: {:?}", stats);
        Ok(stats)
    }

    pub fn stats(&self) -> ManagerStats {
        self.pipeline.counters.snapshot()
    }

    /// Current state of each worker.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pipeline
            .states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::Relaxed)))
            .collect()
    }

    /// Map, detect and record `windows` on the caller's task, bypassing the queue.
    pub async fn process_windows(&self, windows: Vec<Window>) {
        self.pipeline.process_windows(usize::MAX, windows).await;
    }
}

/// Write the routing table and close the store, closing it even if the write fails.
fn persist_table(store: Store, mapper: &Mapper) -> Result<()> {
    let written = mapper
        .save()
        .map_err(VigilError::from)
        .and_then(|bytes| store.put(MAPPINGS_KEY, bytes).map_err(VigilError::from));
    let closed = store.close();

    if let Err(e) = &written {
        error!("Failed to persist routing table: {}", e);
    }
    written?;
    closed?;
    Ok(())
}

impl Drop for Manager {
    fn drop(&mut self) {
        if self.running {
            // Let detached tasks wind down; the store is not persisted
            self.shutdown.send_replace(true);
            self.pipeline.queue.close();
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("running", &self.running)
            .field("stopped", &self.stopped)
            .field("workers", &self.workers.len())
            .field("triggers", &self.triggers.len())
            .finish()
    }
}
