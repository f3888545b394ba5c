//! # Vigil - Windowed anomaly detection pipeline
//!
//! Vigil periodically runs queries against a data engine, turns the returned
//! windows of samples into statistical fingerprints, and records the windows
//! whose fingerprints look anomalous.
//!
//! ## Key Features
//!
//! - **Pluggable engine**: any backend implementing [`Engine`]
//! - **Routing table**: regex rules map each window to its own [`Detector`]
//! - **Bounded dispatch**: a fixed-capacity queue with backpressure, drained on shutdown
//! - **Persistence**: the routing table survives restarts in an embedded [`Store`]
//!
//! ## Quick Start
//!
//! ```rust
//! use vigil::fingerprint::{Fingerprint, Fingerprinter, JsDivFingerprinter};
//! use vigil::Window;
//!
//! let fingerprinter = JsDivFingerprinter::new(0.0, 1.0, 10, 0.05).unwrap();
//! let now = chrono::Utc::now();
//!
//! let a = fingerprinter.fingerprint(&Window::new("cpu", now, vec![0.2; 50])).unwrap();
//! let b = fingerprinter.fingerprint(&Window::new("cpu", now, vec![0.2; 50])).unwrap();
//! assert!(a.is_match(b.as_ref()));
//! ```
//!
//! ## Modules
//!
//! - [`window`]: windows, queries and the dispatch envelope
//! - [`engine`]: data engine abstraction
//! - [`fingerprint`]: histogram fingerprints and the divergence test
//! - [`detector`]: anomaly decision over fingerprints
//! - [`mapper`]: routing of windows to detectors
//! - [`store`]: embedded key-value store for the routing table
//! - [`queue`]: bounded dispatch queue
//! - [`trigger`]: query schedules
//! - [`manager`]: pipeline lifecycle and worker pool

// Modules
pub mod detector;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod manager;
pub mod mapper;
pub mod queue;
pub mod store;
pub mod trigger;
pub mod window;

// Re-exports for convenient access
pub use detector::{Detector, DetectorConfig, FingerprintDetector};
pub use engine::Engine;
pub use error::{
    EngineError, FingerprintError, MapperError, QueueError, Result, StoreError, VigilError,
};
pub use fingerprint::{Fingerprint, Fingerprinter, FingerprinterConfig};
pub use manager::{Manager, ManagerConfig, ManagerStats, WorkerState};
pub use mapper::{Mapper, RoutingRule};
pub use queue::DispatchQueue;
pub use store::Store;
pub use trigger::{FireCallback, IntervalTrigger, ScheduledQuery, Trigger};
pub use window::{DataQuery, Query, Tags, Window};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
