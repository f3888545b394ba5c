//! Error types for Vigil
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;

/// Main error type for Vigil operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VigilError {
    /// Fingerprint or divergence math error
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    /// Routing table error
    #[error("Mapper error: {0}")]
    Mapper(#[from] MapperError),

    /// Persisted store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Dispatch queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Engine collaborator error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Manager lifecycle error
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

/// Errors from histogram construction and the significance test
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FingerprintError {
    /// Bin count must be at least one
    #[error("Invalid bin count: {0}")]
    InvalidBinCount(usize),

    /// Histogram range is empty or not finite
    #[error("Invalid histogram range: [{min}, {max})")]
    InvalidRange { min: f64, max: f64 },

    /// Significance threshold must lie in (0, 1]
    #[error("Invalid p-value threshold: {0}")]
    InvalidThreshold(f64),

    /// Sample falls outside the configured range
    #[error("Sample {value} outside histogram range [{min}, {max}]")]
    SampleOutOfRange { value: f64, min: f64, max: f64 },

    /// Two distributions of different length were compared
    #[error("Histogram length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    /// Incomplete gamma called outside its domain
    #[error("Invalid incomplete gamma argument: shape={shape}, x={x}")]
    InvalidGammaArgument { shape: f64, x: f64 },

    /// Incomplete gamma evaluation produced no finite probability
    #[error("Incomplete gamma is numerically unstable (shape={shape}, x={x})")]
    NumericInstability { shape: f64, x: f64 },
}

/// Errors related to routing rules and the routing table
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapperError {
    /// A rule pattern is not a valid regular expression
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Detector configuration rejected
    #[error("Invalid detector config: {0}")]
    InvalidDetector(String),

    /// Persisted table could not be decoded
    #[error("Failed to decode routing table: {0}")]
    Decode(String),

    /// Persisted table could not be encoded
    #[error("Failed to encode routing table: {0}")]
    Encode(String),

    /// Persisted table written by an unknown format version
    #[error("Unsupported routing table version: {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Errors related to the embedded key-value store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// Database files failed their integrity checks
    #[error("Corrupted store {path}: {reason}")]
    Corrupted { path: String, reason: String },

    /// Any other database failure
    #[error("Store {path} failed: {reason}")]
    Backend { path: String, reason: String },
}

/// Errors related to the dispatch queue
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Queue no longer accepts work
    #[error("Dispatch queue is closed")]
    Closed,

    /// Queue capacity must be non-zero
    #[error("Invalid queue capacity: {0}")]
    InvalidCapacity(usize),
}

/// Errors reported by an [`Engine`](crate::engine::Engine) implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Query could not be executed
    #[error("Query '{query}' failed: {reason}")]
    Query { query: String, reason: String },

    /// Anomalous window could not be recorded
    #[error("Failed to record window '{window}': {reason}")]
    Record { window: String, reason: String },
}
