// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Data engine abstraction.
//!
//! To add support for a specific backend, implement [`Engine`]. Errors from
//! either method are logged by the worker pool and never stop it.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::window::{Query, Window};

/// Backend that executes queries and stores anomalous windows.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Execute `query` and return the resulting windows.
    async fn get_windows(&self, query: &Query) -> Result<Vec<Window>, EngineError>;

    /// Persist a window that was flagged as anomalous.
    async fn record_anomalous(&self, window: Window) -> Result<(), EngineError>;
}
