// Vigil Daemon - Configuration
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Daemon configuration, loaded from a JSON file.
//!
//! ```json
//! {
//!   "manager": {"queue_capacity": 100, "store_path": "vigil.db"},
//!   "data_dir": "data",
//!   "anomaly_log": "anomalies.jsonl",
//!   "rules": [{"name_pattern": "^temp", "detector": {"min_support": 0.1}}],
//!   "queries": [{"name": "sensors", "statement": "sensors.csv", "interval_secs": 60}]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vigil::{IntervalTrigger, ManagerConfig, Query, RoutingRule, ScheduledQuery, Tags};

/// A query run on a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Name used in logs.
    pub name: String,
    /// CSV file, relative to the data directory.
    pub statement: String,
    /// Tags stamped on every window the query returns.
    #[serde(default)]
    pub tags: Tags,
    /// Seconds between runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub manager: ManagerConfig,
    /// Directory holding the CSV datasets.
    pub data_dir: PathBuf,
    /// JSON-lines file receiving anomalous windows.
    pub anomaly_log: PathBuf,
    /// Routing rules seeding an empty store.
    pub rules: Vec<RoutingRule>,
    pub queries: Vec<QueryConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            data_dir: PathBuf::from("."),
            anomaly_log: PathBuf::from("anomalies.jsonl"),
            rules: Vec::new(),
            queries: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Read, parse and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "manager.queue_capacity must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for query in &self.queries {
            if query.interval_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "query '{}': interval_secs must be at least 1",
                    query.name
                )));
            }
            if !names.insert(query.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate query name '{}'",
                    query.name
                )));
            }
        }
        Ok(())
    }

    /// One interval-triggered scheduled query per configured query.
    pub fn scheduled_queries(&self) -> Vec<ScheduledQuery> {
        self.queries
            .iter()
            .map(|q| {
                ScheduledQuery::new(
                    Query::new(q.name.clone(), q.statement.clone()),
                    q.tags.clone(),
                    Box::new(IntervalTrigger::new(Duration::from_secs(q.interval_secs))),
                )
            })
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {0}: {1}")]
    Read(String, String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
