// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Windows, queries and the dispatch envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tag set attached to windows and queries.
pub type Tags = HashMap<String, String>;

/// A named, tagged, time-bounded slice of samples produced by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Series name.
    pub name: String,
    /// Tags from the data source, merged with query tags before detection.
    pub tags: Tags,
    /// Start of the window.
    pub start: DateTime<Utc>,
    /// Ordered samples.
    pub data: Vec<f64>,
}

impl Window {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, data: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            tags: Tags::new(),
            start,
            data,
        }
    }

    /// Builder-style tag insertion.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Merge `tags` into this window. Query tags win over source tags.
    pub fn merge_tags(&mut self, tags: &Tags) {
        for (k, v) in tags {
            self.tags.insert(k.clone(), v.clone());
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.tags.iter().collect();
        tags.sort();
        write!(f, "{} {{", self.name)?;
        for (i, (k, v)) in tags.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}} @ {}", self.start.to_rfc3339())
    }
}

/// Opaque data-source query. Only the [`Engine`](crate::engine::Engine) interprets `statement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Human-readable name used in logs.
    pub name: String,
    /// Engine-specific statement.
    pub statement: String,
}

impl Query {
    pub fn new(name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.statement)
    }
}

/// Envelope placed on the dispatch queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuery {
    pub query: Query,
    /// Stamped onto every window the query returns.
    pub tags: Tags,
}

impl DataQuery {
    pub fn new(query: Query, tags: Tags) -> Self {
        Self { query, tags }
    }
}
