// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Routing of windows to detectors.
//!
//! The [`Mapper`] owns an ordered table of [`RoutingRule`]s. Each rule pairs a
//! name pattern and per-tag patterns with a detector configuration; the first
//! rule whose patterns all match a window wins.
//!
//! # Persisted format
//!
//! The table serializes to a versioned JSON document:
//!
//! ```text
//! {"version": 1, "rules": [{"name_pattern": "...", "tag_patterns": {...}, "detector": {...}}]}
//! ```
//!
//! Detector state (retained fingerprints) is not part of the document; each
//! load builds fresh detectors from their configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::detector::{Detector, DetectorConfig};
use crate::error::MapperError;
use crate::window::Window;

/// Current routing table format version
pub const TABLE_FORMAT_VERSION: u32 = 1;

/// Association between window-matching patterns and a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Regular expression matched against the window name.
    pub name_pattern: String,
    /// Regular expressions matched against tag values. A missing tag fails the rule.
    #[serde(default)]
    pub tag_patterns: BTreeMap<String, String>,
    /// Detector built for windows matching this rule.
    #[serde(default)]
    pub detector: DetectorConfig,
}

impl RoutingRule {
    pub fn new(name_pattern: impl Into<String>, detector: DetectorConfig) -> Self {
        Self {
            name_pattern: name_pattern.into(),
            tag_patterns: BTreeMap::new(),
            detector,
        }
    }

    /// Builder-style tag pattern.
    pub fn with_tag(mut self, tag: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.tag_patterns.insert(tag.into(), pattern.into());
        self
    }
}

struct CompiledRule {
    rule: RoutingRule,
    name: Regex,
    tags: Vec<(String, Regex)>,
    detector: Arc<dyn Detector>,
}

impl CompiledRule {
    fn compile(rule: RoutingRule) -> Result<Self, MapperError> {
        let name = compile_pattern(&rule.name_pattern)?;
        let tags = rule
            .tag_patterns
            .iter()
            .map(|(tag, pattern)| Ok((tag.clone(), compile_pattern(pattern)?)))
            .collect::<Result<Vec<_>, MapperError>>()?;
        let detector = rule
            .detector
            .build()
            .map_err(|e| MapperError::InvalidDetector(e.to_string()))?;

        Ok(Self {
            rule,
            name,
            tags,
            detector: Arc::new(detector),
        })
    }

    fn matches(&self, window: &Window) -> bool {
        self.name.is_match(&window.name)
            && self.tags.iter().all(|(tag, pattern)| {
                window
                    .tags
                    .get(tag)
                    .map(|value| pattern.is_match(value))
                    .unwrap_or(false)
            })
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, MapperError> {
    Regex::new(pattern).map_err(|e| MapperError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Serialize)]
struct TableRef<'a> {
    version: u32,
    rules: Vec<&'a RoutingRule>,
}

#[derive(Deserialize)]
struct TableVersion {
    version: u32,
}

#[derive(Deserialize)]
struct Table {
    rules: Vec<RoutingRule>,
}

/// Decode a persisted routing table.
pub fn decode_table(bytes: &[u8]) -> Result<Vec<RoutingRule>, MapperError> {
    let probe: TableVersion =
        serde_json::from_slice(bytes).map_err(|e| MapperError::Decode(e.to_string()))?;
    if probe.version != TABLE_FORMAT_VERSION {
        return Err(MapperError::UnsupportedVersion {
            found: probe.version,
            expected: TABLE_FORMAT_VERSION,
        });
    }
    let table: Table =
        serde_json::from_slice(bytes).map_err(|e| MapperError::Decode(e.to_string()))?;
    Ok(table.rules)
}

/// Encode rules as a persisted routing table.
pub fn encode_table(rules: &[RoutingRule]) -> Result<Vec<u8>, MapperError> {
    let table = TableRef {
        version: TABLE_FORMAT_VERSION,
        rules: rules.iter().collect(),
    };
    serde_json::to_vec(&table).map_err(|e| MapperError::Encode(e.to_string()))
}

/// Ordered routing table shared by all workers.
///
/// Lookups take a read lock, so any number of workers can map concurrently;
/// rule changes take the write lock.
#[derive(Default)]
pub struct Mapper {
    table: RwLock<Vec<CompiledRule>>,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Invalid patterns or detector configs are rejected.
    pub fn add_rule(&self, rule: RoutingRule) -> Result<(), MapperError> {
        let compiled = CompiledRule::compile(rule)?;
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(compiled);
        Ok(())
    }

    /// Detector of the first rule matching `window`, if any.
    pub fn map(&self, window: &Window) -> Option<Arc<dyn Detector>> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .iter()
            .find(|rule| rule.matches(window))
            .map(|rule| Arc::clone(&rule.detector))
    }

    /// Rules in table order.
    pub fn rules(&self) -> Vec<RoutingRule> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.rule.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the table with the decoded contents of `bytes`.
    ///
    /// All rules are compiled before the swap, so a failure leaves the
    /// current table untouched. Returns the number of rules loaded.
    pub fn load(&self, bytes: &[u8]) -> Result<usize, MapperError> {
        let compiled = decode_table(bytes)?
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        let count = compiled.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        debug!("Loaded {} routing rules", count);
        Ok(count)
    }

    /// Serialize the current table.
    pub fn save(&self) -> Result<Vec<u8>, MapperError> {
        encode_table(&self.rules())
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper").field("rules", &self.len()).finish()
    }
}
