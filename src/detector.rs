// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Detectors decide whether a window is anomalous.
//!
//! [`FingerprintDetector`] is the reference implementation: it keeps a bounded
//! set of fingerprints with hit counts and flags a window whose fingerprint
//! has low support among everything seen so far.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::trace;

use crate::error::FingerprintError;
use crate::fingerprint::{Fingerprint, Fingerprinter, FingerprinterConfig};
use crate::window::Window;

/// Decision logic consulted by the worker pool.
pub trait Detector: Send + Sync {
    fn is_anomalous(&self, window: &Window) -> Result<bool, FingerprintError>;
}

/// Configuration of a [`FingerprintDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// How windows are fingerprinted.
    pub fingerprinter: FingerprinterConfig,
    /// Maximum number of distinct fingerprints retained.
    pub max_fingerprints: usize,
    /// Minimum fraction of windows a fingerprint must account for to be normal.
    pub min_support: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            fingerprinter: FingerprinterConfig::default(),
            max_fingerprints: 64,
            min_support: 0.05,
        }
    }
}

impl DetectorConfig {
    pub fn build(&self) -> Result<FingerprintDetector, FingerprintError> {
        if !(0.0..=1.0).contains(&self.min_support) {
            return Err(FingerprintError::InvalidThreshold(self.min_support));
        }
        Ok(FingerprintDetector::new(
            self.fingerprinter.build()?,
            self.max_fingerprints.max(1),
            self.min_support,
        ))
    }
}

struct Entry {
    fingerprint: Box<dyn Fingerprint>,
    hits: u64,
}

#[derive(Default)]
struct DetectorState {
    entries: Vec<Entry>,
    total: u64,
}

/// Support-based detector over retained fingerprints.
pub struct FingerprintDetector {
    fingerprinter: Box<dyn Fingerprinter>,
    max_fingerprints: usize,
    min_support: f64,
    state: Mutex<DetectorState>,
}

impl FingerprintDetector {
    pub fn new(fingerprinter: Box<dyn Fingerprinter>, max_fingerprints: usize, min_support: f64) -> Self {
        Self {
            fingerprinter,
            max_fingerprints,
            min_support,
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Number of distinct fingerprints currently retained.
    pub fn retained(&self) -> usize {
        self.lock().entries.len()
    }

    /// Number of windows evaluated.
    pub fn observed(&self) -> u64 {
        self.lock().total
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DetectorState> {
        // State is plain counters, still consistent after a panicking holder
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Detector for FingerprintDetector {
    fn is_anomalous(&self, window: &Window) -> Result<bool, FingerprintError> {
        let fingerprint = self.fingerprinter.fingerprint(window)?;

        let mut guard = self.lock();
        let state = &mut *guard;
        state.total += 1;

        let hits = match state
            .entries
            .iter_mut()
            .find(|e| e.fingerprint.is_match(fingerprint.as_ref()))
        {
            Some(entry) => {
                entry.hits += 1;
                entry.hits
            }
            None => {
                if state.entries.len() >= self.max_fingerprints {
                    // Evict the least supported fingerprint
                    if let Some(pos) = state
                        .entries
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, e)| e.hits)
                        .map(|(i, _)| i)
                    {
                        state.entries.swap_remove(pos);
                    }
                }
                state.entries.push(Entry {
                    fingerprint,
                    hits: 1,
                });
                1
            }
        };

        let support = hits as f64 / state.total as f64;
        trace!(window = %window.name, support, "Fingerprint support");
        Ok(support < self.min_support)
    }
}
