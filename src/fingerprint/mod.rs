// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fingerprints: comparable statistical synopses of a window.
//!
//! A [`Fingerprinter`] turns a [`Window`] into a [`Fingerprint`]; two
//! fingerprints of the same concrete kind can be compared with
//! [`Fingerprint::is_match`]. Comparing different kinds is a configuration
//! error: it is logged and reported as "no match", never a panic.
//!
//! Available kinds:
//! - [`jsdiv`]: histogram with a Jensen–Shannon divergence significance test

pub mod histogram;
pub mod jsdiv;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;

use crate::error::FingerprintError;
use crate::window::Window;

pub use jsdiv::{JsDivFingerprint, JsDivFingerprinter};

/// A statistical synopsis that can be matched against another of the same kind.
pub trait Fingerprint: Debug + Send + Sync {
    /// Whether `other` is statistically indistinguishable from `self`.
    fn is_match(&self, other: &dyn Fingerprint) -> bool;

    /// Short name of the concrete kind, used in diagnostics.
    fn kind(&self) -> &'static str;

    /// Downcast support for same-kind comparison.
    fn as_any(&self) -> &dyn Any;
}

/// Builds fingerprints from windows.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, window: &Window) -> Result<Box<dyn Fingerprint>, FingerprintError>;
}

/// Serializable fingerprinter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FingerprinterConfig {
    /// Histogram over `[min, max]` compared with a JS-divergence test.
    JsDiv {
        min: f64,
        max: f64,
        bin_count: usize,
        p_value: f64,
    },
}

impl Default for FingerprinterConfig {
    fn default() -> Self {
        Self::JsDiv {
            min: 0.0,
            max: 1.0,
            bin_count: 20,
            p_value: 0.05,
        }
    }
}

impl FingerprinterConfig {
    /// Reject configurations that could never produce a valid fingerprint.
    pub fn validate(&self) -> Result<(), FingerprintError> {
        self.build().map(|_| ())
    }

    /// Build the configured fingerprinter.
    pub fn build(&self) -> Result<Box<dyn Fingerprinter>, FingerprintError> {
        match *self {
            Self::JsDiv {
                min,
                max,
                bin_count,
                p_value,
            } => Ok(Box::new(JsDivFingerprinter::new(min, max, bin_count, p_value)?)),
        }
    }
}
