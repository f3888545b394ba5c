// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Jensen–Shannon divergence fingerprint.
//!
//! A window is summarized as a normalized histogram over a fixed range. Two
//! fingerprints match when the significance of their JS divergence is below
//! the configured p-value threshold.

use std::any::Any;
use tracing::error;

use super::histogram::{build_histogram, js_significance, validate_range};
use super::{Fingerprint, Fingerprinter};
use crate::error::FingerprintError;
use crate::window::Window;

/// Builds [`JsDivFingerprint`]s with a fixed range and bin count.
#[derive(Debug, Clone, PartialEq)]
pub struct JsDivFingerprinter {
    min: f64,
    max: f64,
    bin_count: usize,
    p_value: f64,
}

impl JsDivFingerprinter {
    pub fn new(min: f64, max: f64, bin_count: usize, p_value: f64) -> Result<Self, FingerprintError> {
        if bin_count == 0 {
            return Err(FingerprintError::InvalidBinCount(bin_count));
        }
        validate_range(min, max)?;
        if !(p_value > 0.0 && p_value <= 1.0) {
            return Err(FingerprintError::InvalidThreshold(p_value));
        }
        Ok(Self {
            min,
            max,
            bin_count,
            p_value,
        })
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Typed variant of [`Fingerprinter::fingerprint`].
    pub fn fingerprint_window(&self, window: &Window) -> Result<JsDivFingerprint, FingerprintError> {
        let (histogram, sample_count) =
            build_histogram(&window.data, self.min, self.max, self.bin_count)?;
        Ok(JsDivFingerprint {
            histogram,
            sample_count,
            p_value_threshold: self.p_value,
        })
    }
}

impl Fingerprinter for JsDivFingerprinter {
    fn fingerprint(&self, window: &Window) -> Result<Box<dyn Fingerprint>, FingerprintError> {
        Ok(Box::new(self.fingerprint_window(window)?))
    }
}

/// Immutable histogram synopsis of a window.
#[derive(Debug, Clone, PartialEq)]
pub struct JsDivFingerprint {
    histogram: Vec<f64>,
    sample_count: usize,
    p_value_threshold: f64,
}

impl JsDivFingerprint {
    /// Build a fingerprint from an already normalized histogram.
    pub fn from_histogram(histogram: Vec<f64>, sample_count: usize, p_value_threshold: f64) -> Self {
        Self {
            histogram,
            sample_count,
            p_value_threshold,
        }
    }

    pub fn histogram(&self) -> &[f64] {
        &self.histogram
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn p_value_threshold(&self) -> f64 {
        self.p_value_threshold
    }

    /// Significance of the divergence between `self` and `other`.
    ///
    /// Both operands' histograms are used; near zero means indistinguishable.
    pub fn significance(&self, other: &JsDivFingerprint) -> Result<f64, FingerprintError> {
        js_significance(&self.histogram, &other.histogram)
    }
}

impl Fingerprint for JsDivFingerprint {
    fn is_match(&self, other: &dyn Fingerprint) -> bool {
        let Some(other) = other.as_any().downcast_ref::<JsDivFingerprint>() else {
            error!(
                kind = other.kind(),
                "Unexpected comparison between js_div fingerprint and another kind"
            );
            return false;
        };

        if self.histogram.len() != other.histogram.len() {
            error!(
                left = self.histogram.len(),
                right = other.histogram.len(),
                "Unexpected comparison between js_div fingerprints of different bin counts"
            );
            return false;
        }

        match self.significance(other) {
            Ok(s) => s < self.p_value_threshold,
            Err(e) => {
                error!("Significance undefined: {}", e);
                false
            }
        }
    }

    fn kind(&self) -> &'static str {
        "js_div"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
