//! Decision threshold from a percentile of benign reconstruction errors.

use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};

/// Linear interpolation between order statistics, `q` in [0, 100].
pub fn percentile(scores: &[f32], q: f32) -> Result<f32> {
    if !(0.0..=100.0).contains(&q) {
        return Err(DetectorError::Calibration(format!(
            "percentile must be in [0, 100], got {}",
            q
        )));
    }
    if scores.is_empty() {
        return Err(DetectorError::Calibration("no calibration scores".into()));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(DetectorError::Calibration("non-finite calibration score".into()));
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f32::total_cmp);
    let rank = q as f64 / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Threshold bound to the parameters it was calibrated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionThreshold {
    pub value: f32,
    pub percentile: f32,
    pub calibration_size: usize,
    pub model_fingerprint: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdCalibrator {
    percentile: f32,
}

impl ThresholdCalibrator {
    pub fn new(percentile: f32) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(DetectorError::Calibration(format!(
                "percentile must be in [0, 100], got {}",
                percentile
            )));
        }
        Ok(Self { percentile })
    }

    pub fn percentile(&self) -> f32 {
        self.percentile
    }

    /// Fails on empty, non-finite or constant benign scores.
    pub fn calibrate(&self, benign_scores: &[f32], model_fingerprint: &str) -> Result<DecisionThreshold> {
        let value = percentile(benign_scores, self.percentile)?;
        let (min, max) = benign_scores
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        if max - min <= 0.0 {
            return Err(DetectorError::Calibration(format!(
                "all {} calibration scores equal {}; the model is not discriminative",
                benign_scores.len(),
                min
            )));
        }
        Ok(DecisionThreshold {
            value,
            percentile: self.percentile,
            calibration_size: benign_scores.len(),
            model_fingerprint: model_fingerprint.to_string(),
        })
    }
}
