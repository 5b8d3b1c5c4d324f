//! Per-sample reconstruction error and NORMAL / ANOMALY verdicts.

use super::threshold::{DecisionThreshold, ThresholdCalibrator};
use crate::error::{DetectorError, Result};
use crate::features::FeatureBatch;
use crate::model::{AttentionVae, Sampler};
use ndarray::{ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Normal,
    Anomaly,
}

impl Verdict {
    /// Strictly above the threshold is anomalous.
    pub fn from_score(score: f32, threshold: f32) -> Self {
        if score > threshold {
            Verdict::Anomaly
        } else {
            Verdict::Normal
        }
    }

    /// 0 = normal, 1 = anomaly, matching ground-truth labels
    pub fn label(self) -> u8 {
        match self {
            Verdict::Normal => 0,
            Verdict::Anomaly => 1,
        }
    }
}

/// Score and verdict for a single sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredSample {
    pub score: f32,
    pub verdict: Verdict,
}

/// Mean squared error per sample over its L x F elements
pub fn per_sample_error(input: ArrayView3<'_, f32>, reconstruction: ArrayView3<'_, f32>) -> Vec<f32> {
    let (_, len, width) = input.dim();
    let n = (len * width).max(1) as f32;
    let diff = &input - &reconstruction;
    diff.mapv(|d| d * d)
        .sum_axis(Axis(2))
        .sum_axis(Axis(1))
        .iter()
        .map(|s| s / n)
        .collect()
}

/// Scores in inference mode. Every call starts a fresh sampler from the same
/// seed, so repeated calls on the same batch return identical scores and a
/// shared model can be scored from several threads.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    inference_seed: u64,
    batch_size: usize,
}

impl AnomalyScorer {
    pub fn new(inference_seed: u64) -> Self {
        Self {
            inference_seed,
            batch_size: 256,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn score(&self, model: &AttentionVae, batch: &FeatureBatch) -> Result<Vec<f32>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut sampler = Sampler::seeded(self.inference_seed);
        let mut scores = Vec::with_capacity(batch.len());
        let indices: Vec<usize> = (0..batch.len()).collect();
        for chunk in indices.chunks(self.batch_size) {
            let part = batch.select(chunk);
            let reconstruction = model.reconstruct(part.view(), &mut sampler)?;
            scores.extend(per_sample_error(part.view(), reconstruction.view()));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(DetectorError::NonFinite("anomaly score"));
        }
        Ok(scores)
    }

    /// Threshold from the benign validation scores of `model`.
    pub fn calibrate(
        &self,
        model: &AttentionVae,
        benign: &FeatureBatch,
        calibrator: &ThresholdCalibrator,
    ) -> Result<DecisionThreshold> {
        let scores = self.score(model, benign).map_err(|e| match e {
            DetectorError::NonFinite(what) => DetectorError::Calibration(format!("non-finite {}", what)),
            other => other,
        })?;
        let threshold = calibrator.calibrate(&scores, &model.fingerprint())?;
        info!(
            threshold = threshold.value,
            percentile = threshold.percentile,
            samples = threshold.calibration_size,
            "threshold calibrated"
        );
        Ok(threshold)
    }

    /// Rejects a threshold calibrated for different parameters.
    pub fn classify(
        &self,
        model: &AttentionVae,
        batch: &FeatureBatch,
        threshold: &DecisionThreshold,
    ) -> Result<Vec<ScoredSample>> {
        let current = model.fingerprint();
        if threshold.model_fingerprint != current {
            return Err(DetectorError::StaleThreshold {
                calibrated: threshold.model_fingerprint.clone(),
                current,
            });
        }
        Ok(self
            .score(model, batch)?
            .into_iter()
            .map(|score| ScoredSample {
                score,
                verdict: Verdict::from_score(score, threshold.value),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use ndarray::{array, Array3};

    fn model(seed: u64) -> AttentionVae {
        let config = ModelConfig {
            feature_dim: 3,
            recurrent_units: 6,
            dense_units: 6,
            attention_units: 4,
            ..ModelConfig::default()
        };
        AttentionVae::new(&config, seed).unwrap()
    }

    fn batch() -> FeatureBatch {
        FeatureBatch::new(Array3::from_shape_fn((20, 1, 3), |(b, _, f)| ((b + f) % 7) as f32 / 7.0))
    }

    #[test]
    fn per_sample_error_averages_elements() {
        let x = array![[[1.0, 0.0]], [[0.5, 0.5]]];
        let r = array![[[0.0, 0.0]], [[0.5, 0.5]]];
        assert_eq!(per_sample_error(x.view(), r.view()), vec![0.5, 0.0]);
    }

    #[test]
    fn verdict_is_strictly_above_threshold() {
        assert_eq!(Verdict::from_score(0.2, 0.2), Verdict::Normal);
        assert_eq!(Verdict::from_score(0.2001, 0.2), Verdict::Anomaly);
        assert_eq!(Verdict::Anomaly.label(), 1);
    }

    #[test]
    fn scoring_is_idempotent() {
        let m = model(1);
        let scorer = AnomalyScorer::new(0).with_batch_size(7);
        let a = scorer.score(&m, &batch()).unwrap();
        let b = scorer.score(&m, &batch()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
        assert!(a.iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn stale_threshold_is_rejected() {
        let scorer = AnomalyScorer::new(0);
        let cal = ThresholdCalibrator::new(90.0).unwrap();
        let threshold = scorer.calibrate(&model(1), &batch(), &cal).unwrap();
        assert!(scorer.classify(&model(1), &batch(), &threshold).is_ok());
        assert!(matches!(
            scorer.classify(&model(2), &batch(), &threshold),
            Err(DetectorError::StaleThreshold { .. })
        ));
    }
}
