//! Reconstruction-error scoring, threshold calibration and verdicts.

mod scorer;
mod threshold;

pub use scorer::{per_sample_error, AnomalyScorer, ScoredSample, Verdict};
pub use threshold::{percentile, DecisionThreshold, ThresholdCalibrator};
