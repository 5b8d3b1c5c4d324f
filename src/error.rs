//! Error taxonomy for the detector.
//!
//! Shape and calibration errors are fatal at the call boundary; training
//! non-convergence is never an error (early stopping keeps the best snapshot).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    /// Input width / sequence length does not match the model
    #[error("shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    /// Empty or degenerate calibration set, invalid percentile
    #[error("calibration error: {0}")]
    Calibration(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unusable dataset
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Scaler fitted for a different feature width than the model
    #[error("scaler mismatch: scaler has {scaler} features, model expects {model}")]
    ScalerMismatch { scaler: usize, model: usize },

    /// Threshold was calibrated against different model parameters
    #[error("stale threshold: calibrated for model {calibrated}, current model is {current}")]
    StaleThreshold { calibrated: String, current: String },

    /// A non-finite value reached an output
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DetectorError>;

impl DetectorError {
    pub(crate) fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Shape {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Configuration-class failures (bad config, bad calibration input)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Calibration(_) | Self::ScalerMismatch { .. }
        )
    }
}
