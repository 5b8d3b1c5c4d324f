//! canvae-ids: unsupervised CAN bus intrusion detection with an
//! attention-augmented variational autoencoder.
//!
//! Modular structure:
//! - [`features`]: CAN dataset loading, min-max scaling, windowed batches
//! - [`model`]: Encoder / sampler / decoder with explicit backward passes
//! - [`training`]: Mini-batch Adam training with early stopping
//! - [`scoring`]: Reconstruction-error scores, threshold calibration, verdicts
//! - [`evaluation`]: Confusion matrix and classification report
//! - [`detector`]: End-to-end detector and JSON checkpoints
//! - [`logging`]: Structured JSON logging

pub mod config;
pub mod detector;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod fingerprint;
pub mod logging;
pub mod model;
pub mod scoring;
pub mod training;

pub use config::DetectorConfig;
pub use detector::{CanAnomalyDetector, ModelCheckpoint};
pub use error::{DetectorError, Result};
pub use evaluation::EvaluationReport;
pub use features::{CanDataset, FeatureBatch, FeatureVector, MinMaxScaler};
pub use logging::StructuredLogger;
pub use model::AttentionVae;
pub use scoring::{AnomalyScorer, DecisionThreshold, Verdict};
pub use training::{Trainer, TrainingHistory};
