//! Detector configuration. Defaults reproduce the reference CICIoV2024 setup.

use crate::error::{DetectorError, Result};
use crate::model::Activation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Dataset location and column layout
    pub data: DataConfig,
    /// Network architecture
    pub model: ModelConfig,
    /// Optimizer and early stopping
    pub training: TrainingConfig,
    /// Threshold calibration
    pub calibration: CalibrationConfig,
    /// Where run artefacts are written
    pub output: OutputConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub csv_path: PathBuf,
    /// Feature columns, in model input order
    pub feature_columns: Vec<String>,
    pub label_column: String,
    /// Label value marking benign traffic; anything else is an attack
    pub benign_label: String,
    /// Fraction of benign rows held out for validation and calibration
    pub validation_fraction: f32,
    pub split_seed: u64,
    /// Clip scaled values to [0, 1]. Off by default: attack rows may fall
    /// outside the benign range and that inflates their error.
    pub clip_transformed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Features per message (F)
    pub feature_dim: usize,
    /// Messages per sequence (L)
    pub seq_len: usize,
    /// Latent dimensionality (D)
    pub latent_dim: usize,
    /// Attention score width (U)
    pub attention_units: usize,
    /// Encoder / decoder LSTM width (H)
    pub recurrent_units: usize,
    /// Width of the dense layers around the latent bottleneck
    pub dense_units: usize,
    /// Std-dev of the Gaussian input perturbation during training
    pub noise_std: f32,
    pub dropout_rate: f32,
    /// Cell / candidate activation of both LSTMs
    pub recurrent_activation: Activation,
    /// Activation of the dense layers on either side of the bottleneck
    pub dense_activation: Activation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
    /// Minimum validation-loss decrease that counts as an improvement
    pub min_delta: f32,
    pub learning_rate: f32,
    /// Global gradient-norm cap; `None` disables clipping
    pub gradient_clip_norm: Option<f32>,
    pub shuffle: bool,
    /// Seeds initialisation, shuffling, noise, dropout and sampling
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Benign-error percentile used as the decision threshold (0-100)
    pub percentile: f32,
    /// Seed of the sampler used when scoring
    pub inference_seed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Model checkpoint (JSON); not written when unset
    pub checkpoint_path: Option<PathBuf>,
    /// Run events (epochs, threshold, report) as JSON lines
    pub events_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        let mut feature_columns = vec!["ID".to_string()];
        feature_columns.extend((0..8).map(|i| format!("DATA_{}", i)));
        Self {
            csv_path: PathBuf::from("CICIoV2024.csv"),
            feature_columns,
            label_column: "specific_class".to_string(),
            benign_label: "BENIGN".to_string(),
            validation_fraction: 0.2,
            split_seed: 42,
            clip_transformed: false,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            feature_dim: 9,
            seq_len: 1,
            latent_dim: 3,
            attention_units: 32,
            recurrent_units: 64,
            dense_units: 32,
            noise_std: 0.1,
            dropout_rate: 0.3,
            recurrent_activation: Activation::Relu,
            dense_activation: Activation::Relu,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_epochs: 20,
            patience: 5,
            min_delta: 0.0,
            learning_rate: 1e-3,
            gradient_clip_norm: Some(5.0),
            shuffle: true,
            seed: 42,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            percentile: 90.0,
            inference_seed: 0,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(DetectorError::Config(msg()))
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.feature_dim > 0, || "model.feature_dim must be > 0".into())?;
        ensure(self.seq_len > 0, || "model.seq_len must be > 0".into())?;
        ensure(self.latent_dim > 0, || "model.latent_dim must be > 0".into())?;
        ensure(self.attention_units > 0, || "model.attention_units must be > 0".into())?;
        ensure(self.recurrent_units > 0, || "model.recurrent_units must be > 0".into())?;
        ensure(self.dense_units > 0, || "model.dense_units must be > 0".into())?;
        ensure(self.noise_std.is_finite() && self.noise_std >= 0.0, || {
            format!("model.noise_std must be >= 0, got {}", self.noise_std)
        })?;
        ensure((0.0..1.0).contains(&self.dropout_rate), || {
            format!("model.dropout_rate must be in [0, 1), got {}", self.dropout_rate)
        })
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(self.batch_size > 0, || "training.batch_size must be > 0".into())?;
        ensure(self.max_epochs > 0, || "training.max_epochs must be > 0".into())?;
        ensure(self.learning_rate.is_finite() && self.learning_rate > 0.0, || {
            format!("training.learning_rate must be > 0, got {}", self.learning_rate)
        })?;
        ensure(self.min_delta >= 0.0, || "training.min_delta must be >= 0".into())?;
        if let Some(clip) = self.gradient_clip_norm {
            ensure(clip.is_finite() && clip > 0.0, || {
                format!("training.gradient_clip_norm must be > 0, got {}", clip)
            })?;
        }
        Ok(())
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(DetectorError::Calibration(format!(
                "percentile must be in [0, 100], got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

impl DetectorConfig {
    /// Load from JSON file if present; otherwise return default.
    /// A file that exists but cannot be parsed is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: DetectorConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.training.validate()?;
        self.calibration.validate()?;
        ensure(
            self.data.validation_fraction > 0.0 && self.data.validation_fraction < 1.0,
            || {
                format!(
                    "data.validation_fraction must be in (0, 1), got {}",
                    self.data.validation_fraction
                )
            },
        )?;
        ensure(self.data.feature_columns.len() == self.model.feature_dim, || {
            format!(
                "data.feature_columns has {} entries but model.feature_dim is {}",
                self.data.feature_columns.len(),
                self.model.feature_dim
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = DetectorConfig::default();
        c.validate().unwrap();
        assert_eq!(c.model.latent_dim, 3);
        assert_eq!(c.data.feature_columns.len(), 9);
        assert_eq!(c.data.feature_columns[1], "DATA_0");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: DetectorConfig =
            serde_json::from_str(r#"{"model": {"latent_dim": 5}, "calibration": {"percentile": 95}}"#)
                .unwrap();
        assert_eq!(c.model.latent_dim, 5);
        assert_eq!(c.model.recurrent_units, 64);
        assert_eq!(c.calibration.percentile, 95.0);
        assert_eq!(c.training.patience, 5);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut c = DetectorConfig::default();
        c.model.dropout_rate = 1.0;
        assert!(c.validate().is_err());

        let mut c = DetectorConfig::default();
        c.calibration.percentile = 101.0;
        assert!(matches!(c.validate(), Err(DetectorError::Calibration(_))));

        let mut c = DetectorConfig::default();
        c.data.validation_fraction = 0.0;
        assert!(c.validate().unwrap_err().is_configuration());
    }
}
