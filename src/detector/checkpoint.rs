//! JSON checkpoint bundling parameters, scaler and threshold.

use crate::error::{DetectorError, Result};
use crate::features::MinMaxScaler;
use crate::model::AttentionVae;
use crate::scoring::DecisionThreshold;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub model_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub model: AttentionVae,
    pub scaler: MinMaxScaler,
    pub scaler_fingerprint: String,
    pub threshold: DecisionThreshold,
    pub inference_seed: u64,
    pub clip_transformed: bool,
}

impl ModelCheckpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut w, self)?;
        w.flush()?;
        Ok(())
    }

    /// Reads and validates; see [`ModelCheckpoint::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let checkpoint: ModelCheckpoint = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Layer shapes match the stored configuration, the scaler fits the model
    /// width and is the one recorded, and the threshold belongs to these
    /// parameters.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        let width = self.model.config().feature_dim;
        if self.scaler.feature_dim() != width {
            return Err(DetectorError::ScalerMismatch {
                scaler: self.scaler.feature_dim(),
                model: width,
            });
        }
        if self.scaler.fingerprint() != self.scaler_fingerprint {
            return Err(DetectorError::Config(
                "scaler does not match its recorded fingerprint".into(),
            ));
        }
        let current = self.model.fingerprint();
        if self.threshold.model_fingerprint != current {
            return Err(DetectorError::StaleThreshold {
                calibrated: self.threshold.model_fingerprint.clone(),
                current,
            });
        }
        Ok(())
    }
}
