//! End-to-end detector: scaler, model and threshold used together on raw
//! CAN feature rows.

mod checkpoint;

pub use checkpoint::ModelCheckpoint;

use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::evaluation::EvaluationReport;
use crate::features::{train_validation_split, CanDataset, FeatureBatch, MinMaxScaler};
use crate::model::AttentionVae;
use crate::scoring::{AnomalyScorer, DecisionThreshold, ScoredSample, ThresholdCalibrator, Verdict};
use crate::training::{EpochRecord, Trainer, TrainingHistory};
use chrono::Utc;
use ndarray::Array2;
use tracing::{debug, info};
use uuid::Uuid;

pub struct CanAnomalyDetector {
    model: AttentionVae,
    scaler: MinMaxScaler,
    threshold: DecisionThreshold,
    scorer: AnomalyScorer,
    inference_seed: u64,
    clip_transformed: bool,
}

impl CanAnomalyDetector {
    /// Fits scaler and model on benign rows and calibrates the threshold on
    /// the held-out validation windows.
    pub fn train(config: &DetectorConfig, benign_raw: &Array2<f32>) -> Result<(Self, TrainingHistory)> {
        Self::train_with(config, benign_raw, |_| {})
    }

    pub fn train_with<F>(config: &DetectorConfig, benign_raw: &Array2<f32>, on_epoch: F) -> Result<(Self, TrainingHistory)>
    where
        F: FnMut(&EpochRecord),
    {
        config.validate()?;
        if benign_raw.ncols() != config.model.feature_dim {
            return Err(DetectorError::shape(
                format!("{} features", config.model.feature_dim),
                format!("{} features", benign_raw.ncols()),
            ));
        }
        let scaler = MinMaxScaler::fit(benign_raw)?;
        let scaled = Self::scale(&scaler, benign_raw, config.data.clip_transformed)?;
        let windows = FeatureBatch::from_rows(&scaled, config.model.seq_len)?;
        let (train_idx, val_idx) =
            train_validation_split(windows.len(), config.data.validation_fraction, config.data.split_seed)?;
        let (train, validation) = (windows.select(&train_idx), windows.select(&val_idx));

        let mut model = AttentionVae::new(&config.model, config.training.seed)?;
        let history = Trainer::new(config.training.clone())?.fit_with(&mut model, &train, &validation, on_epoch)?;

        let scorer = AnomalyScorer::new(config.calibration.inference_seed);
        let calibrator = ThresholdCalibrator::new(config.calibration.percentile)?;
        let threshold = scorer.calibrate(&model, &validation, &calibrator)?;
        info!(
            best_epoch = history.best_epoch,
            threshold = threshold.value,
            fingerprint = %threshold.model_fingerprint,
            "detector trained"
        );

        let detector = Self {
            model,
            scaler,
            threshold,
            scorer,
            inference_seed: config.calibration.inference_seed,
            clip_transformed: config.data.clip_transformed,
        };
        Ok((detector, history))
    }

    fn scale(scaler: &MinMaxScaler, rows: &Array2<f32>, clip: bool) -> Result<Array2<f32>> {
        if clip {
            scaler.transform_clipped(rows)
        } else {
            scaler.transform(rows)
        }
    }

    pub fn model(&self) -> &AttentionVae {
        &self.model
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    pub fn threshold(&self) -> &DecisionThreshold {
        &self.threshold
    }

    /// Scales raw rows and groups them into model windows.
    pub fn prepare(&self, raw: &Array2<f32>) -> Result<FeatureBatch> {
        if raw.ncols() != self.scaler.feature_dim() {
            return Err(DetectorError::shape(
                format!("{} features", self.scaler.feature_dim()),
                format!("{} features", raw.ncols()),
            ));
        }
        let scaled = Self::scale(&self.scaler, raw, self.clip_transformed)?;
        FeatureBatch::from_rows(&scaled, self.model.config().seq_len)
    }

    /// One score per window of already-scaled input
    pub fn score(&self, batch: &FeatureBatch) -> Result<Vec<f32>> {
        self.scorer.score(&self.model, batch)
    }

    pub fn score_raw(&self, raw: &Array2<f32>) -> Result<Vec<f32>> {
        self.score(&self.prepare(raw)?)
    }

    pub fn classify(&self, batch: &FeatureBatch) -> Result<Vec<ScoredSample>> {
        self.scorer.classify(&self.model, batch, &self.threshold)
    }

    pub fn classify_raw(&self, raw: &Array2<f32>) -> Result<Vec<ScoredSample>> {
        self.classify(&self.prepare(raw)?)
    }

    /// Replaces the threshold with one calibrated on `benign_raw`.
    pub fn recalibrate(&mut self, benign_raw: &Array2<f32>, percentile: f32) -> Result<&DecisionThreshold> {
        let batch = self.prepare(benign_raw)?;
        let calibrator = ThresholdCalibrator::new(percentile)?;
        self.threshold = self.scorer.calibrate(&self.model, &batch, &calibrator)?;
        Ok(&self.threshold)
    }

    /// Classifies every window of `dataset` and compares with its labels.
    pub fn evaluate(&self, dataset: &CanDataset) -> Result<EvaluationReport> {
        for (family, rows) in dataset.attack_breakdown() {
            debug!(family = %family, rows, "attack family");
        }
        let batch = self.prepare(dataset.rows())?;
        let truth = dataset.window_labels(self.model.config().seq_len);
        let verdicts: Vec<Verdict> = self.classify(&batch)?.into_iter().map(|s| s.verdict).collect();
        let report = EvaluationReport::from_predictions(&truth, &verdicts)?;
        info!(
            windows = truth.len(),
            precision = report.precision(),
            recall = report.recall(),
            f1 = report.f1(),
            accuracy = report.accuracy,
            "evaluation finished"
        );
        Ok(report)
    }

    pub fn to_checkpoint(&self) -> ModelCheckpoint {
        ModelCheckpoint {
            model_id: Uuid::new_v4(),
            created_at: Utc::now(),
            model: self.model.clone(),
            scaler: self.scaler.clone(),
            scaler_fingerprint: self.scaler.fingerprint(),
            threshold: self.threshold.clone(),
            inference_seed: self.inference_seed,
            clip_transformed: self.clip_transformed,
        }
    }

    pub fn from_checkpoint(checkpoint: ModelCheckpoint) -> Result<Self> {
        checkpoint.validate()?;
        Ok(Self {
            model: checkpoint.model,
            scaler: checkpoint.scaler,
            threshold: checkpoint.threshold,
            scorer: AnomalyScorer::new(checkpoint.inference_seed),
            inference_seed: checkpoint.inference_seed,
            clip_transformed: checkpoint.clip_transformed,
        })
    }
}
