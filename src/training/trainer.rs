//! Epoch loop: shuffle, mini-batch Adam updates, validation, early stopping.

use super::{EarlyStopAction, EarlyStopping, EpochRecord, TrainingHistory};
use crate::config::TrainingConfig;
use crate::error::{DetectorError, Result};
use crate::features::FeatureBatch;
use crate::model::{Adam, AttentionVae, LossBreakdown, Mode, Parameters, Sampler};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// Sample-weighted running mean of loss terms
#[derive(Default)]
struct LossAccumulator {
    reconstruction: f64,
    divergence: f64,
    samples: usize,
}

impl LossAccumulator {
    fn add(&mut self, loss: &LossBreakdown, samples: usize) {
        self.reconstruction += loss.reconstruction as f64 * samples as f64;
        self.divergence += loss.divergence as f64 * samples as f64;
        self.samples += samples;
    }

    fn mean(&self) -> LossBreakdown {
        if self.samples == 0 {
            return LossBreakdown::new(f32::NAN, f32::NAN);
        }
        let n = self.samples as f64;
        LossBreakdown::new((self.reconstruction / n) as f32, (self.divergence / n) as f32)
    }
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn fit(&self, model: &mut AttentionVae, train: &FeatureBatch, validation: &FeatureBatch) -> Result<TrainingHistory> {
        self.fit_with(model, train, validation, |_| {})
    }

    /// Trains `model` in place and leaves it holding the parameters of the best
    /// validation epoch. `on_epoch` sees every record as it completes.
    pub fn fit_with<F>(
        &self,
        model: &mut AttentionVae,
        train: &FeatureBatch,
        validation: &FeatureBatch,
        mut on_epoch: F,
    ) -> Result<TrainingHistory>
    where
        F: FnMut(&EpochRecord),
    {
        if train.is_empty() || validation.is_empty() {
            return Err(DetectorError::Dataset(format!(
                "training needs non-empty train and validation sets, got {} and {}",
                train.len(),
                validation.len()
            )));
        }
        model.check_input(train.view())?;
        model.check_input(validation.view())?;

        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut sampler = Sampler::seeded(cfg.seed.wrapping_add(1));
        let mut optimizer = Adam::new(cfg.learning_rate, cfg.gradient_clip_norm);
        let mut early_stopping = EarlyStopping::new(cfg.patience, cfg.min_delta);
        let mut best_model: Option<AttentionVae> = None;
        let mut history = TrainingHistory::default();
        let mut order: Vec<usize> = (0..train.len()).collect();

        info!(
            train = train.len(),
            validation = validation.len(),
            parameters = model.parameter_count(),
            batch_size = cfg.batch_size,
            max_epochs = cfg.max_epochs,
            "training started"
        );

        for epoch in 1..=cfg.max_epochs {
            if cfg.shuffle {
                order.shuffle(&mut rng);
            }
            let mut running = LossAccumulator::default();
            let mut skipped = 0usize;

            for chunk in order.chunks(cfg.batch_size) {
                let batch = train.select(chunk);
                let (loss, grads) =
                    model.loss_and_gradients(batch.view(), &mut Mode::Training(&mut rng), &mut sampler)?;
                if !loss.is_finite() || !grads.all_finite() {
                    skipped += 1;
                    warn!(epoch, batch_len = chunk.len(), loss = loss.total, "skipping non-finite batch");
                    continue;
                }
                optimizer.step(model, &grads);
                running.add(&loss, chunk.len());
            }

            let val = self.validation_loss(model, validation)?;
            let action = early_stopping.observe(val.total);
            let improved = action == EarlyStopAction::Improved;
            if improved {
                best_model = Some(model.clone());
                history.best_epoch = epoch;
                history.best_validation_loss = Some(val.total);
            }

            let record = EpochRecord {
                epoch,
                train: running.mean(),
                validation: val,
                skipped_batches: skipped,
                improved,
            };
            info!(
                epoch,
                loss = record.train.total,
                reconstruction = record.train.reconstruction,
                divergence = record.train.divergence,
                val_loss = record.validation.total,
                skipped,
                "epoch finished"
            );
            on_epoch(&record);
            history.epochs.push(record);

            if action == EarlyStopAction::Stop {
                history.stopped_early = epoch < cfg.max_epochs;
                if history.stopped_early {
                    info!(epoch, best_epoch = history.best_epoch, "early stopping");
                }
                break;
            }
        }

        match best_model {
            Some(best) => {
                debug!(best_epoch = history.best_epoch, "restoring best parameters");
                *model = best;
            }
            None => warn!("validation loss never finite; keeping final parameters"),
        }
        Ok(history)
    }

    /// Inference-mode loss with a sampler reseeded from the training seed, so
    /// the value depends only on the parameters.
    pub fn validation_loss(&self, model: &AttentionVae, validation: &FeatureBatch) -> Result<LossBreakdown> {
        let mut sampler = Sampler::seeded(self.config.seed);
        let mut acc = LossAccumulator::default();
        let indices: Vec<usize> = (0..validation.len()).collect();
        for chunk in indices.chunks(self.config.batch_size) {
            let batch = validation.select(chunk);
            let loss = model.loss(batch.view(), &mut Mode::Inference, &mut sampler)?;
            acc.add(&loss, chunk.len());
        }
        Ok(acc.mean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use ndarray::Array3;
    use rand::Rng;

    fn data(n: usize, seed: u64) -> FeatureBatch {
        let mut rng = StdRng::seed_from_u64(seed);
        FeatureBatch::new(Array3::from_shape_fn((n, 1, 4), |_| rng.gen_range(0.2f32..0.8)))
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            feature_dim: 4,
            latent_dim: 2,
            attention_units: 4,
            recurrent_units: 8,
            dense_units: 8,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn loss_decreases_and_best_epoch_is_restored() {
        let config = TrainingConfig {
            batch_size: 16,
            max_epochs: 8,
            learning_rate: 5e-3,
            ..TrainingConfig::default()
        };
        let trainer = Trainer::new(config).unwrap();
        let mut model = AttentionVae::new(&model_config(), 3).unwrap();
        let (train, val) = (data(128, 1), data(32, 2));
        let before = trainer.validation_loss(&model, &val).unwrap().total;

        let mut seen = 0;
        let history = trainer.fit_with(&mut model, &train, &val, |_| seen += 1).unwrap();
        assert_eq!(seen, history.epochs.len());
        assert!(history.best_epoch >= 1);

        let after = trainer.validation_loss(&model, &val).unwrap().total;
        assert!(after < before, "{} !< {}", after, before);
        let best = history.best_validation_loss.unwrap();
        assert!((after - best).abs() < 1e-5, "restored {} vs best {}", after, best);
    }

    #[test]
    fn same_seed_same_history() {
        let config = TrainingConfig {
            batch_size: 16,
            max_epochs: 2,
            ..TrainingConfig::default()
        };
        let run = || {
            let mut model = AttentionVae::new(&model_config(), 3).unwrap();
            Trainer::new(config.clone())
                .unwrap()
                .fit(&mut model, &data(64, 1), &data(16, 2))
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.train_losses(), b.train_losses());
        assert_eq!(a.validation_losses(), b.validation_losses());
        assert_eq!(a.train_losses().len(), a.epochs.len());
    }

    #[test]
    fn rejects_empty_or_mismatched_data() {
        let trainer = Trainer::new(TrainingConfig::default()).unwrap();
        let mut model = AttentionVae::new(&model_config(), 3).unwrap();
        let empty = FeatureBatch::new(Array3::zeros((0, 1, 4)));
        assert!(trainer.fit(&mut model, &empty, &data(4, 2)).is_err());
        let wide = FeatureBatch::new(Array3::zeros((4, 1, 5)));
        assert!(matches!(
            trainer.fit(&mut model, &wide, &data(4, 2)),
            Err(DetectorError::Shape { .. })
        ));
    }
}
