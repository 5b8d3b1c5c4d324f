//! Mini-batch training on benign traffic with validation-based early stopping.

mod trainer;

pub use trainer::Trainer;

use crate::model::LossBreakdown;
use serde::{Deserialize, Serialize};

/// Losses of one completed epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based
    pub epoch: usize,
    /// Sample-weighted mean over the applied batches
    pub train: LossBreakdown,
    pub validation: LossBreakdown,
    /// Batches dropped because their loss or gradients were non-finite
    pub skipped_batches: usize,
    pub improved: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    /// Epoch whose parameters the model holds after training; 0 if none improved
    pub best_epoch: usize,
    pub best_validation_loss: Option<f32>,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn train_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.train.total).collect()
    }

    pub fn validation_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.validation.total).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStopAction {
    Improved,
    Continue,
    Stop,
}

/// Patience counter over a monitored loss.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    best: Option<f32>,
    stale: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta,
            best: None,
            stale: 0,
        }
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// Non-finite losses never count as an improvement.
    pub fn observe(&mut self, loss: f32) -> EarlyStopAction {
        let improved = loss.is_finite()
            && match self.best {
                None => true,
                Some(best) => loss < best - self.min_delta,
            };
        if improved {
            self.best = Some(loss);
            self.stale = 0;
            return EarlyStopAction::Improved;
        }
        self.stale += 1;
        if self.stale >= self.patience {
            EarlyStopAction::Stop
        } else {
            EarlyStopAction::Continue
        }
    }
}
