//! Probabilistic encoder: noise -> LSTM -> attention pooling -> dense + dropout
//! -> independent linear heads for mean and log-variance.

use super::attention::{AttentionPooling, AttentionTape};
use super::dense::{dropout, dropout_backward, Dense};
use super::lstm::{Lstm, LstmTape};
use super::{Activation, Mode, Parameters};
use crate::config::ModelConfig;
use ndarray::{Array2, ArrayView3, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Parameters of the diagonal Gaussian posterior, each (batch, D)
#[derive(Debug, Clone, PartialEq)]
pub struct LatentParams {
    pub mean: Array2<f32>,
    /// Unconstrained in sign
    pub log_var: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub latent: LatentParams,
    /// (batch, L), diagnostic only
    pub attention_weights: Array2<f32>,
}

#[derive(Debug, Clone)]
pub(crate) struct EncoderTape {
    lstm: LstmTape,
    attention: AttentionTape,
    pooled: Array2<f32>,
    hidden: Array2<f32>,
    dropout_mask: Option<Array2<f32>>,
    projected: Array2<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    lstm: Lstm,
    attention: AttentionPooling,
    hidden: Dense,
    mean_head: Dense,
    log_var_head: Dense,
    noise_std: f32,
    dropout_rate: f32,
}

impl Encoder {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        Self {
            lstm: Lstm::new(config.feature_dim, config.recurrent_units, config.recurrent_activation, rng),
            attention: AttentionPooling::new(config.recurrent_units, config.attention_units, rng),
            hidden: Dense::new(config.recurrent_units, config.dense_units, config.dense_activation, rng),
            mean_head: Dense::new(config.dense_units, config.latent_dim, Activation::Identity, rng),
            log_var_head: Dense::new(config.dense_units, config.latent_dim, Activation::Identity, rng),
            noise_std: config.noise_std,
            dropout_rate: config.dropout_rate,
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            lstm: self.lstm.zeros_like(),
            attention: self.attention.zeros_like(),
            hidden: self.hidden.zeros_like(),
            mean_head: self.mean_head.zeros_like(),
            log_var_head: self.log_var_head.zeros_like(),
            noise_std: self.noise_std,
            dropout_rate: self.dropout_rate,
        }
    }

    /// `input` is (batch, L, F); shapes are checked by the caller.
    pub(crate) fn forward(&self, input: ArrayView3<'_, f32>, mode: &mut Mode<'_>) -> (EncoderOutput, EncoderTape) {
        let steps: Vec<Array2<f32>> = input
            .axis_iter(Axis(1))
            .map(|x| {
                let mut x = x.to_owned();
                if let Mode::Training(rng) = mode {
                    if self.noise_std > 0.0 {
                        let std = self.noise_std;
                        x.mapv_inplace(|v| v + std * rng.sample::<f32, _>(StandardNormal));
                    }
                }
                x
            })
            .collect();

        let (hidden_seq, lstm_tape) = self.lstm.forward(&steps);
        let (pooled, attention_tape) = self.attention.forward(&hidden_seq);
        let hidden = self.hidden.forward(&pooled.context);
        let (projected, dropout_mask) = dropout(hidden.clone(), self.dropout_rate, mode);
        let mean = self.mean_head.forward(&projected);
        let log_var = self.log_var_head.forward(&projected);

        let output = EncoderOutput {
            latent: LatentParams { mean, log_var },
            attention_weights: pooled.weights,
        };
        let tape = EncoderTape {
            lstm: lstm_tape,
            attention: attention_tape,
            pooled: pooled.context,
            hidden,
            dropout_mask,
            projected,
        };
        (output, tape)
    }

    pub(crate) fn backward(
        &self,
        tape: &EncoderTape,
        latent: &LatentParams,
        d_mean: &Array2<f32>,
        d_log_var: &Array2<f32>,
        grads: &mut Encoder,
    ) {
        let d_projected = self
            .mean_head
            .backward(&tape.projected, &latent.mean, d_mean, &mut grads.mean_head)
            + self
                .log_var_head
                .backward(&tape.projected, &latent.log_var, d_log_var, &mut grads.log_var_head);
        let d_hidden = dropout_backward(d_projected, tape.dropout_mask.as_ref());
        let d_pooled = self.hidden.backward(&tape.pooled, &tape.hidden, &d_hidden, &mut grads.hidden);
        let d_sequence = self.attention.backward(&tape.attention, &d_pooled, &mut grads.attention);
        // gradient w.r.t. the (noisy) input is not needed
        self.lstm.backward(&tape.lstm, &d_sequence, &mut grads.lstm);
    }

    pub(crate) fn matches(&self, config: &ModelConfig) -> bool {
        self.lstm.has_shape(config.feature_dim, config.recurrent_units)
            && self.attention.has_shape(config.recurrent_units, config.attention_units)
            && self.hidden.has_shape(config.recurrent_units, config.dense_units)
            && self.mean_head.has_shape(config.dense_units, config.latent_dim)
            && self.log_var_head.has_shape(config.dense_units, config.latent_dim)
    }
}

impl Parameters for Encoder {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = self.lstm.tensors();
        out.extend(self.attention.tensors());
        out.extend(self.hidden.tensors());
        out.extend(self.mean_head.tensors());
        out.extend(self.log_var_head.tensors());
        out
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = self.lstm.tensors_mut();
        out.extend(self.attention.tensors_mut());
        out.extend(self.hidden.tensors_mut());
        out.extend(self.mean_head.tensors_mut());
        out.extend(self.log_var_head.tensors_mut());
        out
    }
}
