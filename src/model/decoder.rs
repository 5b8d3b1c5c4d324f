//! Sequence decoder: dense expansion + dropout -> repeated over L timesteps
//! -> LSTM -> per-timestep sigmoid projection back to F features.

use super::dense::{dropout, dropout_backward, Dense};
use super::lstm::{Lstm, LstmTape};
use super::{Activation, Mode, Parameters};
use crate::config::ModelConfig;
use ndarray::{Array2, Array3, ArrayView3, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub(crate) struct DecoderTape {
    latent: Array2<f32>,
    expanded: Array2<f32>,
    dropout_mask: Option<Array2<f32>>,
    lstm: LstmTape,
    hidden: Vec<Array2<f32>>,
    outputs: Vec<Array2<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decoder {
    expand: Dense,
    lstm: Lstm,
    output: Dense,
    seq_len: usize,
    dropout_rate: f32,
}

impl Decoder {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        Self {
            expand: Dense::new(config.latent_dim, config.dense_units, config.dense_activation, rng),
            lstm: Lstm::new(config.dense_units, config.recurrent_units, config.recurrent_activation, rng),
            output: Dense::new(config.recurrent_units, config.feature_dim, Activation::Sigmoid, rng),
            seq_len: config.seq_len,
            dropout_rate: config.dropout_rate,
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            expand: self.expand.zeros_like(),
            lstm: self.lstm.zeros_like(),
            output: self.output.zeros_like(),
            seq_len: self.seq_len,
            dropout_rate: self.dropout_rate,
        }
    }

    /// (batch, D) -> (batch, L, F), values in (0, 1)
    pub(crate) fn forward(&self, z: &Array2<f32>, mode: &mut Mode<'_>) -> (Array3<f32>, DecoderTape) {
        let expanded = self.expand.forward(z);
        let (seed, dropout_mask) = dropout(expanded.clone(), self.dropout_rate, mode);
        let repeated = vec![seed; self.seq_len];
        let (hidden, lstm_tape) = self.lstm.forward(&repeated);

        let batch = z.nrows();
        let mut reconstruction = Array3::<f32>::zeros((batch, self.seq_len, self.output.output_dim()));
        let mut outputs = Vec::with_capacity(self.seq_len);
        for (t, h) in hidden.iter().enumerate() {
            let out = self.output.forward(h);
            reconstruction.index_axis_mut(Axis(1), t).assign(&out);
            outputs.push(out);
        }

        let tape = DecoderTape {
            latent: z.clone(),
            expanded,
            dropout_mask,
            lstm: lstm_tape,
            hidden,
            outputs,
        };
        (reconstruction, tape)
    }

    /// Accumulates into `grads`; returns d loss / d z.
    pub(crate) fn backward(&self, tape: &DecoderTape, d_reconstruction: ArrayView3<'_, f32>, grads: &mut Decoder) -> Array2<f32> {
        let d_hidden: Vec<Array2<f32>> = d_reconstruction
            .axis_iter(Axis(1))
            .enumerate()
            .map(|(t, d_out)| {
                self.output
                    .backward(&tape.hidden[t], &tape.outputs[t], &d_out.to_owned(), &mut grads.output)
            })
            .collect();

        let d_repeated = self.lstm.backward(&tape.lstm, &d_hidden, &mut grads.lstm);
        // every timestep was fed the same seed vector
        let mut d_seed = Array2::<f32>::zeros(tape.expanded.raw_dim());
        for d in &d_repeated {
            d_seed += d;
        }
        let d_expanded = dropout_backward(d_seed, tape.dropout_mask.as_ref());
        self.expand
            .backward(&tape.latent, &tape.expanded, &d_expanded, &mut grads.expand)
    }

    pub(crate) fn matches(&self, config: &ModelConfig) -> bool {
        self.seq_len == config.seq_len
            && self.expand.has_shape(config.latent_dim, config.dense_units)
            && self.lstm.has_shape(config.dense_units, config.recurrent_units)
            && self.output.has_shape(config.recurrent_units, config.feature_dim)
    }
}

impl Parameters for Decoder {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = self.expand.tensors();
        out.extend(self.lstm.tensors());
        out.extend(self.output.tensors());
        out
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = self.expand.tensors_mut();
        out.extend(self.lstm.tensors_mut());
        out.extend(self.output.tensors_mut());
        out
    }
}
