//! Additive attention pooling: collapses L hidden states into one context vector.
//!
//! `score_t = tanh(h_t W + b)`, `logit_t = score_t . u`, `alpha = softmax_t(logit)`,
//! `context = sum_t alpha_t h_t`. With L = 1 the softmax yields weight 1.0 and the
//! context equals the single hidden state.

use super::dense::glorot_uniform;
use super::Parameters;
use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionPooling {
    /// (H, U)
    pub(crate) weight: Array2<f32>,
    /// (U)
    pub(crate) bias: Array1<f32>,
    /// (U)
    pub(crate) context: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// (batch, H)
    pub context: Array2<f32>,
    /// (batch, L); each row sums to 1
    pub weights: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct AttentionTape {
    hidden: Vec<Array2<f32>>,
    scores: Vec<Array2<f32>>,
    weights: Array2<f32>,
}

/// Row-wise softmax, shifted by the row maximum
pub(crate) fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

impl AttentionPooling {
    pub fn new<R: Rng + ?Sized>(hidden_dim: usize, units: usize, rng: &mut R) -> Self {
        let u = glorot_uniform(units, 1, rng);
        Self {
            weight: glorot_uniform(hidden_dim, units, rng),
            bias: Array1::zeros(units),
            context: u.column(0).to_owned(),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
            context: Array1::zeros(self.context.raw_dim()),
        }
    }

    pub fn units(&self) -> usize {
        self.bias.len()
    }

    pub fn forward(&self, hidden: &[Array2<f32>]) -> (AttentionOutput, AttentionTape) {
        debug_assert!(!hidden.is_empty(), "attention pooling over an empty sequence");
        let batch = hidden[0].nrows();
        let width = hidden[0].ncols();
        debug_assert_eq!(width, self.weight.nrows(), "attention width mismatch");

        let mut logits = Array2::<f32>::zeros((batch, hidden.len()));
        let mut scores = Vec::with_capacity(hidden.len());
        for (t, h) in hidden.iter().enumerate() {
            let score = (h.dot(&self.weight) + &self.bias).mapv_into(f32::tanh);
            logits.column_mut(t).assign(&score.dot(&self.context));
            scores.push(score);
        }
        let weights = softmax_rows(&logits);

        let mut context = Array2::<f32>::zeros((batch, width));
        for (t, h) in hidden.iter().enumerate() {
            context += &(h * &weights.column(t).insert_axis(Axis(1)));
        }

        let tape = AttentionTape {
            hidden: hidden.to_vec(),
            scores,
            weights: weights.clone(),
        };
        (AttentionOutput { context, weights }, tape)
    }

    /// Accumulates into `grads`; returns d loss / d h_t for every timestep.
    pub fn backward(&self, tape: &AttentionTape, d_context: &Array2<f32>, grads: &mut AttentionPooling) -> Vec<Array2<f32>> {
        let steps = tape.hidden.len();
        let weights = &tape.weights;

        let mut d_hidden = Vec::with_capacity(steps);
        let mut d_weights = Array2::<f32>::zeros(weights.raw_dim());
        for (t, h) in tape.hidden.iter().enumerate() {
            d_hidden.push(d_context * &weights.column(t).insert_axis(Axis(1)));
            d_weights.column_mut(t).assign(&(d_context * h).sum_axis(Axis(1)));
        }

        // softmax backward: dl_t = a_t (da_t - sum_k a_k da_k)
        let weighted = (&d_weights * weights).sum_axis(Axis(1)).insert_axis(Axis(1));
        let d_logits = weights * &(d_weights - &weighted);

        for t in 0..steps {
            let score = &tape.scores[t];
            let d_logit = d_logits.column(t);
            grads.context += &score.t().dot(&d_logit);
            let d_score = d_logit
                .insert_axis(Axis(1))
                .dot(&self.context.view().insert_axis(Axis(0)));
            let d_pre = d_score * &score.mapv(|s| 1.0 - s * s);
            grads.weight += &tape.hidden[t].t().dot(&d_pre);
            grads.bias += &d_pre.sum_axis(Axis(0));
            d_hidden[t] += &d_pre.dot(&self.weight.t());
        }
        d_hidden
    }

    pub(crate) fn has_shape(&self, hidden_dim: usize, units: usize) -> bool {
        self.weight.dim() == (hidden_dim, units) && self.bias.len() == units && self.context.len() == units
    }
}

impl Parameters for AttentionPooling {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![
            self.weight.view().into_dyn(),
            self.bias.view().into_dyn(),
            self.context.view().into_dyn(),
        ]
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.weight.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
            self.context.view_mut().into_dyn(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn single_step_degenerates_to_identity() {
        let mut rng = StdRng::seed_from_u64(11);
        let att = AttentionPooling::new(4, 3, &mut rng);
        let h = array![[0.1, 0.2, 0.3, 0.4], [1.0, -1.0, 0.5, 0.0]];
        let (out, _) = att.forward(&[h.clone()]);
        assert!(out.weights.iter().all(|&w| (w - 1.0).abs() < 1e-6));
        assert!((&out.context - &h).iter().all(|d| d.abs() < 1e-6));
    }

    #[test]
    fn weights_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(12);
        let att = AttentionPooling::new(3, 5, &mut rng);
        let hidden: Vec<_> = (0..4)
            .map(|t| Array2::from_shape_fn((2, 3), |(b, f)| (t * 3 + b + f) as f32 * 0.1))
            .collect();
        let (out, _) = att.forward(&hidden);
        for row in out.weights.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn backward_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(13);
        let att = AttentionPooling::new(3, 4, &mut rng);
        let hidden: Vec<_> = (0..3)
            .map(|t| Array2::from_shape_fn((2, 3), |(b, f)| ((t + 2 * b + f) % 4) as f32 * 0.3 - 0.4))
            .collect();
        let probe = array![[1.0, -0.5, 0.25], [0.3, 0.7, -1.0]];
        let loss = |a: &AttentionPooling| -> f32 { (&a.forward(&hidden).0.context * &probe).sum() };

        let (_, tape) = att.forward(&hidden);
        let mut grads = att.zeros_like();
        att.backward(&tape, &probe, &mut grads);

        let eps = 1e-2;
        for i in 0..4 {
            let mut plus = att.clone();
            plus.context[i] += eps;
            let mut minus = att.clone();
            minus.context[i] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!(
                (numeric - grads.context[i]).abs() < 1e-3 + 0.05 * numeric.abs(),
                "u[{}]: numeric {} analytic {}",
                i,
                numeric,
                grads.context[i]
            );
        }
    }
}
