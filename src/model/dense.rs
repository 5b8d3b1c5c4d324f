//! Fully connected layer with Glorot-uniform initialisation, plus inverted dropout.

use super::{Activation, Mode, Parameters};
use ndarray::{Array1, Array2, ArrayViewD, ArrayViewMutD};
use rand::distributions::{Bernoulli, Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Glorot / Xavier uniform matrix of shape (fan_in, fan_out)
pub(crate) fn glorot_uniform<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(&mut *rng))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    /// (input, output)
    pub(crate) weight: Array2<f32>,
    pub(crate) bias: Array1<f32>,
    activation: Activation,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, activation: Activation, rng: &mut R) -> Self {
        Self {
            weight: glorot_uniform(input_dim, output_dim, rng),
            bias: Array1::zeros(output_dim),
            activation,
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array1::zeros(self.bias.raw_dim()),
            activation: self.activation,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// (batch, input) -> activated (batch, output)
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        debug_assert_eq!(x.ncols(), self.input_dim());
        self.activation.forward(x.dot(&self.weight) + &self.bias)
    }

    /// Accumulates parameter gradients into `grads` and returns d loss / d x.
    /// `y` is the output `forward` produced for `x`.
    pub fn backward(&self, x: &Array2<f32>, y: &Array2<f32>, dy: &Array2<f32>, grads: &mut Dense) -> Array2<f32> {
        let dz = match self.activation {
            Activation::Identity => dy.clone(),
            act => dy * &y.mapv(|v| act.derivative(v)),
        };
        grads.weight += &x.t().dot(&dz);
        grads.bias += &dz.sum_axis(ndarray::Axis(0));
        dz.dot(&self.weight.t())
    }

    /// Shape check used when restoring from a checkpoint
    pub(crate) fn has_shape(&self, input_dim: usize, output_dim: usize) -> bool {
        self.weight.dim() == (input_dim, output_dim) && self.bias.len() == output_dim
    }
}

impl Parameters for Dense {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weight.view().into_dyn(), self.bias.view().into_dyn()]
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.weight.view_mut().into_dyn(), self.bias.view_mut().into_dyn()]
    }
}

/// Inverted dropout. Active only in training mode with a non-zero rate;
/// returns the scaled output and the mask needed by the backward pass.
pub(crate) fn dropout(x: Array2<f32>, rate: f32, mode: &mut Mode<'_>) -> (Array2<f32>, Option<Array2<f32>>) {
    let rng = match mode {
        Mode::Training(rng) if rate > 0.0 => rng,
        _ => return (x, None),
    };
    let keep = 1.0 - rate;
    let scale = 1.0 / keep;
    let Ok(bern) = Bernoulli::new(keep as f64) else {
        return (x, None);
    };
    let mask = Array2::from_shape_fn(x.raw_dim(), |_| if bern.sample(&mut **rng) { scale } else { 0.0 });
    (x * &mask, Some(mask))
}

pub(crate) fn dropout_backward(dy: Array2<f32>, mask: Option<&Array2<f32>>) -> Array2<f32> {
    match mask {
        Some(m) => dy * m,
        None => dy,
    }
}
