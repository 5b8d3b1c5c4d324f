//! Elementwise activations. Derivatives are expressed in terms of the
//! activation's output so backward passes only need the cached forward values.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Bound applied to log-variance before exponentiation.
pub const LOG_VAR_BOUND: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Identity,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => sigmoid(x),
        }
    }

    /// d activation / d input, given the activation output `y`
    #[inline]
    pub fn derivative(self, y: f32) -> f32 {
        match self {
            Activation::Identity => 1.0,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Sigmoid => y * (1.0 - y),
        }
    }

    pub fn forward(self, x: Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Identity => x,
            _ => x.mapv_into(|v| self.apply(v)),
        }
    }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `exp(scale * log_var)` with `log_var` clamped to [-LOG_VAR_BOUND, LOG_VAR_BOUND]
#[inline]
pub fn bounded_exp(log_var: f32, scale: f32) -> f32 {
    (scale * log_var.clamp(-LOG_VAR_BOUND, LOG_VAR_BOUND)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert_eq!(sigmoid(1000.0), 1.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn derivatives_from_outputs() {
        let y = Activation::Tanh.apply(0.3);
        assert!((Activation::Tanh.derivative(y) - (1.0 - 0.3f32.tanh().powi(2))).abs() < 1e-6);
        assert_eq!(Activation::Relu.derivative(Activation::Relu.apply(-2.0)), 0.0);
        assert_eq!(Activation::Relu.derivative(Activation::Relu.apply(2.0)), 1.0);
    }

    #[test]
    fn bounded_exp_does_not_overflow() {
        assert!(bounded_exp(1.0e6, 1.0).is_finite());
        assert!(bounded_exp(-1.0e6, 0.5) > 0.0);
    }
}
