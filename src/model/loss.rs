//! Composite objective: reconstruction MSE + KL divergence to N(0, I).
//!
//! Both terms are computed explicitly from a forward pass's outputs and summed;
//! nothing registers itself into a shared loss.

use super::activation::LOG_VAR_BOUND;
use super::encoder::LatentParams;
use ndarray::{Array1, Array2, Array3, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub reconstruction: f32,
    pub divergence: f32,
    pub total: f32,
}

impl LossBreakdown {
    pub fn new(reconstruction: f32, divergence: f32) -> Self {
        Self {
            reconstruction,
            divergence,
            total: reconstruction + divergence,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }
}

/// Mean squared error over every element
pub fn reconstruction_loss(input: ArrayView3<'_, f32>, reconstruction: ArrayView3<'_, f32>) -> f32 {
    let n = input.len().max(1) as f32;
    let mut sum = 0.0f32;
    Zip::from(&input)
        .and(&reconstruction)
        .for_each(|&x, &r| sum += (x - r) * (x - r));
    sum / n
}

/// d MSE / d reconstruction
pub fn reconstruction_grad(input: ArrayView3<'_, f32>, reconstruction: ArrayView3<'_, f32>) -> Array3<f32> {
    let scale = 2.0 / input.len().max(1) as f32;
    let mut grad = Array3::<f32>::zeros(input.raw_dim());
    Zip::from(&mut grad)
        .and(&input)
        .and(&reconstruction)
        .for_each(|g, &x, &r| *g = scale * (r - x));
    grad
}

/// Per-sample `-0.5 * sum_D(1 + lv - mu^2 - exp(lv))`, evaluated as
/// `lv - expm1(lv)` in f64 so small nonzero log-variances stay positive.
pub fn divergence_per_sample(latent: &LatentParams) -> Array1<f32> {
    let mut terms = Array2::<f32>::zeros(latent.mean.raw_dim());
    Zip::from(&mut terms)
        .and(&latent.mean)
        .and(&latent.log_var)
        .for_each(|k, &mu, &lv| {
            let lv_c = f64::from(lv.clamp(-LOG_VAR_BOUND, LOG_VAR_BOUND));
            let mu = f64::from(mu);
            *k = (-0.5 * (lv_c - lv_c.exp_m1() - mu * mu)) as f32;
        });
    terms.sum_axis(Axis(1))
}

/// Batch mean of [`divergence_per_sample`]
pub fn divergence(latent: &LatentParams) -> f32 {
    divergence_per_sample(latent).mean().unwrap_or(0.0)
}

/// (d KL / d mean, d KL / d log_var) for the batch-mean divergence.
/// Log-variances outside the clamp get a zero gradient.
pub fn divergence_grad(latent: &LatentParams) -> (Array2<f32>, Array2<f32>) {
    let batch = latent.mean.nrows().max(1) as f32;
    let d_mean = latent.mean.mapv(|mu| mu / batch);
    let d_log_var = latent.log_var.mapv(|lv| {
        if lv.abs() > LOG_VAR_BOUND {
            0.0
        } else {
            0.5 * lv.exp_m1() / batch
        }
    });
    (d_mean, d_log_var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standard_normal_posterior_has_zero_divergence() {
        let latent = LatentParams {
            mean: Array2::zeros((4, 3)),
            log_var: Array2::zeros((4, 3)),
        };
        assert_eq!(divergence(&latent), 0.0);
    }

    #[test]
    fn divergence_matches_closed_form() {
        let latent = LatentParams {
            mean: array![[1.0, 0.0]],
            log_var: array![[0.0, 1.0]],
        };
        // 0.5 * mu^2 + 0.5 * (e - 1 - 1)
        let expected = 0.5 + 0.5 * (1.0f32.exp() - 2.0);
        assert!((divergence(&latent) - expected).abs() < 1e-6);
    }

    #[test]
    fn extreme_log_variance_stays_finite() {
        let latent = LatentParams {
            mean: array![[0.0]],
            log_var: array![[500.0]],
        };
        assert!(divergence(&latent).is_finite());
        let (_, dlv) = divergence_grad(&latent);
        assert_eq!(dlv[[0, 0]], 0.0);
    }

    #[test]
    fn tiny_log_variance_keeps_divergence_positive() {
        for k in 1..=2000 {
            for lv in [k as f32 * 1e-6, -(k as f32) * 1e-6] {
                let latent = LatentParams {
                    mean: array![[0.0]],
                    log_var: array![[lv]],
                };
                let kl = divergence(&latent);
                assert!(kl > 0.0, "kl = {} at log_var = {}", kl, lv);
            }
        }
    }

    #[test]
    fn gradient_matches_finite_difference_near_zero() {
        let at = |lv: f32| LatentParams {
            mean: array![[0.0]],
            log_var: array![[lv]],
        };
        let (lv, h) = (0.01f32, 1e-3f32);
        let numeric = (divergence(&at(lv + h)) - divergence(&at(lv - h))) / (2.0 * h);
        let (_, dlv) = divergence_grad(&at(lv));
        assert!((numeric - dlv[[0, 0]]).abs() < 1e-4, "{} vs {}", numeric, dlv[[0, 0]]);
    }

    #[test]
    fn mse_and_gradient() {
        let x = Array3::from_elem((2, 1, 2), 0.5);
        let r = Array3::from_elem((2, 1, 2), 0.25);
        assert!((reconstruction_loss(x.view(), r.view()) - 0.0625).abs() < 1e-7);
        let g = reconstruction_grad(x.view(), r.view());
        assert!(g.iter().all(|&v| (v + 0.125).abs() < 1e-7));
    }
}
