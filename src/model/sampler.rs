//! Reparameterised latent sampling: `z = mean + exp(0.5 * log_var) * eps`.
//!
//! `eps ~ N(0, I)` is the only randomness and does not depend on the
//! parameters, so gradients flow to `mean` and `log_var` unchanged.

use super::activation::{bounded_exp, LOG_VAR_BOUND};
use super::encoder::LatentParams;
use ndarray::{Array2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Seedable source of latent samples.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: StdRng,
}

/// One draw per batch element, with the values the backward pass needs.
#[derive(Debug, Clone)]
pub struct LatentSample {
    /// (batch, D)
    pub z: Array2<f32>,
    pub epsilon: Array2<f32>,
    /// exp(0.5 * log_var)
    pub std_dev: Array2<f32>,
    /// Log-variances the forward pass clamped; they receive no gradient
    pub clamped: Array2<bool>,
}

impl Sampler {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample(&mut self, latent: &LatentParams) -> LatentSample {
        let rng = &mut self.rng;
        let epsilon = Array2::from_shape_fn(latent.mean.raw_dim(), |_| rng.sample::<f32, _>(StandardNormal));
        let std_dev = latent.log_var.mapv(|lv| bounded_exp(lv, 0.5));
        let clamped = latent.log_var.mapv(|lv| lv.abs() > LOG_VAR_BOUND);
        let z = &latent.mean + &(&std_dev * &epsilon);
        LatentSample {
            z,
            epsilon,
            std_dev,
            clamped,
        }
    }
}

impl LatentSample {
    /// Maps d loss / d z to (d mean, d log_var).
    pub fn backward(&self, dz: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        let mut d_log_var = Array2::<f32>::zeros(dz.raw_dim());
        Zip::from(&mut d_log_var)
            .and(dz)
            .and(&self.epsilon)
            .and(&self.std_dev)
            .and(&self.clamped)
            .for_each(|d, &g, &e, &s, &c| *d = if c { 0.0 } else { g * e * 0.5 * s });
        (dz.clone(), d_log_var)
    }
}
