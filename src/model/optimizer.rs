//! Adam with bias correction and optional global gradient-norm clipping.

use super::Parameters;
use ndarray::{ArrayD, ArrayViewD, Zip};

fn norm(tensors: &[ArrayViewD<'_, f32>]) -> f32 {
    tensors
        .iter()
        .map(|g| g.iter().map(|v| v * v).sum::<f32>())
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    clip_norm: Option<f32>,
    t: i32,
    first: Vec<ArrayD<f32>>,
    second: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f32, clip_norm: Option<f32>) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            clip_norm,
            t: 0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    /// One update of `params` from `grads` (same tensor layout).
    pub fn step<P: Parameters, G: Parameters>(&mut self, params: &mut P, grads: &G) {
        let grads = grads.tensors();
        if self.first.len() != grads.len() {
            self.first = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.second = grads.iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.t = 0;
        }

        let total = norm(&grads);
        let scale = match self.clip_norm {
            Some(max) if total > max => max / total,
            _ => 1.0,
        };

        self.t = self.t.saturating_add(1);
        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);
        let c1 = 1.0 - b1.powi(self.t);
        let c2 = 1.0 - b2.powi(self.t);
        let lr = self.learning_rate;

        let mut params = params.tensors_mut();
        debug_assert_eq!(params.len(), grads.len());
        for (((p, g), m), v) in params
            .iter_mut()
            .zip(grads.iter())
            .zip(self.first.iter_mut())
            .zip(self.second.iter_mut())
        {
            Zip::from(p).and(g).and(m).and(v).for_each(|p, &g, m, v| {
                let g = g * scale;
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr * (*m / c1) / ((*v / c2).sqrt() + eps);
            });
        }
    }
}
