//! `AttentionVae`: encoder, sampler and decoder composed in a fixed order,
//! with the joint backward pass used by the trainer.

use super::decoder::{Decoder, DecoderTape};
use super::encoder::{Encoder, EncoderTape, LatentParams};
use super::loss::{self, LossBreakdown};
use super::sampler::{LatentSample, Sampler};
use super::{Mode, Parameters};
use crate::config::ModelConfig;
use crate::error::{DetectorError, Result};
use crate::fingerprint;
use ndarray::{Array2, Array3, ArrayView3, ArrayViewD, ArrayViewMutD};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Everything one forward pass produces
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// Same shape as the input
    pub reconstruction: Array3<f32>,
    pub latent: LatentParams,
    pub sample: LatentSample,
    /// (batch, L)
    pub attention_weights: Array2<f32>,
}

struct Tapes {
    encoder: EncoderTape,
    decoder: DecoderTape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionVae {
    config: ModelConfig,
    encoder: Encoder,
    decoder: Decoder,
}

/// Parameter gradients, laid out exactly like [`AttentionVae`]'s tensors.
#[derive(Debug, Clone)]
pub struct Gradients {
    encoder: Encoder,
    decoder: Decoder,
}

impl AttentionVae {
    /// Fresh model with parameters drawn from `seed`.
    pub fn new(config: &ModelConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let encoder = Encoder::new(config, &mut rng);
        let decoder = Decoder::new(config, &mut rng);
        Ok(Self {
            config: config.clone(),
            encoder,
            decoder,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Rejects empty batches and any (L, F) other than the configured one.
    pub fn check_input(&self, input: ArrayView3<'_, f32>) -> Result<()> {
        let (batch, len, width) = input.dim();
        let (l, f) = (self.config.seq_len, self.config.feature_dim);
        if batch == 0 || len != l || width != f {
            return Err(DetectorError::shape(
                format!("(batch >= 1, {}, {})", l, f),
                format!("({}, {}, {})", batch, len, width),
            ));
        }
        Ok(())
    }

    fn forward_with_tape(
        &self,
        input: ArrayView3<'_, f32>,
        mode: &mut Mode<'_>,
        sampler: &mut Sampler,
    ) -> Result<(ForwardPass, Tapes)> {
        self.check_input(input)?;
        let (encoded, encoder_tape) = self.encoder.forward(input, mode);
        let sample = sampler.sample(&encoded.latent);
        let (reconstruction, decoder_tape) = self.decoder.forward(&sample.z, mode);
        let pass = ForwardPass {
            reconstruction,
            latent: encoded.latent,
            sample,
            attention_weights: encoded.attention_weights,
        };
        Ok((
            pass,
            Tapes {
                encoder: encoder_tape,
                decoder: decoder_tape,
            },
        ))
    }

    pub fn forward(&self, input: ArrayView3<'_, f32>, mode: &mut Mode<'_>, sampler: &mut Sampler) -> Result<ForwardPass> {
        self.forward_with_tape(input, mode, sampler).map(|(pass, _)| pass)
    }

    /// Posterior parameters in inference mode
    pub fn encode(&self, input: ArrayView3<'_, f32>) -> Result<LatentParams> {
        self.check_input(input)?;
        let (encoded, _) = self.encoder.forward(input, &mut Mode::Inference);
        Ok(encoded.latent)
    }

    /// Inference-mode reconstruction through one latent draw from `sampler`.
    pub fn reconstruct(&self, input: ArrayView3<'_, f32>, sampler: &mut Sampler) -> Result<Array3<f32>> {
        Ok(self.forward(input, &mut Mode::Inference, sampler)?.reconstruction)
    }

    /// Composite loss against the clean `input`.
    pub fn loss(&self, input: ArrayView3<'_, f32>, mode: &mut Mode<'_>, sampler: &mut Sampler) -> Result<LossBreakdown> {
        let pass = self.forward(input, mode, sampler)?;
        Ok(LossBreakdown::new(
            loss::reconstruction_loss(input, pass.reconstruction.view()),
            loss::divergence(&pass.latent),
        ))
    }

    /// Loss plus the gradient of its total with respect to every parameter.
    pub fn loss_and_gradients(
        &self,
        input: ArrayView3<'_, f32>,
        mode: &mut Mode<'_>,
        sampler: &mut Sampler,
    ) -> Result<(LossBreakdown, Gradients)> {
        let (pass, tapes) = self.forward_with_tape(input, mode, sampler)?;
        let breakdown = LossBreakdown::new(
            loss::reconstruction_loss(input, pass.reconstruction.view()),
            loss::divergence(&pass.latent),
        );

        let mut grads = self.zero_gradients();
        let d_reconstruction = loss::reconstruction_grad(input, pass.reconstruction.view());
        let dz = self
            .decoder
            .backward(&tapes.decoder, d_reconstruction.view(), &mut grads.decoder);

        let (mut d_mean, mut d_log_var) = pass.sample.backward(&dz);
        let (kl_mean, kl_log_var) = loss::divergence_grad(&pass.latent);
        d_mean += &kl_mean;
        d_log_var += &kl_log_var;

        self.encoder
            .backward(&tapes.encoder, &pass.latent, &d_mean, &d_log_var, &mut grads.encoder);
        Ok((breakdown, grads))
    }

    pub fn zero_gradients(&self) -> Gradients {
        Gradients {
            encoder: self.encoder.zeros_like(),
            decoder: self.decoder.zeros_like(),
        }
    }

    /// Hex SHA-256 over every parameter tensor
    pub fn fingerprint(&self) -> String {
        fingerprint::of_tensors(self.tensors())
    }

    /// Layer shapes agree with the stored configuration and every weight is finite.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        if !(self.encoder.matches(&self.config) && self.decoder.matches(&self.config)) {
            return Err(DetectorError::shape(
                format!(
                    "layers for F={} L={} D={} H={} U={} dense={}",
                    self.config.feature_dim,
                    self.config.seq_len,
                    self.config.latent_dim,
                    self.config.recurrent_units,
                    self.config.attention_units,
                    self.config.dense_units
                ),
                "checkpoint tensors of a different shape",
            ));
        }
        if !self.all_finite() {
            return Err(DetectorError::NonFinite("model parameters"));
        }
        Ok(())
    }
}

impl Parameters for AttentionVae {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = self.encoder.tensors();
        out.extend(self.decoder.tensors());
        out
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = self.encoder.tensors_mut();
        out.extend(self.decoder.tensors_mut());
        out
    }
}

impl Parameters for Gradients {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut out = self.encoder.tensors();
        out.extend(self.decoder.tensors());
        out
    }

    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut out = self.encoder.tensors_mut();
        out.extend(self.decoder.tensors_mut());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Activation;
    use rand::Rng;

    fn small_config(latent_dim: usize) -> ModelConfig {
        ModelConfig {
            feature_dim: 3,
            seq_len: 2,
            latent_dim,
            attention_units: 3,
            recurrent_units: 4,
            dense_units: 4,
            ..ModelConfig::default()
        }
    }

    fn input(batch: usize, len: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, len, width), |(b, t, f)| {
            ((b * 7 + t * 3 + f) % 10) as f32 / 10.0
        })
    }

    #[test]
    fn preserves_shape_for_any_latent_width() {
        for d in 1..=5 {
            let model = AttentionVae::new(&small_config(d), 1).unwrap();
            let x = input(4, 2, 3);
            let pass = model
                .forward(x.view(), &mut Mode::Inference, &mut Sampler::seeded(0))
                .unwrap();
            assert_eq!(pass.reconstruction.dim(), x.dim());
            assert_eq!(pass.latent.mean.dim(), (4, d));
            assert_eq!(pass.sample.z.dim(), (4, d));
            assert!(pass.reconstruction.iter().all(|v| *v > 0.0 && *v < 1.0));
        }
    }

    #[test]
    fn rejects_wrong_shapes() {
        let model = AttentionVae::new(&small_config(2), 1).unwrap();
        let mut sampler = Sampler::seeded(0);
        for x in [input(2, 2, 4), input(2, 1, 3), input(0, 2, 3)] {
            let err = model.forward(x.view(), &mut Mode::Inference, &mut sampler);
            assert!(matches!(err, Err(DetectorError::Shape { .. })));
        }
    }

    #[test]
    fn fingerprint_tracks_parameters() {
        let a = AttentionVae::new(&small_config(2), 1).unwrap();
        let b = AttentionVae::new(&small_config(2), 2).unwrap();
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        a.validate().unwrap();
    }

    #[test]
    fn encode_matches_inference_forward() {
        let model = AttentionVae::new(&small_config(3), 5).unwrap();
        let x = input(3, 2, 3);
        let latent = model.encode(x.view()).unwrap();
        let pass = model
            .forward(x.view(), &mut Mode::Inference, &mut Sampler::seeded(9))
            .unwrap();
        assert_eq!(latent.mean, pass.latent.mean);
        assert_eq!(latent.log_var, pass.latent.log_var);
        assert!(model.encode(input(3, 2, 4).view()).is_err());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let config = ModelConfig {
            noise_std: 0.0,
            dropout_rate: 0.0,
            recurrent_activation: Activation::Tanh,
            dense_activation: Activation::Tanh,
            ..small_config(2)
        };
        let mut model = AttentionVae::new(&config, 5).unwrap();
        let x = input(3, 2, 3);
        let loss_at = |m: &AttentionVae| {
            m.loss(x.view(), &mut Mode::Inference, &mut Sampler::seeded(9))
                .unwrap()
                .total
        };

        let (_, grads) = model
            .loss_and_gradients(x.view(), &mut Mode::Inference, &mut Sampler::seeded(9))
            .unwrap();
        let grads: Vec<_> = grads.tensors().into_iter().map(|g| g.to_owned()).collect();

        let mut rng = StdRng::seed_from_u64(11);
        let h = 5e-3f32;
        for (k, g) in grads.iter().enumerate() {
            let mut dir = g.mapv(|_| rng.gen_range(-1.0f32..1.0));
            let n = dir.iter().map(|v| v * v).sum::<f32>().sqrt();
            dir.mapv_inplace(|v| v / n);
            let analytic: f32 = (g * &dir).sum();

            model.tensors_mut()[k].scaled_add(h, &dir);
            let plus = loss_at(&model);
            model.tensors_mut()[k].scaled_add(-2.0 * h, &dir);
            let minus = loss_at(&model);
            model.tensors_mut()[k].scaled_add(h, &dir);

            let numeric = (plus - minus) / (2.0 * h);
            assert!(
                (numeric - analytic).abs() <= 0.1 * analytic.abs() + 5e-4,
                "tensor {}: numeric {} vs analytic {}",
                k,
                numeric,
                analytic
            );
        }
    }
}
