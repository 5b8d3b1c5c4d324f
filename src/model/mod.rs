//! Attention-augmented variational autoencoder, written as explicit
//! forward / backward transforms over `ndarray` matrices.

mod activation;
mod attention;
mod decoder;
mod dense;
mod encoder;
pub mod loss;
mod lstm;
mod optimizer;
mod sampler;
mod vae;

pub use activation::{sigmoid, Activation, LOG_VAR_BOUND};
pub use attention::{AttentionOutput, AttentionPooling};
pub use decoder::Decoder;
pub use dense::Dense;
pub use encoder::{Encoder, EncoderOutput, LatentParams};
pub use loss::LossBreakdown;
pub use lstm::Lstm;
pub use optimizer::Adam;
pub use sampler::{LatentSample, Sampler};
pub use vae::{AttentionVae, ForwardPass, Gradients};

use ndarray::{ArrayViewD, ArrayViewMutD};
use rand::rngs::StdRng;

/// Training enables input noise and dropout, drawing from the given generator.
pub enum Mode<'a> {
    Training(&'a mut StdRng),
    Inference,
}

/// Trainable tensors in a fixed visiting order. Gradients share the layout of
/// the parameters they belong to, so optimizers can zip the two lists.
pub trait Parameters {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f32>>;
    fn tensors_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    fn parameter_count(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }

    fn all_finite(&self) -> bool {
        self.tensors().iter().all(|t| t.iter().all(|v| v.is_finite()))
    }
}
