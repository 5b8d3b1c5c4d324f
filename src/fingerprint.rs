//! SHA-256 fingerprints binding thresholds and scalers to exact parameters.

use ndarray::ArrayViewD;
use sha2::{Digest, Sha256};

/// Hex SHA-256 over tensor shapes and little-endian values, in order.
pub fn of_tensors<'a>(tensors: impl IntoIterator<Item = ArrayViewD<'a, f32>>) -> String {
    let mut hasher = Sha256::new();
    for t in tensors {
        hasher.update((t.ndim() as u64).to_le_bytes());
        for &d in t.shape() {
            hasher.update((d as u64).to_le_bytes());
        }
        for v in t.iter() {
            hasher.update(v.to_le_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn sensitive_to_values_and_shape() {
        let a = array![[1.0f32, 2.0], [3.0, 4.0]];
        let b = array![[1.0f32, 2.0, 3.0, 4.0]];
        let c = array![[1.0f32, 2.0], [3.0, 4.5]];
        let fa = of_tensors([a.view().into_dyn()]);
        assert_eq!(fa.len(), 64);
        assert_eq!(fa, of_tensors([a.view().into_dyn()]));
        assert_ne!(fa, of_tensors([b.view().into_dyn()]));
        assert_ne!(fa, of_tensors([c.view().into_dyn()]));
    }
}
