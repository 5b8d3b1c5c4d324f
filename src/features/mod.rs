//! Model input contract: scaled CAN frames grouped into fixed-length windows.

mod dataset;
mod scaler;

pub use dataset::{train_validation_split, CanDataset, TrafficClass};
pub use scaler::MinMaxScaler;

use crate::error::{DetectorError, Result};
use ndarray::{Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// One CAN frame's features (arbitration id + payload bytes by default)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub dim: usize,
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            dim: values.len(),
            values,
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.dim.min(self.values.len())]
    }
}

/// Batch of sequences, shape (batch, L, F)
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBatch {
    data: Array3<f32>,
}

impl FeatureBatch {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// Groups consecutive rows into non-overlapping windows of `seq_len`;
    /// a trailing partial window is dropped.
    pub fn from_rows(rows: &Array2<f32>, seq_len: usize) -> Result<Self> {
        if seq_len == 0 {
            return Err(DetectorError::Config("sequence length must be > 0".into()));
        }
        let windows = rows.nrows() / seq_len;
        let width = rows.ncols();
        let used = rows.slice(ndarray::s![..windows * seq_len, ..]);
        let data = used
            .to_owned()
            .into_shape((windows, seq_len, width))
            .map_err(|e| DetectorError::shape(format!("({}, {}, {})", windows, seq_len, width), e.to_string()))?;
        Ok(Self { data })
    }

    /// Sequences of length 1 from individual vectors; all must share one width.
    pub fn from_vectors(vectors: &[FeatureVector]) -> Result<Self> {
        let width = vectors.first().map(|v| v.as_slice().len()).unwrap_or(0);
        let mut data = Array3::<f32>::zeros((vectors.len(), 1, width));
        for (i, v) in vectors.iter().enumerate() {
            let values = v.as_slice();
            if values.len() != width {
                return Err(DetectorError::shape(
                    format!("{} features", width),
                    format!("{} features at vector {}", values.len(), i),
                ));
            }
            for (f, &x) in values.iter().enumerate() {
                data[[i, 0, f]] = x;
            }
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seq_len(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn feature_dim(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// New batch holding the given sequences, in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            data: self.data.select(Axis(0), indices),
        }
    }
}
