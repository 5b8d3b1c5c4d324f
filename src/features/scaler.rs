//! Per-feature min-max scaling, fitted on benign traffic only.

use crate::error::{DetectorError, Result};
use crate::fingerprint;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: Array1<f32>,
    /// max - min, with constant columns stored as 1
    range: Array1<f32>,
}

impl MinMaxScaler {
    /// Rows are samples, columns features.
    pub fn fit(rows: &Array2<f32>) -> Result<Self> {
        if rows.nrows() == 0 || rows.ncols() == 0 {
            return Err(DetectorError::Dataset("cannot fit scaler on an empty table".into()));
        }
        if rows.iter().any(|v| !v.is_finite()) {
            return Err(DetectorError::NonFinite("scaler input"));
        }
        let min = rows.fold_axis(Axis(0), f32::INFINITY, |a, &b| a.min(b));
        let max = rows.fold_axis(Axis(0), f32::NEG_INFINITY, |a, &b| a.max(b));
        let range = (&max - &min).mapv(|r| if r > 0.0 { r } else { 1.0 });
        Ok(Self { min, range })
    }

    pub fn feature_dim(&self) -> usize {
        self.min.len()
    }

    /// Values outside the fitted range map outside [0, 1].
    pub fn transform(&self, rows: &Array2<f32>) -> Result<Array2<f32>> {
        if rows.ncols() != self.feature_dim() {
            return Err(DetectorError::shape(
                format!("{} features", self.feature_dim()),
                format!("{} features", rows.ncols()),
            ));
        }
        Ok((rows - &self.min) / &self.range)
    }

    pub fn transform_clipped(&self, rows: &Array2<f32>) -> Result<Array2<f32>> {
        Ok(self.transform(rows)?.mapv(|v| v.clamp(0.0, 1.0)))
    }

    pub fn fingerprint(&self) -> String {
        fingerprint::of_tensors([self.min.view().into_dyn(), self.range.view().into_dyn()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn maps_fitted_range_to_unit_interval() {
        let rows = array![[0.0, 10.0, 5.0], [4.0, 20.0, 5.0], [2.0, 15.0, 5.0]];
        let scaler = MinMaxScaler::fit(&rows).unwrap();
        let t = scaler.transform(&rows).unwrap();
        assert_eq!(t.column(0).to_vec(), vec![0.0, 1.0, 0.5]);
        assert_eq!(t.column(1).to_vec(), vec![0.0, 1.0, 0.5]);
        // constant column
        assert_eq!(t.column(2).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn out_of_range_values_are_kept_unless_clipped() {
        let scaler = MinMaxScaler::fit(&array![[0.0], [1.0]]).unwrap();
        let x = array![[1.5], [-0.5]];
        assert_eq!(scaler.transform(&x).unwrap(), array![[1.5], [-0.5]]);
        assert_eq!(scaler.transform_clipped(&x).unwrap(), array![[1.0], [0.0]]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(MinMaxScaler::fit(&Array2::zeros((0, 3))).is_err());
        assert!(MinMaxScaler::fit(&array![[f32::NAN]]).is_err());
        let scaler = MinMaxScaler::fit(&array![[0.0, 1.0]]).unwrap();
        assert!(matches!(scaler.transform(&array![[0.0]]), Err(DetectorError::Shape { .. })));
    }
}
