//! Binary confusion matrix and precision / recall / F1.

use serde::{Deserialize, Serialize};

/// Rows are ground truth, columns predictions: `[[TN, FP], [FN, TP]]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, truth: u8, predicted: u8) {
        match (truth != 0, predicted != 0) {
            (false, false) => self.true_negative += 1,
            (false, true) => self.false_positive += 1,
            (true, false) => self.false_negative += 1,
            (true, true) => self.true_positive += 1,
        }
    }

    pub fn as_array(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }

    pub fn accuracy(&self) -> f32 {
        ratio(self.true_negative + self.true_positive, self.total())
    }

    /// Metrics treating anomaly (1) as the positive class
    pub fn anomaly_metrics(&self) -> ClassMetrics {
        ClassMetrics::from_counts(
            self.true_positive,
            self.false_positive,
            self.false_negative,
        )
    }

    /// Metrics treating normal (0) as the positive class
    pub fn normal_metrics(&self) -> ClassMetrics {
        ClassMetrics::from_counts(
            self.true_negative,
            self.false_negative,
            self.false_positive,
        )
    }
}

/// Zero when the denominator is zero
fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

impl ClassMetrics {
    pub fn from_counts(tp: usize, fp: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: tp + fn_,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_metrics() {
        let mut cm = ConfusionMatrix::default();
        for (t, p) in [(0, 0), (0, 0), (0, 1), (1, 1), (1, 1), (1, 0)] {
            cm.record(t, p);
        }
        assert_eq!(cm.as_array(), [[2, 1], [1, 2]]);
        let a = cm.anomaly_metrics();
        assert!((a.precision - 2.0 / 3.0).abs() < 1e-6);
        assert!((a.recall - 2.0 / 3.0).abs() < 1e-6);
        assert!((a.f1 - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(a.support, 3);
        assert!((cm.accuracy() - 4.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn zero_division_yields_zero() {
        let mut cm = ConfusionMatrix::default();
        cm.record(0, 0);
        let a = cm.anomaly_metrics();
        assert_eq!((a.precision, a.recall, a.f1, a.support), (0.0, 0.0, 0.0, 0));
    }
}
