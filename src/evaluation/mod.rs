//! Evaluation of verdicts against ground truth (benign = 0, attack = 1).

mod metrics;

pub use metrics::{ClassMetrics, ConfusionMatrix};

use crate::error::{DetectorError, Result};
use crate::scoring::Verdict;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub confusion: ConfusionMatrix,
    pub normal: ClassMetrics,
    pub anomaly: ClassMetrics,
    pub accuracy: f32,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl EvaluationReport {
    pub fn from_predictions(truth: &[u8], verdicts: &[Verdict]) -> Result<Self> {
        if truth.len() != verdicts.len() {
            return Err(DetectorError::shape(
                format!("{} verdicts", truth.len()),
                format!("{} verdicts", verdicts.len()),
            ));
        }
        let mut confusion = ConfusionMatrix::default();
        for (&t, v) in truth.iter().zip(verdicts) {
            confusion.record(t, v.label());
        }
        Ok(Self::from_confusion(confusion))
    }

    pub fn from_confusion(confusion: ConfusionMatrix) -> Self {
        let normal = confusion.normal_metrics();
        let anomaly = confusion.anomaly_metrics();
        let total = normal.support + anomaly.support;
        let avg = |f: fn(&ClassMetrics) -> f32, weighted: bool| {
            if weighted {
                if total == 0 {
                    0.0
                } else {
                    (f(&normal) * normal.support as f32 + f(&anomaly) * anomaly.support as f32) / total as f32
                }
            } else {
                (f(&normal) + f(&anomaly)) / 2.0
            }
        };
        let summary = |weighted: bool| ClassMetrics {
            precision: avg(|m| m.precision, weighted),
            recall: avg(|m| m.recall, weighted),
            f1: avg(|m| m.f1, weighted),
            support: total,
        };
        Self {
            confusion,
            normal,
            anomaly,
            accuracy: confusion.accuracy(),
            macro_avg: summary(false),
            weighted_avg: summary(true),
        }
    }

    /// Anomaly-class precision
    pub fn precision(&self) -> f32 {
        self.anomaly.precision
    }

    pub fn recall(&self) -> f32 {
        self.anomaly.recall
    }

    pub fn f1(&self) -> f32 {
        self.anomaly.f1
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Precision: {:.4}", self.precision())?;
        writeln!(f, "Recall: {:.4}", self.recall())?;
        writeln!(f, "F1 Score: {:.4}", self.f1())?;
        writeln!(f)?;
        writeln!(f, "{:>14} {:>10} {:>10} {:>10} {:>10}", "", "precision", "recall", "f1-score", "support")?;
        for (name, m) in [("Normal", &self.normal), ("Anomaly", &self.anomaly)] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.confusion.total()
        )?;
        for (name, m) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        let [[tn, fp], [fn_, tp]] = self.confusion.as_array();
        writeln!(f)?;
        writeln!(f, "Confusion matrix (rows: true, cols: predicted)")?;
        writeln!(f, "{:>14} {:>10} {:>10}", "", "Normal", "Anomaly")?;
        writeln!(f, "{:>14} {:>10} {:>10}", "Normal", tn, fp)?;
        write!(f, "{:>14} {:>10} {:>10}", "Anomaly", fn_, tp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_classes() {
        let truth = [0, 0, 0, 1];
        let verdicts = [Verdict::Normal, Verdict::Normal, Verdict::Anomaly, Verdict::Anomaly];
        let r = EvaluationReport::from_predictions(&truth, &verdicts).unwrap();
        assert_eq!(r.anomaly.precision, 0.5);
        assert_eq!(r.anomaly.recall, 1.0);
        assert_eq!(r.normal.precision, 1.0);
        assert!((r.normal.recall - 2.0 / 3.0).abs() < 1e-6);
        assert!((r.macro_avg.precision - 0.75).abs() < 1e-6);
        assert!((r.weighted_avg.precision - 0.875).abs() < 1e-6);
        assert_eq!(r.accuracy, 0.75);
        let text = r.to_string();
        assert!(text.contains("weighted avg"));
        assert!(text.contains("Anomaly"));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(EvaluationReport::from_predictions(&[0, 1], &[Verdict::Normal]).is_err());
    }
}
