//! Metrics Module for Model Evaluation
//!
//! Binary classification metrics for the tumor / no-tumor task:
//! - Accuracy
//! - Precision, Recall, F1-score (tumor is the positive class)
//! - Confusion matrix `[[tn, fp], [fn, tp]]`, rows are ground truth

use std::fmt;

use serde::{Deserialize, Serialize};

/// 2x2 confusion matrix, rows = truth, columns = prediction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    /// Build from predicted and ground-truth labels (0 = no tumor, 1 = tumor)
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize]) -> Self {
        let mut cm = Self::default();
        for (&pred, &truth) in predictions.iter().zip(ground_truth.iter()) {
            cm.record(pred == 1, truth == 1);
        }
        cm
    }

    pub fn record(&mut self, predicted_tumor: bool, actual_tumor: bool) {
        match (actual_tumor, predicted_tumor) {
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_positives += 1,
            (true, false) => self.false_negatives += 1,
            (true, true) => self.true_positives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    /// Matrix in row-major `[[tn, fp], [fn, tp]]` layout
    pub fn as_rows(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negatives, self.false_positives],
            [self.false_negatives, self.true_positives],
        ]
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "              pred:no  pred:yes")?;
        writeln!(
            f,
            "  no tumor   {:>8} {:>9}",
            self.true_negatives, self.false_positives
        )?;
        write!(
            f,
            "  tumor      {:>8} {:>9}",
            self.false_negatives, self.true_positives
        )
    }
}

/// Evaluation metrics for one pass over a labelled split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,
    /// Overall accuracy (correct / total)
    pub accuracy: f64,
    /// tp / (tp + fp), 0 when nothing was predicted positive
    pub precision: f64,
    /// tp / (tp + fn), 0 when there are no positives
    pub recall: f64,
    pub f1: f64,
    /// Mean binary cross-entropy over the split
    pub loss: f64,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Compute metrics from predicted and ground-truth labels
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], loss: f64) -> Self {
        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, ground_truth);
        Self::from_confusion(confusion_matrix, loss)
    }

    pub fn from_confusion(cm: ConfusionMatrix, loss: f64) -> Self {
        let total = cm.total();
        if total == 0 {
            return Self {
                loss,
                ..Self::default()
            };
        }

        let tp = cm.true_positives as f64;
        let accuracy = (cm.true_positives + cm.true_negatives) as f64 / total as f64;
        let precision = safe_div(tp, tp + cm.false_positives as f64);
        let recall = safe_div(tp, tp + cm.false_negatives as f64);
        let f1 = safe_div(2.0 * precision * recall, precision + recall);

        Self {
            total_samples: total,
            accuracy,
            precision,
            recall,
            f1,
            loss,
            confusion_matrix: cm,
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "acc: {:.2}% | precision: {:.4} | recall: {:.4} | f1: {:.4} | loss: {:.4}",
            self.accuracy * 100.0,
            self.precision,
            self.recall,
            self.f1,
            self.loss
        )
    }
}

/// Metrics of one training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_precision: f64,
    pub val_recall: f64,
    /// Learning rate used during this epoch
    pub learning_rate: f64,
}

/// Per-epoch curves of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Epoch with the highest validation accuracy, first one wins ties
    pub fn best_epoch(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().fold(None, |best: Option<&EpochMetrics>, e| match best {
            Some(b) if b.val_accuracy >= e.val_accuracy => Some(b),
            _ => Some(e),
        })
    }
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_layout() {
        let preds = vec![0, 1, 1, 0, 1];
        let truth = vec![0, 0, 1, 1, 1];
        let cm = ConfusionMatrix::from_predictions(&preds, &truth);

        assert_eq!(cm.as_rows(), [[1, 1], [1, 2]]);
        assert_eq!(cm.total(), 5);
    }

    #[test]
    fn test_metrics_values() {
        let preds = vec![0, 1, 1, 0, 1];
        let truth = vec![0, 0, 1, 1, 1];
        let m = Metrics::from_predictions(&preds, &truth, 0.42);

        assert!((m.accuracy - 0.6).abs() < 1e-9);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.loss, 0.42);
    }

    #[test]
    fn test_no_positive_predictions() {
        let m = Metrics::from_predictions(&[0, 0], &[1, 0], 0.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!((m.accuracy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_history_best_epoch() {
        let mut history = TrainingHistory::default();
        assert!(history.best_epoch().is_none());

        for (epoch, acc) in [0.5, 0.8, 0.8, 0.7].into_iter().enumerate() {
            history.push(EpochMetrics {
                epoch,
                train_loss: 0.0,
                train_accuracy: 0.0,
                val_loss: 0.0,
                val_accuracy: acc,
                val_precision: 0.0,
                val_recall: 0.0,
                learning_rate: 0.001,
            });
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.best_epoch().map(|e| e.epoch), Some(1));
    }

    #[test]
    fn test_empty_metrics() {
        let m = Metrics::from_predictions(&[], &[], 1.0);
        assert_eq!(m.total_samples, 0);
        assert_eq!(m.accuracy, 0.0);
    }
}
