//! Evaluation and training metrics.

use serde::{Deserialize, Serialize};

use crate::types::CLASS_NAMES;

/// Loss, accuracy and confusion matrix for one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationMetrics {
    /// Mean sparse categorical cross-entropy over samples
    pub loss: f64,
    /// Fraction of correct predictions
    pub accuracy: f64,
    /// Per-class precision, indexed by label
    pub per_class_precision: Vec<f64>,
    /// Per-class recall, indexed by label
    pub per_class_recall: Vec<f64>,
    /// Confusion matrix (actual x predicted)
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Total number of samples evaluated
    pub num_samples: usize,
    #[serde(skip)]
    loss_sum: f64,
}

impl EvaluationMetrics {
    /// Creates an empty accumulator
    pub fn new(num_classes: usize) -> Self {
        Self {
            loss: 0.0,
            accuracy: 0.0,
            per_class_precision: vec![0.0; num_classes],
            per_class_recall: vec![0.0; num_classes],
            confusion_matrix: vec![vec![0; num_classes]; num_classes],
            num_samples: 0,
            loss_sum: 0.0,
        }
    }

    /// Updates confusion matrix with a prediction
    pub fn update_confusion_matrix(&mut self, actual: usize, predicted: usize) {
        let n = self.confusion_matrix.len();
        if actual < n && predicted < n {
            self.confusion_matrix[actual][predicted] += 1;
        }
    }

    /// Adds one batch: its mean loss plus the label/prediction pairs
    pub fn update_batch(&mut self, mean_loss: f64, actual: &[usize], predicted: &[usize]) {
        self.loss_sum += mean_loss * actual.len() as f64;
        for (&a, &p) in actual.iter().zip(predicted) {
            self.update_confusion_matrix(a, p);
        }
    }

    /// Computes loss, accuracy, precision and recall from the accumulated state
    pub fn compute(&mut self) {
        let num_classes = self.confusion_matrix.len();
        self.num_samples = self.confusion_matrix.iter().flatten().sum();

        if self.num_samples == 0 {
            return;
        }

        self.loss = self.loss_sum / self.num_samples as f64;

        let correct: usize = (0..num_classes).map(|i| self.confusion_matrix[i][i]).sum();
        self.accuracy = correct as f64 / self.num_samples as f64;

        for class_id in 0..num_classes {
            let true_positives = self.confusion_matrix[class_id][class_id] as f64;
            let predicted: usize = (0..num_classes).map(|i| self.confusion_matrix[i][class_id]).sum();
            let actual: usize = self.confusion_matrix[class_id].iter().sum();

            self.per_class_precision[class_id] = if predicted > 0 {
                true_positives / predicted as f64
            } else {
                0.0
            };
            self.per_class_recall[class_id] = if actual > 0 {
                true_positives / actual as f64
            } else {
                0.0
            };
        }
    }

    /// Macro-averaged recall
    pub fn macro_recall(&self) -> f64 {
        if self.per_class_recall.is_empty() {
            return 0.0;
        }
        self.per_class_recall.iter().sum::<f64>() / self.per_class_recall.len() as f64
    }

    /// Renders the confusion matrix with class names as row/column headers
    pub fn format_confusion_matrix(&self) -> String {
        let names: Vec<&str> = (0..self.confusion_matrix.len())
            .map(|i| CLASS_NAMES.get(i).copied().unwrap_or("?"))
            .collect();

        let mut out = format!("{:>10}", "");
        for name in &names {
            out.push_str(&format!("{name:>10}"));
        }
        for (row, name) in self.confusion_matrix.iter().zip(&names) {
            out.push('\n');
            out.push_str(&format!("{name:>10}"));
            for count in row {
                out.push_str(&format!("{count:>10}"));
            }
        }
        out
    }
}

/// Metrics for a single epoch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EpochRecord {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Training metrics tracked during a fit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    /// Appends an epoch
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    /// Most recent epoch
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }
}
