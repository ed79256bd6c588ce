//! Model evaluation: loss, accuracy and confusion matrix over a prepared
//! partition.

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion},
};
use rps_core::{EvaluationMetrics, Result, NUM_CLASSES};
use rps_dataset::PreparedDataset;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::data::RpsBatcher;
use crate::model::RpsClassifier;

/// Result of one evaluation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub metrics: EvaluationMetrics,
    /// Predicted label per sample, in partition order
    pub predictions: Vec<usize>,
    pub avg_inference_time_ms: f64,
}

/// Runs a model over a prepared partition
pub struct Evaluator<B: Backend> {
    batcher: RpsBatcher<B>,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            batcher: RpsBatcher::new(device),
        }
    }

    /// Evaluates `model` over every batch of `dataset`
    pub fn evaluate(&self, model: &RpsClassifier<B>, dataset: &PreparedDataset) -> Result<EvaluationResult> {
        debug!("Evaluating {} {} samples", dataset.len(), dataset.split());

        let loss_fn = CrossEntropyLossConfig::new().init(self.batcher.device());
        let mut metrics = EvaluationMetrics::new(NUM_CLASSES);
        let mut predictions = Vec::with_capacity(dataset.len());
        let mut inference_time = 0.0f64;

        for batch in dataset.epoch(0)? {
            let batch = batch?;
            let tensors = self.batcher.to_tensors(&batch);

            let start = Instant::now();
            let logits = model.forward(tensors.images);
            inference_time += start.elapsed().as_secs_f64() * 1000.0;

            let loss: f64 = loss_fn
                .forward(logits.clone(), tensors.targets)
                .into_scalar()
                .elem();
            let predicted: Vec<usize> = logits
                .argmax(1)
                .reshape([batch.len()])
                .into_data()
                .iter::<i64>()
                .map(|p| p as usize)
                .collect();

            metrics.update_batch(loss, &batch.labels, &predicted);
            predictions.extend(predicted);
        }
        metrics.compute();

        Ok(EvaluationResult {
            avg_inference_time_ms: inference_time / metrics.num_samples.max(1) as f64,
            metrics,
            predictions,
        })
    }
}

/// Logs loss, accuracy and the confusion matrix under a heading
pub fn log_evaluation(heading: &str, result: &EvaluationResult) {
    let metrics = &result.metrics;
    info!("{heading}");
    info!("  loss: {:.4}", metrics.loss);
    info!("  accuracy: {:.4}", metrics.accuracy);
    info!("  macro recall: {:.4}", metrics.macro_recall());
    info!("  confusion matrix:\n{}", metrics.format_confusion_matrix());
}
