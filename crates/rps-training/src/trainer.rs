//! Fit loop for the classifier head.
//!
//! Each epoch streams the prepared train partition, runs the frozen
//! backbone on the inner backend and updates only the head with Adam on
//! sparse categorical cross-entropy. After the epoch the model is evaluated
//! on the validation partition and a checkpoint is written when validation
//! accuracy improved.

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use rps_core::{EpochRecord, Error, Result, TrainingHistory, TrainingParams};
use rps_dataset::PreparedDataset;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkpoint::CheckpointManager;
use crate::data::RpsBatcher;
use crate::evaluator::{EvaluationResult, Evaluator};
use crate::model::RpsClassifier;

/// Configuration for the trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub num_epochs: usize,
    /// Draw a progress bar per epoch
    pub progress: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            num_epochs: 20,
            progress: true,
        }
    }
}

impl From<&TrainingParams> for TrainerConfig {
    fn from(params: &TrainingParams) -> Self {
        Self {
            learning_rate: params.learning_rate,
            num_epochs: params.epochs,
            ..Self::default()
        }
    }
}

/// Outcome of a fit
pub struct FitOutput<B: AutodiffBackend> {
    /// Weights after the final epoch
    pub model: RpsClassifier<B>,
    pub history: TrainingHistory,
    /// Validation evaluation after the final epoch
    pub last_validation: EvaluationResult,
}

/// Runs the epoch loop
pub struct Trainer<B: AutodiffBackend> {
    config: TrainerConfig,
    batcher: RpsBatcher<B>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainerConfig, device: B::Device) -> Self {
        Self {
            config,
            batcher: RpsBatcher::new(device),
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Fits `model` for the configured number of epochs
    pub fn fit(
        &self,
        mut model: RpsClassifier<B>,
        train: &PreparedDataset,
        validation: &PreparedDataset,
        checkpoints: &mut CheckpointManager,
    ) -> Result<FitOutput<B>> {
        if train.is_empty() {
            return Err(Error::Training("train partition is empty".into()));
        }
        if validation.is_empty() {
            return Err(Error::Training("validation partition is empty".into()));
        }

        let device = self.batcher.device().clone();
        let evaluator = Evaluator::<B::InnerBackend>::new(device.clone());
        let loss_fn = CrossEntropyLossConfig::new().init(&device);
        let mut optimizer = AdamConfig::new().init();

        let mut history = TrainingHistory::default();
        let mut last_validation = None;

        info!(
            "Training for {} epochs: {} train / {} validation samples, lr={}",
            self.config.num_epochs,
            train.len(),
            validation.len(),
            self.config.learning_rate
        );

        for epoch in 0..self.config.num_epochs {
            let progress = self.progress_bar(train.num_batches(), epoch);
            let mut loss_sum = 0.0f64;
            let mut correct = 0usize;
            let mut seen = 0usize;

            for batch in train.epoch(epoch)? {
                let batch = batch?;
                let tensors = self.batcher.to_tensors(&batch);

                let logits = model.forward_frozen(tensors.images);
                let loss = loss_fn.forward(logits.clone(), tensors.targets.clone());

                let loss_value: f64 = loss.clone().into_scalar().elem();
                let batch_correct: i64 = logits
                    .argmax(1)
                    .reshape([batch.len()])
                    .equal(tensors.targets)
                    .int()
                    .sum()
                    .into_scalar()
                    .elem();
                loss_sum += loss_value * batch.len() as f64;
                correct += batch_correct as usize;
                seen += batch.len();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.config.learning_rate, model, grads);

                if let Some(bar) = &progress {
                    bar.set_message(format!("loss {loss_value:.4}"));
                    bar.inc(1);
                }
            }
            if let Some(bar) = progress {
                bar.finish_and_clear();
            }

            let validation_result = evaluator.evaluate(&model.valid(), validation)?;
            let record = EpochRecord {
                epoch: epoch + 1,
                train_loss: loss_sum / seen.max(1) as f64,
                train_accuracy: correct as f64 / seen.max(1) as f64,
                val_loss: validation_result.metrics.loss,
                val_accuracy: validation_result.metrics.accuracy,
            };
            info!(
                "Epoch {}/{}: loss={:.4} accuracy={:.4} val_loss={:.4} val_accuracy={:.4}",
                record.epoch,
                self.config.num_epochs,
                record.train_loss,
                record.train_accuracy,
                record.val_loss,
                record.val_accuracy
            );

            checkpoints.save_if_improved(&model, record.epoch, record.val_accuracy)?;
            history.push(record);
            last_validation = Some(validation_result);
        }

        let last_validation =
            last_validation.ok_or_else(|| Error::Training("no epochs were run".into()))?;

        Ok(FitOutput {
            model,
            history,
            last_validation,
        })
    }

    fn progress_bar(&self, num_batches: usize, epoch: usize) -> Option<ProgressBar> {
        if !self.config.progress {
            return None;
        }
        let bar = ProgressBar::new(num_batches as u64);
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_prefix(format!("Epoch {}/{}", epoch + 1, self.config.num_epochs));
        Some(bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use rps_core::{AugmentationConfig, DataSplit, ImageDimensions, ImageSample};
    use rps_dataset::{prepare_for_training, Partition, PrepareOptions, Processing};
    use tempfile::TempDir;

    use crate::model::RpsClassifierConfig;

    type TestBackend = Autodiff<NdArray>;

    const COLORS: [[u8; 3]; 3] = [[200, 40, 40], [40, 200, 40], [40, 40, 200]];

    fn prepared(dir: &TempDir, split: DataSplit, n: usize, augment: bool) -> PreparedDataset {
        let samples = (0..n)
            .map(|i| {
                let path = dir.path().join(format!("{split}-{i}.png"));
                RgbImage::from_pixel(32, 32, Rgb(COLORS[i % 3])).save(&path).unwrap();
                ImageSample::new(path, i % 3)
            })
            .collect();
        let partition = Partition {
            split,
            range: 0..n,
            samples,
        };
        let options = PrepareOptions {
            target_size: ImageDimensions::square(32),
            batch_size: 4,
            augment,
            shuffle: augment,
            cache: true,
            normalize_m1_p1: false,
            prefetch: 2,
        };
        let processing = Processing::new(AugmentationConfig::moderate()).unwrap();
        prepare_for_training(&partition, &processing, 1234, options).unwrap()
    }

    fn trainer(epochs: usize) -> Trainer<TestBackend> {
        let config = TrainerConfig {
            learning_rate: 1e-3,
            num_epochs: epochs,
            progress: false,
        };
        Trainer::new(config, Default::default())
    }

    fn model() -> RpsClassifier<TestBackend> {
        RpsClassifierConfig::new()
            .with_width_multiplier(0.25)
            .with_dense_units(8)
            .with_dropout(Some(0.4))
            .init(&Default::default())
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let dir = TempDir::new().unwrap();
        let train = prepared(&dir, DataSplit::Train, 9, true);
        let validation = prepared(&dir, DataSplit::Validation, 3, false);
        let mut checkpoints = CheckpointManager::new(dir.path().join("weights"));

        let output = trainer(2).fit(model(), &train, &validation, &mut checkpoints).unwrap();

        assert_eq!(output.history.epochs.len(), 2);
        assert_eq!(output.history.epochs[1].epoch, 2);
        for record in &output.history.epochs {
            assert!(record.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&record.val_accuracy));
        }
        assert_eq!(output.last_validation.metrics.num_samples, 3);

        // The first epoch always improves on "nothing yet"
        assert!(!checkpoints.checkpoints().is_empty());
        assert_eq!(checkpoints.checkpoints()[0].epoch, 1);
    }

    #[test]
    fn test_fit_freezes_backbone() {
        let dir = TempDir::new().unwrap();
        let train = prepared(&dir, DataSplit::Train, 6, false);
        let validation = prepared(&dir, DataSplit::Validation, 3, false);
        let mut checkpoints = CheckpointManager::new(dir.path().join("weights"));

        let initial = model();
        let before: Vec<f32> = initial.backbone.clone().valid().forward(
            burn::tensor::Tensor::ones([1, 3, 32, 32], &Default::default()),
        )
        .into_data()
        .to_vec()
        .unwrap();
        let head_before: Vec<f32> = initial.head.output.weight.val().into_data().to_vec().unwrap();

        let output = trainer(1).fit(initial, &train, &validation, &mut checkpoints).unwrap();

        let after: Vec<f32> = output.model.backbone.clone().valid().forward(
            burn::tensor::Tensor::ones([1, 3, 32, 32], &Default::default()),
        )
        .into_data()
        .to_vec()
        .unwrap();
        let head_after: Vec<f32> = output.model.head.output.weight.val().into_data().to_vec().unwrap();

        assert_eq!(before, after);
        assert_ne!(head_before, head_after);
    }

    #[test]
    fn test_empty_partitions_rejected() {
        let dir = TempDir::new().unwrap();
        let train = prepared(&dir, DataSplit::Train, 0, true);
        let validation = prepared(&dir, DataSplit::Validation, 3, false);
        let mut checkpoints = CheckpointManager::new(dir.path().join("weights"));

        let result = trainer(1).fit(model(), &train, &validation, &mut checkpoints);
        assert!(matches!(result, Err(Error::Training(_))));
    }
}
