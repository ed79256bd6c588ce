//! One end-to-end run: partition, prepare, fit, reconcile, persist, evaluate.
//!
//! With `run_training` the `models/` directory is cleared once the partitions
//! and the initial model are ready, then the head is fit
//! with per-epoch checkpoints, the best checkpoint is chosen from the
//! manifest records and persisted as `models/<name>.mpk`. Without it the
//! persisted model is loaded as-is. Either way the test partition is
//! evaluated and, with `saved_model`, the serving export is written.

use burn::{
    module::{AutodiffModule, Module},
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use rps_core::{Error, PipelineConfig, Result, TrainingHistory};
use rps_dataset::{
    prepare_for_training, Collection, Partitioner, PrepareOptions, PreparedDataset, Processing,
};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::checkpoint::{load_weights, Checkpoint, CheckpointManager};
use crate::evaluator::{log_evaluation, EvaluationResult, Evaluator};
use crate::export::{export_saved_model, ServingSignature};
use crate::model::{RpsClassifier, RpsClassifierConfig};
use crate::trainer::{Trainer, TrainerConfig};

/// Prepared streams for the three partitions
#[derive(Clone)]
pub struct PreparedPartitions {
    pub train: PreparedDataset,
    pub validation: PreparedDataset,
    pub test: PreparedDataset,
}

/// Splits `collection` and prepares every partition the way a run does
pub fn prepare_partitions(config: &PipelineConfig, collection: &Collection) -> Result<PreparedPartitions> {
    let processing = Processing::new(config.augmentation.clone())?;
    let partitions = Partitioner::new(config.data.validation_proportion)?.split(collection)?;

    let training = PrepareOptions::training(config);
    let evaluation = PrepareOptions::evaluation(config);

    Ok(PreparedPartitions {
        train: prepare_for_training(&partitions.train, &processing, config.seed, training)?,
        validation: prepare_for_training(&partitions.validation, &processing, config.seed, evaluation)?,
        test: prepare_for_training(&partitions.test, &processing, config.seed, evaluation)?,
    })
}

/// What a run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Per-epoch history, when the run trained
    pub history: Option<TrainingHistory>,
    /// Checkpoint the persisted model was taken from
    pub best_checkpoint: Option<Checkpoint>,
    /// Test evaluation of the final-epoch weights
    pub final_epoch_test: Option<EvaluationResult>,
    /// Test evaluation of the persisted model
    pub test: EvaluationResult,
    pub model_path: PathBuf,
    pub export_dir: Option<PathBuf>,
}

/// Drives a run on the autodiff backend `B`
pub struct Orchestrator<B: AutodiffBackend> {
    config: PipelineConfig,
    device: B::Device,
    progress: bool,
}

impl<B: AutodiffBackend> Orchestrator<B> {
    pub fn new(config: PipelineConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            progress: true,
        })
    }

    /// Enables or disables per-epoch progress bars
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Loads the configured collection from the workspace and runs
    pub fn run(&self) -> Result<RunSummary> {
        let dataset_dir = self.config.paths.dataset_dir(&self.config.data.dataset_name);
        let collection = Collection::load(&dataset_dir, self.config.seed)?;
        self.run_with_collection(&collection)
    }

    /// Runs on an already listed collection
    pub fn run_with_collection(&self, collection: &Collection) -> Result<RunSummary> {
        let config = &self.config;
        let paths = &config.paths;
        let model_config = RpsClassifierConfig::from_settings(&config.model, config.seed);
        let model_path = paths.model_file(&config.model.name);

        let prepared = prepare_partitions(config, collection)?;
        info!(
            "Partitions: {} train, {} validation, {} test",
            prepared.train.len(),
            prepared.validation.len(),
            prepared.test.len()
        );

        let evaluator = Evaluator::<B::InnerBackend>::new(self.device.clone());
        let mut history = None;
        let mut best_checkpoint = None;
        let mut final_epoch_test = None;

        if config.run.run_training {
            if prepared.train.is_empty() || prepared.validation.is_empty() {
                return Err(Error::Training(format!(
                    "cannot train with {} train and {} validation samples",
                    prepared.train.len(),
                    prepared.validation.len()
                )));
            }
            let model = self.init_model(&model_config)?;
            self.clear_models_dir()?;

            let mut checkpoints = CheckpointManager::new(paths.weights_dir());
            let trainer_config = TrainerConfig {
                progress: self.progress,
                ..TrainerConfig::from(&config.training)
            };
            let trainer = Trainer::<B>::new(trainer_config, self.device.clone());
            let fit = trainer.fit(model, &prepared.train, &prepared.validation, &mut checkpoints)?;

            log_evaluation("Validation after final epoch", &fit.last_validation);
            let final_epoch = evaluator.evaluate(&fit.model.valid(), &prepared.test)?;
            log_evaluation("Performance on test split, after final epoch", &final_epoch);

            let best = checkpoints.best()?.clone();
            info!(
                "Best checkpoint: epoch {} with val_accuracy {:.4} ({})",
                best.epoch, best.val_accuracy, best.file_name
            );
            let reconciled = load_weights::<B::InnerBackend>(
                &model_config,
                &checkpoints.path_of(&best),
                &self.device,
            )?;
            reconciled
                .save_file(model_path.clone(), &CompactRecorder::new())
                .map_err(|e| Error::Model(format!("Failed to save {}: {:?}", model_path.display(), e)))?;
            info!("Saved model to {}", model_path.display());

            fs::write(paths.history_file(), serde_json::to_string_pretty(&fit.history)?)?;

            history = Some(fit.history);
            best_checkpoint = Some(best);
            final_epoch_test = Some(final_epoch);
        }

        let model = load_weights::<B::InnerBackend>(&model_config, &model_path, &self.device)?;
        let test = evaluator.evaluate(&model, &prepared.test)?;
        log_evaluation("Performance on test split, best epoch", &test);

        let export_dir = if config.run.saved_model {
            let export_dir = paths.export_dir(&config.model.name);
            let signature = ServingSignature::new(
                model_config,
                config.data.target_size,
                config.data.normalize_m1_p1,
            );
            export_saved_model(&model, &signature, &export_dir)?;
            Some(export_dir)
        } else {
            None
        };

        Ok(RunSummary {
            history,
            best_checkpoint,
            final_epoch_test,
            test,
            model_path,
            export_dir,
        })
    }

    /// Seeded model, with the pretrained backbone when its record exists
    fn init_model(&self, model_config: &RpsClassifierConfig) -> Result<RpsClassifier<B>> {
        let model = model_config.init::<B>(&self.device);
        let Some(pretrained) = &self.config.model.pretrained_backbone else {
            return Ok(model);
        };

        let path = self.config.paths.resolve(pretrained);
        if path.exists() {
            info!("Loading pretrained backbone from {}", path.display());
            model.with_pretrained_backbone(&path, &self.device)
        } else {
            warn!(
                "Pretrained backbone {} not found, using seeded initialization",
                path.display()
            );
            Ok(model)
        }
    }

    fn clear_models_dir(&self) -> Result<()> {
        let models_dir = self.config.paths.models_dir();
        match fs::remove_dir_all(&models_dir) {
            Ok(()) => info!("Cleared {}", models_dir.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&models_dir)?;
        Ok(())
    }
}
