//! Transfer learning for the rock/paper/scissors classifier.
//!
//! This crate provides:
//! - The MobileNetV2-style backbone and the trainable classifier head
//! - The fit loop with per-epoch checkpoints
//! - Evaluation with confusion matrices
//! - The run orchestrator and the serving export

pub mod model;
pub mod data;
pub mod trainer;
pub mod evaluator;
pub mod checkpoint;
pub mod export;
pub mod orchestrator;

pub use model::{RpsClassifier, RpsClassifierConfig};
pub use data::{RpsBatch, RpsBatcher};
pub use trainer::{FitOutput, Trainer, TrainerConfig};
pub use evaluator::{log_evaluation, EvaluationResult, Evaluator};
pub use checkpoint::{load_weights, select_best, Checkpoint, CheckpointManager};
pub use export::{export_saved_model, ExportedModel, ServingSignature};
pub use orchestrator::{prepare_partitions, Orchestrator, PreparedPartitions, RunSummary};

/// Re-export commonly used types
pub mod prelude {
    pub use super::model::{RpsClassifier, RpsClassifierConfig};
    pub use super::trainer::{Trainer, TrainerConfig};
    pub use super::evaluator::{EvaluationResult, Evaluator};
    pub use super::checkpoint::{Checkpoint, CheckpointManager};
    pub use super::orchestrator::{Orchestrator, RunSummary};
}
