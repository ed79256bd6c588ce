//! Per-epoch weight snapshots.
//!
//! A snapshot is written only when validation accuracy strictly improves on
//! every earlier epoch of the run. Files are named
//! `model_<timestamp>-<epoch:02>-<accuracy:.4>.mpk` for humans; selection
//! never parses them. Each saved snapshot is recorded in `manifest.json`
//! next to the weights, and the best one is chosen numerically from those
//! records.

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use chrono::Local;
use rps_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::model::{RpsClassifier, RpsClassifierConfig};

/// Manifest file name inside the weights directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Weight file extension used by [`CompactRecorder`]
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// One saved snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// 1-based epoch
    pub epoch: usize,
    pub val_accuracy: f64,
    /// File name inside the weights directory
    pub file_name: String,
    pub timestamp: String,
}

impl Checkpoint {
    pub fn new(epoch: usize, val_accuracy: f64, timestamp: impl Into<String>) -> Self {
        let timestamp = timestamp.into();
        let file_name = format!(
            "model_{timestamp}-{epoch:02}-{val_accuracy:.4}.{WEIGHTS_EXTENSION}"
        );
        Self {
            epoch,
            val_accuracy,
            file_name,
            timestamp,
        }
    }

    /// Orders by accuracy, then by epoch so that ties go to the later epoch
    fn rank(&self, other: &Self) -> Ordering {
        self.val_accuracy
            .partial_cmp(&other.val_accuracy)
            .unwrap_or(Ordering::Equal)
            .then(self.epoch.cmp(&other.epoch))
    }
}

/// The best snapshot: highest accuracy, latest epoch on ties
pub fn select_best(checkpoints: &[Checkpoint]) -> Result<&Checkpoint> {
    checkpoints
        .iter()
        .max_by(|a, b| a.rank(b))
        .ok_or_else(|| Error::NotFound("no checkpoints produced".into()))
}

/// Writes improving snapshots and keeps the manifest current
pub struct CheckpointManager {
    weights_dir: PathBuf,
    run_timestamp: String,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointManager {
    /// Manager for `weights_dir`; all snapshots of the run share one timestamp
    pub fn new(weights_dir: PathBuf) -> Self {
        Self {
            weights_dir,
            run_timestamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            checkpoints: Vec::new(),
        }
    }

    /// Overrides the run timestamp used in file names
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.run_timestamp = timestamp.into();
        self
    }

    pub fn weights_dir(&self) -> &Path {
        &self.weights_dir
    }

    /// Snapshots saved so far, oldest first
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Best accuracy saved so far
    pub fn best_accuracy(&self) -> Option<f64> {
        self.checkpoints.iter().map(|c| c.val_accuracy).reduce(f64::max)
    }

    /// Whether `val_accuracy` beats every earlier epoch
    pub fn is_improvement(&self, val_accuracy: f64) -> bool {
        self.best_accuracy().map_or(true, |best| val_accuracy > best)
    }

    /// Absolute path of a snapshot's weights
    pub fn path_of(&self, checkpoint: &Checkpoint) -> PathBuf {
        self.weights_dir.join(&checkpoint.file_name)
    }

    /// Saves `model` if `val_accuracy` improved; returns the new record
    pub fn save_if_improved<B: Backend>(
        &mut self,
        model: &RpsClassifier<B>,
        epoch: usize,
        val_accuracy: f64,
    ) -> Result<Option<Checkpoint>> {
        if !self.is_improvement(val_accuracy) {
            debug!(
                "Epoch {}: val_accuracy {:.4} did not improve on {:.4}",
                epoch,
                val_accuracy,
                self.best_accuracy().unwrap_or_default()
            );
            return Ok(None);
        }

        fs::create_dir_all(&self.weights_dir)?;
        let checkpoint = Checkpoint::new(epoch, val_accuracy, self.run_timestamp.clone());
        let path = self.path_of(&checkpoint);

        model
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .map_err(|e| Error::Model(format!("Failed to save checkpoint {:?}: {:?}", path, e)))?;

        self.checkpoints.push(checkpoint.clone());
        self.write_manifest()?;

        info!(
            "Epoch {}: val_accuracy improved to {:.4}, saved {}",
            epoch,
            val_accuracy,
            checkpoint.file_name
        );
        Ok(Some(checkpoint))
    }

    /// Best snapshot of this run
    pub fn best(&self) -> Result<&Checkpoint> {
        select_best(&self.checkpoints)
    }

    fn write_manifest(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.checkpoints)?;
        fs::write(self.weights_dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Reads the manifest of `weights_dir`; a missing manifest is empty
    pub fn read_manifest(weights_dir: &Path) -> Result<Vec<Checkpoint>> {
        let path = weights_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Loads weights saved with [`CompactRecorder`] into a model built from `config`
pub fn load_weights<B: Backend>(
    config: &RpsClassifierConfig,
    path: &Path,
    device: &B::Device,
) -> Result<RpsClassifier<B>> {
    if !path.exists() {
        return Err(Error::NotFound(format!("model weights {}", path.display())));
    }
    config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| Error::Model(format!("Failed to load weights {}: {:?}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn config(seed: u64) -> RpsClassifierConfig {
        RpsClassifierConfig::new()
            .with_width_multiplier(0.25)
            .with_dense_units(8)
            .with_dropout(Some(0.4))
            .with_seed(seed)
    }

    fn record(epoch: usize, acc: f64, timestamp: &str) -> Checkpoint {
        Checkpoint::new(epoch, acc, timestamp)
    }

    #[test]
    fn test_file_name_encoding() {
        let checkpoint = record(3, 0.95, "20240101_120000");
        assert_eq!(checkpoint.file_name, "model_20240101_120000-03-0.9500.mpk");
    }

    #[test]
    fn test_select_best_is_numeric() {
        // Timestamps sort opposite to accuracy; selection must ignore them
        let checkpoints = vec![
            record(1, 0.85, "20240103_000000"),
            record(2, 0.9, "20240102_000000"),
            record(3, 0.875, "20240101_000000"),
        ];
        assert_eq!(select_best(&checkpoints).unwrap().epoch, 2);
    }

    #[test]
    fn test_select_best_tie_goes_to_latest_epoch() {
        let checkpoints = vec![record(4, 0.9, "a"), record(7, 0.9, "a"), record(5, 0.9, "a")];
        assert_eq!(select_best(&checkpoints).unwrap().epoch, 7);
    }

    #[test]
    fn test_select_best_empty() {
        assert!(matches!(select_best(&[]), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_saves_only_strict_improvements() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = config(1).init::<TestBackend>(&device);
        let mut manager =
            CheckpointManager::new(dir.path().join("weights")).with_timestamp("20240101_000000");

        assert!(manager.save_if_improved(&model, 1, 0.5)?.is_some());
        assert!(manager.save_if_improved(&model, 2, 0.4)?.is_none());
        assert!(manager.save_if_improved(&model, 3, 0.7)?.is_some());
        assert!(manager.save_if_improved(&model, 4, 0.7)?.is_none());

        assert_eq!(manager.checkpoints().len(), 2);
        for checkpoint in manager.checkpoints() {
            assert!(manager.path_of(checkpoint).exists());
        }
        assert_eq!(manager.best()?.epoch, 3);
        assert_eq!(manager.best()?.file_name, "model_20240101_000000-03-0.7000.mpk");

        let manifest = CheckpointManager::read_manifest(manager.weights_dir())?;
        assert_eq!(manifest, manager.checkpoints());
        Ok(())
    }

    #[test]
    fn test_non_increasing_accuracy_keeps_one_checkpoint() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let model = config(1).init::<TestBackend>(&device);
        let mut manager = CheckpointManager::new(dir.path().join("weights"));

        for (epoch, acc) in [(1, 0.6), (2, 0.6), (3, 0.5), (4, 0.4)] {
            manager.save_if_improved(&model, epoch, acc)?;
        }

        let weight_files = std::fs::read_dir(manager.weights_dir())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "mpk"))
            .count();
        assert_eq!(weight_files, 1);

        let manifest = CheckpointManager::read_manifest(manager.weights_dir())?;
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].epoch, 1);
        assert_eq!(manager.best()?.epoch, 1);
        Ok(())
    }

    #[test]
    fn test_missing_manifest_is_empty() -> Result<()> {
        let dir = TempDir::new().unwrap();
        assert!(CheckpointManager::read_manifest(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_reload_restores_weights() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let trained = config(1).init::<TestBackend>(&device);
        let mut manager = CheckpointManager::new(dir.path().to_path_buf());
        let checkpoint = manager
            .save_if_improved(&trained, 1, 0.8)?
            .ok_or_else(|| Error::Other("not saved".into()))?;

        // Different seed, same architecture
        let restored = load_weights::<TestBackend>(&config(9), &manager.path_of(&checkpoint), &device)?;

        let a: Vec<f32> = trained.head.output.weight.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = restored.head.output.weight.val().into_data().to_vec().unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            // Half-precision records
            assert!((x - y).abs() < 1e-3, "{x} vs {y}");
        }
        Ok(())
    }

    #[test]
    fn test_load_missing_weights() {
        let device = Default::default();
        let result = load_weights::<TestBackend>(&config(1), Path::new("/nonexistent/model.mpk"), &device);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
