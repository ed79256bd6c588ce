//! Configuration structures for a training run.
//!
//! Every struct has a `Default` matching the reference run (MobileNetV2-style
//! backbone, 160x160 input, 20 epochs, seed 1234), so a TOML file only needs
//! to list the values it changes.

use crate::types::ImageDimensions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the workspace root
pub const WORKSPACE_DIR_ENV: &str = "WORKSPACE_DIR";

/// Workspace root used when the environment does not set one
pub const DEFAULT_WORKSPACE_DIR: &str = "/workspace";

/// Main configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model configuration
    pub model: ModelSettings,
    /// Training hyperparameters
    pub training: TrainingParams,
    /// Augmentation applied to the train partition
    pub augmentation: AugmentationConfig,
    /// Data configuration
    pub data: DataConfig,
    /// Filesystem layout
    pub paths: PathsConfig,
    /// What the run does
    pub run: RunFlags,
    /// Device configuration
    pub device: DeviceConfig,
    /// Root seed; every stochastic component derives from it
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            training: TrainingParams::default(),
            augmentation: AugmentationConfig::default(),
            data: DataConfig::default(),
            paths: PathsConfig::default(),
            run: RunFlags::default(),
            device: DeviceConfig::default(),
            seed: 1234,
        }
    }
}

impl PipelineConfig {
    /// Validates every section
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.training.validate()?;
        self.augmentation.validate()?;
        self.data.validate()?;
        Ok(())
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Artifact name, used for `models/<name>.mpk`
    pub name: String,
    /// Width multiplier of the backbone
    pub width_multiplier: f64,
    /// Units of the optional dense layer in the head
    pub dense_units: usize,
    /// Dropout after the dense layer; `None` removes the dense block entirely
    pub dropout: Option<f64>,
    /// Pretrained backbone record, relative to the workspace root
    pub pretrained_backbone: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: String::from("rock_paper_scissors"),
            width_multiplier: 1.0,
            dense_units: 1024,
            dropout: Some(0.4),
            pretrained_backbone: Some(PathBuf::from("pretrained/mobilenet_v2_imagenet.mpk")),
        }
    }
}

impl ModelSettings {
    /// Validates model settings
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(Error::Config(format!("invalid model name '{}'", self.name)));
        }
        if !(self.width_multiplier.is_finite() && self.width_multiplier > 0.0) {
            return Err(Error::Config(format!(
                "width multiplier must be positive, got {}",
                self.width_multiplier
            )));
        }
        if self.dense_units == 0 {
            return Err(Error::Config("dense_units must be greater than 0".into()));
        }
        if let Some(rate) = self.dropout {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::Config(format!("dropout must be in [0, 1), got {rate}")));
            }
        }
        Ok(())
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Number of training epochs
    pub epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Keep decoded samples in memory between epochs
    pub cache: bool,
    /// Number of batches prepared ahead of the consumer
    pub prefetch: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 64,
            learning_rate: 1e-3,
            cache: true,
            prefetch: 2,
        }
    }
}

impl TrainingParams {
    /// Validates training parameters
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Config("number of epochs must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be greater than 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config("learning rate must be positive".into()));
        }
        Ok(())
    }
}

/// Data augmentation configuration.
///
/// Each transform is either disabled (`None`) or carries its magnitude:
/// deltas for hue and brightness, `d` in `[1-d, 1+d]` for saturation and
/// contrast, degrees for rotation, fractions for crop, translate and zoom.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AugmentationConfig {
    pub flip_left_right: bool,
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub rotation: Option<f32>,
    pub saturation: Option<f32>,
    pub hue: Option<f32>,
    pub crop: Option<f32>,
    pub translate: Option<f32>,
    pub zoom: Option<f32>,
}

impl Default for AugmentationConfig {
    /// Magnitudes used for the training partition
    fn default() -> Self {
        Self {
            flip_left_right: true,
            brightness: Some(0.1),
            contrast: Some(0.1),
            rotation: Some(180.0),
            saturation: Some(0.1),
            hue: Some(0.05),
            crop: Some(0.05),
            translate: Some(0.05),
            zoom: Some(0.05),
        }
    }
}

impl AugmentationConfig {
    /// Moderate preset with 45 degree rotations and 10% geometric jitter
    pub fn moderate() -> Self {
        Self {
            flip_left_right: true,
            brightness: Some(0.1),
            contrast: Some(0.1),
            rotation: Some(45.0),
            saturation: Some(0.1),
            hue: Some(0.1),
            crop: Some(0.1),
            translate: Some(0.1),
            zoom: Some(0.1),
        }
    }

    /// Every transform switched off
    pub fn disabled() -> Self {
        Self {
            flip_left_right: false,
            brightness: None,
            contrast: None,
            rotation: None,
            saturation: None,
            hue: None,
            crop: None,
            translate: None,
            zoom: None,
        }
    }

    /// Validates magnitudes. A crop fraction of 1 or more would leave no pixels.
    pub fn validate(&self) -> Result<()> {
        let magnitudes = [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("rotation", self.rotation),
            ("saturation", self.saturation),
            ("hue", self.hue),
            ("crop", self.crop),
            ("translate", self.translate),
            ("zoom", self.zoom),
        ];
        for (name, value) in magnitudes {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::Config(format!(
                        "{name} magnitude must be finite and non-negative, got {v}"
                    )));
                }
            }
        }
        if let Some(crop) = self.crop {
            if crop >= 1.0 {
                return Err(Error::Config(format!(
                    "crop fraction must be below 1, got {crop}"
                )));
            }
        }
        if let Some(hue) = self.hue {
            if hue > 0.5 {
                return Err(Error::Config(format!("hue delta must be at most 0.5, got {hue}")));
            }
        }
        Ok(())
    }
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Collection name under `<workspace>/datasets/`
    pub dataset_name: String,
    /// Fraction of the train split held out for validation
    pub validation_proportion: f64,
    /// Model input size
    pub target_size: ImageDimensions,
    /// Rescale model input from [0,1] to [-1,1]
    pub normalize_m1_p1: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset_name: String::from("rock_paper_scissors"),
            validation_proportion: 0.15,
            target_size: ImageDimensions::default(),
            normalize_m1_p1: false,
        }
    }
}

impl DataConfig {
    /// Validates data configuration
    pub fn validate(&self) -> Result<()> {
        let p = self.validation_proportion;
        if !p.is_finite() || p <= 0.0 || p >= 1.0 {
            return Err(Error::Config(format!(
                "validation proportion must be in (0, 1), got {p}"
            )));
        }
        if self.target_size.height == 0 || self.target_size.width == 0 {
            return Err(Error::Config("target size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Filesystem layout, rooted at the workspace directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for models, datasets and pretrained weights
    pub workspace_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
        }
    }
}

impl PathsConfig {
    /// Creates a layout rooted at `workspace_dir`
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }

    /// Reads the workspace root from `WORKSPACE_DIR`, falling back to `/workspace`
    pub fn from_env() -> Self {
        std::env::var_os(WORKSPACE_DIR_ENV)
            .map(Self::new)
            .unwrap_or_default()
    }

    /// `<workspace>/models`
    pub fn models_dir(&self) -> PathBuf {
        self.workspace_dir.join("models")
    }

    /// `<workspace>/models/weights`
    pub fn weights_dir(&self) -> PathBuf {
        self.models_dir().join("weights")
    }

    /// `<workspace>/models/<name>.mpk`
    pub fn model_file(&self, name: &str) -> PathBuf {
        self.models_dir().join(format!("{name}.mpk"))
    }

    /// `<workspace>/models/history.json`
    pub fn history_file(&self) -> PathBuf {
        self.models_dir().join("history.json")
    }

    /// `<workspace>/models/<name>-saved_model`
    pub fn export_dir(&self, name: &str) -> PathBuf {
        self.models_dir().join(format!("{name}-saved_model"))
    }

    /// `<workspace>/datasets/<name>`
    pub fn dataset_dir(&self, name: &str) -> PathBuf {
        self.workspace_dir.join("datasets").join(name)
    }

    /// Resolves a path relative to the workspace root; absolute paths pass through
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_dir.join(path)
        }
    }
}

/// Run flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunFlags {
    /// Train a new model; when false, load and evaluate the persisted one
    pub run_training: bool,
    /// Export the serving artifact
    pub saved_model: bool,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            run_training: true,
            saved_model: true,
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Use an accelerator when one is detected
    pub prefer_gpu: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { prefer_gpu: true }
    }
}
