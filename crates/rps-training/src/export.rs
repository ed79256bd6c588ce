//! Serving export.
//!
//! `models/<name>-saved_model/` contains `model.mpk`, a full-precision
//! record of the reconciled model, and `signature.json`, which describes the
//! predict signature: input shape and range, class names and the model
//! configuration needed to rebuild the architecture.

use burn::{
    module::Module,
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::{backend::Backend, Tensor},
};
use rps_core::{Error, ImageDimensions, Result, CLASS_NAMES};
use rps_dataset::augmentation::{normalize_to_signed, to_chw};
use rps_dataset::{HwcInstance, ImagePreprocessor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::model::{RpsClassifier, RpsClassifierConfig};

/// Default signature name of the predict endpoint
pub const SIGNATURE_NAME: &str = "serving_default";

const SIGNATURE_FILE: &str = "signature.json";
const MODEL_FILE: &str = "model.mpk";

/// What the exported model expects and returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingSignature {
    pub signature_name: String,
    /// `[height, width, 3]`
    pub input_shape: [usize; 3],
    /// Pixel range of the instances sent by clients
    pub input_range: [f32; 2],
    /// Whether instances are rescaled to `[-1, 1]` before the forward pass
    pub normalize_m1_p1: bool,
    /// Output order of the probabilities
    pub class_names: Vec<String>,
    pub model: RpsClassifierConfig,
}

impl ServingSignature {
    pub fn new(model: RpsClassifierConfig, target_size: ImageDimensions, normalize_m1_p1: bool) -> Self {
        Self {
            signature_name: SIGNATURE_NAME.to_string(),
            input_shape: [target_size.height as usize, target_size.width as usize, 3],
            input_range: [0.0, 1.0],
            normalize_m1_p1,
            class_names: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            model,
        }
    }

    pub fn target_size(&self) -> ImageDimensions {
        ImageDimensions::new(self.input_shape[0] as u32, self.input_shape[1] as u32)
    }
}

/// Writes the export directory
pub fn export_saved_model<B: Backend>(
    model: &RpsClassifier<B>,
    signature: &ServingSignature,
    export_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(export_dir)?;

    let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(export_dir.join(MODEL_FILE), &recorder)
        .map_err(|e| Error::Model(format!("Failed to export model: {:?}", e)))?;

    let json = serde_json::to_string_pretty(signature)?;
    fs::write(export_dir.join(SIGNATURE_FILE), json)?;

    info!("Exported serving model to {}", export_dir.display());
    Ok(())
}

/// A loaded export, ready to answer predict requests
pub struct ExportedModel<B: Backend> {
    model: RpsClassifier<B>,
    signature: ServingSignature,
    preprocessor: ImagePreprocessor,
    device: B::Device,
}

impl<B: Backend> ExportedModel<B> {
    /// Loads `export_dir`
    pub fn load(export_dir: &Path, device: &B::Device) -> Result<Self> {
        let signature_path = export_dir.join(SIGNATURE_FILE);
        if !signature_path.exists() {
            return Err(Error::NotFound(format!(
                "serving export {}",
                export_dir.display()
            )));
        }
        let signature: ServingSignature = serde_json::from_str(&fs::read_to_string(&signature_path)?)?;

        let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
        let model = signature
            .model
            .init::<B>(device)
            .load_file(export_dir.join(MODEL_FILE), &recorder, device)
            .map_err(|e| Error::Model(format!("Failed to load exported model: {:?}", e)))?;

        Ok(Self {
            preprocessor: ImagePreprocessor::new(signature.target_size()),
            model,
            signature,
            device: device.clone(),
        })
    }

    pub fn signature(&self) -> &ServingSignature {
        &self.signature
    }

    /// Class probabilities for each `[H][W][3]` instance
    pub fn predict(&self, instances: &[HwcInstance]) -> Result<Vec<Vec<f32>>> {
        if instances.is_empty() {
            return Err(Error::InvalidArgument("no instances".into()));
        }

        let dims = self.signature.target_size();
        let mut values = Vec::with_capacity(instances.len() * 3 * dims.num_values());
        for instance in instances {
            let mut image = self.preprocessor.from_instance(instance)?;
            if self.signature.normalize_m1_p1 {
                image = normalize_to_signed(&image);
            }
            values.extend(to_chw(&image));
        }

        let images = Tensor::<B, 1>::from_floats(values.as_slice(), &self.device).reshape([
            instances.len(),
            3,
            dims.height as usize,
            dims.width as usize,
        ]);
        let probabilities: Vec<f32> = self
            .model
            .forward_softmax(images)
            .into_data()
            .iter::<f32>()
            .collect();

        Ok(probabilities
            .chunks(self.signature.class_names.len())
            .map(<[f32]>::to_vec)
            .collect())
    }
}
