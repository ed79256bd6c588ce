//! Shared state for the gateway and serving routers.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use burn::tensor::backend::Backend;
use rps_core::{ImageDimensions, Result};
use rps_dataset::HwcInstance;
use rps_training::{ExportedModel, ServingSignature};
use serde::{Deserialize, Serialize};

/// Serving endpoint the gateway forwards to when none is configured
pub const DEFAULT_SERVING_URL: &str =
    "http://tf-serving:8501/v1/models/rock_paper_scissors:predict";

/// Gateway configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Full predict URL of the serving endpoint
    pub serving_url: String,
    /// Size images are resized to before forwarding
    pub target_size: ImageDimensions,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            serving_url: DEFAULT_SERVING_URL.to_string(),
            target_size: ImageDimensions::square(160),
        }
    }
}

/// Gateway state: configuration plus one pooled HTTP client
pub struct GatewayState {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
    started_at: Instant,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedGatewayState = Arc<GatewayState>;

/// Something that answers predict requests
pub trait Predictor {
    fn signature(&self) -> &ServingSignature;

    /// One probability row per instance
    fn predict(&self, instances: &[HwcInstance]) -> Result<Vec<Vec<f32>>>;
}

impl<B: Backend> Predictor for ExportedModel<B> {
    fn signature(&self) -> &ServingSignature {
        ExportedModel::signature(self)
    }

    fn predict(&self, instances: &[HwcInstance]) -> Result<Vec<Vec<f32>>> {
        ExportedModel::predict(self, instances)
    }
}

/// Serving state: the model name in the URL and the loaded predictor
pub struct ServingState {
    pub model_name: String,
    pub predictor: Mutex<Box<dyn Predictor + Send>>,
    started_at: Instant,
}

impl ServingState {
    pub fn new(model_name: impl Into<String>, predictor: Box<dyn Predictor + Send>) -> Self {
        Self {
            model_name: model_name.into(),
            predictor: Mutex::new(predictor),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedServingState = Arc<ServingState>;
