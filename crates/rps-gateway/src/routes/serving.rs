//! Serving endpoint: `POST /v1/models/<name>:predict`
//!
//! The path segment after `/v1/models/` carries both the model name and the
//! method, so it is captured whole and split on the last `:`.

use axum::{
    extract::{Path, State},
    Json,
};
use rps_dataset::HwcInstance;
use rps_training::ServingSignature;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::state::SharedServingState;

/// Predict request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_name: Option<String>,
    /// `[N][H][W][3]`, values in `[0, 1]`
    pub instances: Vec<HwcInstance>,
}

/// Predict response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    /// One probability row per instance, in class-index order
    pub predictions: Vec<Vec<f32>>,
}

/// Model status body
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_name: String,
    pub signature: ServingSignature,
}

fn check_model(state: &SharedServingState, name: &str) -> GatewayResult<()> {
    if name != state.model_name {
        return Err(GatewayError::NotFound(format!("model '{name}'")));
    }
    Ok(())
}

/// GET /v1/models/:model
pub async fn model_status(
    State(state): State<SharedServingState>,
    Path(model): Path<String>,
) -> GatewayResult<Json<ModelStatus>> {
    check_model(&state, &model)?;
    let predictor = state
        .predictor
        .lock()
        .map_err(|_| GatewayError::Internal("predictor lock poisoned".into()))?;
    Ok(Json(ModelStatus {
        model_name: state.model_name.clone(),
        signature: predictor.signature().clone(),
    }))
}

/// POST /v1/models/:model where `model` is `<name>:predict`
pub async fn predict(
    State(state): State<SharedServingState>,
    Path(target): Path<String>,
    Json(request): Json<PredictRequest>,
) -> GatewayResult<Json<PredictResponse>> {
    let (name, method) = target
        .rsplit_once(':')
        .ok_or_else(|| GatewayError::NotFound(format!("method on '{target}'")))?;
    if method != "predict" {
        return Err(GatewayError::NotFound(format!("method '{method}'")));
    }
    check_model(&state, name)?;
    debug!("Predicting {} instances", request.instances.len());

    let predictions = tokio::task::spawn_blocking(move || {
        let predictor = state
            .predictor
            .lock()
            .map_err(|_| GatewayError::Internal("predictor lock poisoned".into()))?;

        if let Some(signature_name) = &request.signature_name {
            let expected = &predictor.signature().signature_name;
            if signature_name != expected {
                return Err(GatewayError::BadRequest(format!(
                    "unknown signature '{signature_name}', expected '{expected}'"
                )));
            }
        }
        predictor.predict(&request.instances).map_err(GatewayError::from)
    })
    .await
    .map_err(|e| GatewayError::Internal(e.to_string()))??;

    Ok(Json(PredictResponse { predictions }))
}
