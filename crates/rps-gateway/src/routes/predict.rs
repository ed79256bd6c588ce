//! Gateway endpoint: `POST /predict` with `{"url": "<image-url>"}`.
//!
//! The image is fetched, resized to the configured size, scaled to `[0, 1]`
//! and forwarded to the serving endpoint. The most probable class is
//! returned with its probability formatted to three decimals.

use axum::{extract::State, Json};
use rps_core::{HandGesture, NUM_CLASSES};
use rps_dataset::{HwcInstance, ImagePreprocessor};
use rps_training::export::SIGNATURE_NAME;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};
use crate::routes::serving::{PredictRequest, PredictResponse};
use crate::state::SharedGatewayState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrlRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayPrediction {
    pub predicted_class: String,
    pub predicted_prob: String,
}

/// POST /predict
pub async fn predict(
    State(state): State<SharedGatewayState>,
    Json(request): Json<ImageUrlRequest>,
) -> GatewayResult<Json<GatewayPrediction>> {
    info!("url: {}", request.url);

    let instance = fetch_instance(&state, &request.url).await?;
    let body = PredictRequest {
        signature_name: Some(SIGNATURE_NAME.to_string()),
        instances: vec![instance],
    };

    let response = state
        .client
        .post(&state.config.serving_url)
        .json(&body)
        .send()
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::Upstream(format!(
            "{} returned {}",
            state.config.serving_url, status
        )));
    }
    let predictions: PredictResponse = response
        .json()
        .await
        .map_err(|e| GatewayError::Upstream(format!("malformed predictions: {e}")))?;

    let probabilities = predictions
        .predictions
        .first()
        .ok_or_else(|| GatewayError::Upstream("empty predictions".into()))?;
    let prediction = interpret(probabilities)?;
    debug!(
        "Predicted label: {}, {}",
        prediction.predicted_class, prediction.predicted_prob
    );

    Ok(Json(prediction))
}

/// Fetches `url` and turns it into one serving instance
async fn fetch_instance(state: &SharedGatewayState, url: &str) -> GatewayResult<HwcInstance> {
    let response = state
        .client
        .get(url)
        .send()
        .await
        .map_err(|e| GatewayError::ImageFetch(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::ImageFetch(format!("{url} returned {status}")));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::ImageFetch(e.to_string()))?;

    let image = ImagePreprocessor::new(state.config.target_size)
        .preprocess_bytes(&bytes)
        .map_err(|e| GatewayError::ImageFetch(e.to_string()))?;
    Ok(ImagePreprocessor::to_instance(&image))
}

/// Maps a probability row to the most probable class; the first maximum wins
pub fn interpret(probabilities: &[f32]) -> GatewayResult<GatewayPrediction> {
    if probabilities.len() != NUM_CLASSES {
        return Err(GatewayError::Upstream(format!(
            "expected {} probabilities, got {}",
            NUM_CLASSES,
            probabilities.len()
        )));
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(GatewayError::Upstream("non-finite probability".into()));
    }

    let (index, probability) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, probabilities[0]), |best, (i, p)| if p > best.1 { (i, p) } else { best });
    let gesture = HandGesture::from_index(index).map_err(GatewayError::from)?;

    Ok(GatewayPrediction {
        predicted_class: gesture.name().to_string(),
        predicted_prob: format!("{probability:.3}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_formats_three_decimals() {
        let prediction = interpret(&[0.1, 0.7, 0.2]).unwrap();
        assert_eq!(prediction.predicted_class, "paper");
        assert_eq!(prediction.predicted_prob, "0.700");

        let prediction = interpret(&[0.98765, 0.01, 0.00235]).unwrap();
        assert_eq!(prediction.predicted_class, "rock");
        assert_eq!(prediction.predicted_prob, "0.988");
    }

    #[test]
    fn test_interpret_first_maximum_wins() {
        let prediction = interpret(&[0.2, 0.4, 0.4]).unwrap();
        assert_eq!(prediction.predicted_class, "paper");
    }

    #[test]
    fn test_interpret_rejects_malformed_rows() {
        assert!(matches!(interpret(&[0.5, 0.5]), Err(GatewayError::Upstream(_))));
        assert!(matches!(interpret(&[f32::NAN, 0.5, 0.5]), Err(GatewayError::Upstream(_))));
    }
}
