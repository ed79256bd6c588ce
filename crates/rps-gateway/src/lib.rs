//! HTTP front ends for the rock/paper/scissors classifier.
//!
//! The `serve` binary answers `POST /v1/models/<name>:predict` from a
//! serving export. The `gateway` binary takes an image URL, prepares the
//! image and asks the serving endpoint for class probabilities.

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{ErrorBody, GatewayError, GatewayResult};
pub use routes::predict::{interpret, GatewayPrediction, ImageUrlRequest};
pub use routes::serving::{PredictRequest, PredictResponse};
pub use state::{
    GatewayConfig, GatewayState, Predictor, ServingState, SharedGatewayState, SharedServingState,
    DEFAULT_SERVING_URL,
};

/// Router of the gateway binary
pub fn gateway_router(state: SharedGatewayState) -> Router {
    Router::new()
        .route("/health", get(routes::health::gateway_health))
        .route("/predict", post(routes::predict::predict))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Router of the serve binary
pub fn serving_router(state: SharedServingState) -> Router {
    Router::new()
        .route("/health", get(routes::health::serving_health))
        .route(
            "/v1/models/:model",
            get(routes::serving::model_status).post(routes::serving::predict),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::IntoResponse,
    };
    use burn_ndarray::NdArray;
    use image::{ImageFormat, Rgb, RgbImage};
    use rps_core::{ImageDimensions, Result};
    use rps_dataset::HwcInstance;
    use rps_training::{export_saved_model, ExportedModel, RpsClassifierConfig, ServingSignature};
    use serde::de::DeserializeOwned;
    use std::io::Cursor;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    /// Returns the same row for every instance
    struct FixedPredictor {
        signature: ServingSignature,
        row: Vec<f32>,
    }

    impl Predictor for FixedPredictor {
        fn signature(&self) -> &ServingSignature {
            &self.signature
        }

        fn predict(&self, instances: &[HwcInstance]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![self.row.clone(); instances.len()])
        }
    }

    fn fixed_state(row: Vec<f32>) -> SharedServingState {
        let signature = ServingSignature::new(RpsClassifierConfig::new(), ImageDimensions::square(8), false);
        Arc::new(ServingState::new("rps", Box::new(FixedPredictor { signature, row })))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(20, 12, Rgb([120, 30, 200]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Image host plus serving endpoint on an ephemeral port
    async fn spawn_upstream(row: Vec<f32>) -> SocketAddr {
        let png = png_bytes();
        let app = Router::new()
            .route(
                "/image.png",
                get(move || {
                    let png = png.clone();
                    async move { png }
                }),
            )
            .route("/garbage.png", get(|| async { "not an image" }))
            .route(
                "/missing.png",
                get(|| async { StatusCode::NOT_FOUND.into_response() }),
            )
            .merge(serving_router(fixed_state(row)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn gateway(serving_url: String) -> Router {
        let config = GatewayConfig {
            serving_url,
            target_size: ImageDimensions::square(8),
        };
        gateway_router(Arc::new(GatewayState::new(config)))
    }

    #[tokio::test]
    async fn test_serving_predict() {
        let app = serving_router(fixed_state(vec![0.2, 0.3, 0.5]));
        let body = serde_json::json!({
            "signature_name": "serving_default",
            "instances": [vec![vec![[0.5f32; 3]; 8]; 8]],
        });

        let response = app
            .oneshot(json_request("POST", "/v1/models/rps:predict", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response: PredictResponse = read_json(response).await;
        assert_eq!(response.predictions, vec![vec![0.2, 0.3, 0.5]]);
    }

    #[tokio::test]
    async fn test_serving_rejects_unknown_model_and_signature() {
        let app = serving_router(fixed_state(vec![0.2, 0.3, 0.5]));
        let instances = vec![vec![vec![[0.5f32; 3]; 8]; 8]];

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/models/other:predict",
                serde_json::json!({ "instances": instances }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(json_request(
                "POST",
                "/v1/models/rps:predict",
                serde_json::json!({ "signature_name": "other", "instances": instances }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = read_json(response).await;
        assert!(body.error.contains("other"));
    }

    #[tokio::test]
    async fn test_serving_exported_model() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = RpsClassifierConfig::new()
            .with_width_multiplier(0.25)
            .with_dense_units(8)
            .with_dropout(Some(0.4));
        let model = config.init::<NdArray>(&device);
        let signature = ServingSignature::new(config, ImageDimensions::square(32), false);
        export_saved_model(&model, &signature, dir.path()).unwrap();

        let exported = ExportedModel::<NdArray>::load(dir.path(), &device).unwrap();
        let app = serving_router(Arc::new(ServingState::new("rps", Box::new(exported))));

        let status = app
            .clone()
            .oneshot(Request::get("/v1/models/rps").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);

        let body = serde_json::json!({ "instances": [vec![vec![[0.25f32; 3]; 32]; 32]] });
        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/models/rps:predict", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response: PredictResponse = read_json(response).await;
        assert_eq!(response.predictions.len(), 1);
        assert!((response.predictions[0].iter().sum::<f32>() - 1.0).abs() < 1e-4);

        // Wrong instance size is a client error
        let body = serde_json::json!({ "instances": [vec![vec![[0.25f32; 3]; 16]; 16]] });
        let response = app
            .oneshot(json_request("POST", "/v1/models/rps:predict", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_gateway_predicts_class() {
        let addr = spawn_upstream(vec![0.1, 0.2, 0.7]).await;
        let app = gateway(format!("http://{addr}/v1/models/rps:predict"));

        let response = app
            .oneshot(json_request(
                "POST",
                "/predict",
                serde_json::json!({ "url": format!("http://{addr}/image.png") }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let prediction: GatewayPrediction = read_json(response).await;
        assert_eq!(prediction.predicted_class, "scissors");
        assert_eq!(prediction.predicted_prob, "0.700");
    }

    #[tokio::test]
    async fn test_gateway_image_fetch_failures_are_bad_gateway() {
        let addr = spawn_upstream(vec![0.1, 0.2, 0.7]).await;
        let app = gateway(format!("http://{addr}/v1/models/rps:predict"));

        for path in ["missing.png", "garbage.png"] {
            let response = app
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/predict",
                    serde_json::json!({ "url": format!("http://{addr}/{path}") }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "{path}");
            let body: ErrorBody = read_json(response).await;
            assert!(body.error.starts_with("image fetch failed"));
        }
    }

    #[tokio::test]
    async fn test_gateway_serving_failures_are_bad_gateway() {
        // Serving answers with the wrong number of classes
        let addr = spawn_upstream(vec![0.5, 0.5]).await;
        let app = gateway(format!("http://{addr}/v1/models/rps:predict"));
        let request = serde_json::json!({ "url": format!("http://{addr}/image.png") });

        let response = app
            .oneshot(json_request("POST", "/predict", request.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        // Serving endpoint for a model that does not exist
        let app = gateway(format!("http://{addr}/v1/models/unknown:predict"));
        let response = app
            .oneshot(json_request("POST", "/predict", request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: ErrorBody = read_json(response).await;
        assert!(body.error.starts_with("serving endpoint failed"));
    }

    #[tokio::test]
    async fn test_health() {
        let app = gateway(DEFAULT_SERVING_URL.to_string());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
