//! Health check endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::{SharedGatewayState, SharedServingState};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
}

impl HealthResponse {
    fn ok(uptime_seconds: u64) -> Self {
        Self {
            status: "ok".to_string(),
            uptime_seconds,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// GET /health on the gateway
pub async fn gateway_health(State(state): State<SharedGatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(state.uptime_seconds()))
}

/// GET /health on the serving endpoint
pub async fn serving_health(State(state): State<SharedServingState>) -> Json<HealthResponse> {
    Json(HealthResponse::ok(state.uptime_seconds()))
}
