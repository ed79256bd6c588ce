//! HTTP error mapping.
//!
//! Every failure becomes a JSON body `{"error": "..."}` with a status code.
//! Problems with an upstream (the image host or the serving endpoint) are
//! reported as `502 Bad Gateway` and nothing is forwarded.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Error body returned by both binaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The image URL could not be fetched or decoded
    #[error("image fetch failed: {0}")]
    ImageFetch(String),

    /// The serving endpoint failed or answered with something unusable
    #[error("serving endpoint failed: {0}")]
    Upstream(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ImageFetch(_) | GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rps_core::Error> for GatewayError {
    fn from(err: rps_core::Error) -> Self {
        match err {
            rps_core::Error::InvalidArgument(msg) => GatewayError::BadRequest(msg),
            rps_core::Error::NotFound(msg) => GatewayError::NotFound(msg),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!("{} {}", status, self);
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
