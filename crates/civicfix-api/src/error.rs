use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use civicfix_types::models::InvalidStatus;

/// Errors returned by the core operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Issue or notification absent
    #[error("not found")]
    NotFound,

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// Caller lacks the role or district scope for this operation
    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    InvalidInput(&'static str),

    /// The store could not commit. Every core operation is safe to retry.
    #[error("store unavailable: {0}")]
    TransientStoreFailure(#[from] anyhow::Error),
}

impl From<InvalidStatus> for ApiError {
    fn from(e: InvalidStatus) -> Self {
        ApiError::InvalidStatus(e.0)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidStatus(_) | ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::TransientStoreFailure(e) => {
                error!("Store failure: {:#}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let message = match &self {
            // Store details stay in the log.
            ApiError::TransientStoreFailure(_) => "temporarily unavailable, retry".to_string(),
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
