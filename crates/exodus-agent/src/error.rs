use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use exodus_scheduler::SchedulerError;
use exodus_store::StoreError;

use crate::vsphere::VSphereError;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collection already in progress")]
    CollectionInProgress,

    #[error(transparent)]
    VSphere(#[from] VSphereError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl CollectorError {
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, CollectorError::VSphere(VSphereError::InvalidCredentials))
    }
}

/// Error surface of the REST adapter.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::CollectionInProgress => {
                ApiError::Conflict("collection already in progress".to_string())
            }
            ref e if e.is_invalid_credentials() => {
                ApiError::Unauthorized("invalid vCenter credentials".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
