//! The error type returned from every handler, directly grounded on
//! `agent::api::error::ApiError`: an HTTP status paired with an
//! `anyhow::Error`, rendered as `{"status": ..., "error": "..."}`. Trimmed of
//! the teacher's `aide`/`schemars` OpenAPI-schema machinery, since this admin
//! surface is not introspected (spec.md §6.1 is the only documentation of
//! it).

use axum::http::StatusCode;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
#[error("status: {status}, error: {error:#}")]
pub struct ApiError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> ApiError {
        ApiError { status, error }
    }

    pub fn bad_request(error: anyhow::Error) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, error)
    }
}

impl From<liveness_models::ValidationError> for ApiError {
    fn from(error: liveness_models::ValidationError) -> ApiError {
        ApiError::bad_request(anyhow::Error::from(error))
    }
}

#[derive(Serialize)]
struct ApiErrorBody {
    status: u16,
    error: String,
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        tracing::warn!(status = %self.status, error = %self.error, "API responding with error");
        let body = ApiErrorBody {
            status: self.status.as_u16(),
            error: format!("{:#}", self.error),
        };
        (self.status, axum::Json(body)).into_response()
    }
}
