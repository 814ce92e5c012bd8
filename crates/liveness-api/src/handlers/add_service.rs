use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use liveness_core::Supervisor;
use liveness_mailer::Mailer;
use liveness_models::NewTarget;
use liveness_store::Store;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Mirrors spec.md §6.1's field names, which are snake_case abbreviations of
/// the domain model's `*_ms` fields (`period`, `alerting_window`,
/// `response_time`), not the Target's own field names.
#[derive(Debug, Deserialize)]
pub struct AddServiceRequest {
    pub url: String,
    pub primary_email: String,
    pub secondary_email: String,
    pub period: i64,
    pub alerting_window: i64,
    pub response_time: i64,
}

#[derive(Debug, Serialize)]
pub struct AddServiceResponse {
    pub success: bool,
    pub job_id: i64,
}

pub async fn handle_add_service<S: Store, M: Mailer>(
    State(supervisor): State<Arc<Supervisor<S, M>>>,
    Json(req): Json<AddServiceRequest>,
) -> Result<Json<AddServiceResponse>, ApiError> {
    let url: url::Url = req
        .url
        .parse()
        .map_err(|err: url::ParseError| ApiError::bad_request(anyhow::anyhow!(err).context("invalid url")))?;

    let new_target = NewTarget {
        url,
        primary_email: req.primary_email,
        secondary_email: req.secondary_email,
        period_ms: req.period,
        window_ms: req.alerting_window,
        response_time_ms: req.response_time,
    };
    new_target.validate()?;

    let target = supervisor
        .add_target(new_target)
        .await
        .map_err(|err| ApiError::new(StatusCode::NOT_IMPLEMENTED, err))?;

    Ok(Json(AddServiceResponse {
        success: true,
        job_id: target.id.0,
    }))
}
