use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use liveness_core::Supervisor;
use liveness_mailer::Mailer;
use liveness_models::Target;
use liveness_store::Store;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AlertingJobsQuery {
    pub primary_email: String,
}

#[derive(Debug, Serialize)]
pub struct AlertingJobsResponse {
    pub jobs: Vec<Target>,
}

pub async fn handle_alerting_jobs<S: Store, M: Mailer>(
    State(supervisor): State<Arc<Supervisor<S, M>>>,
    Query(query): Query<AlertingJobsQuery>,
) -> Result<Json<AlertingJobsResponse>, ApiError> {
    let jobs = supervisor
        .store()
        .get_target_by_primary_email(&query.primary_email)
        .await
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err))?;

    Ok(Json(AlertingJobsResponse { jobs }))
}
