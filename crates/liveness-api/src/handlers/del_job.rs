use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use liveness_core::Supervisor;
use liveness_mailer::Mailer;
use liveness_models::TargetId;
use liveness_store::Store;
use serde::Deserialize;

use super::receive_alert::SuccessResponse;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DelJobQuery {
    pub job_id: i64,
}

pub async fn handle_del_job<S: Store, M: Mailer>(
    State(supervisor): State<Arc<Supervisor<S, M>>>,
    Query(query): Query<DelJobQuery>,
) -> Result<Json<SuccessResponse>, ApiError> {
    supervisor
        .remove_target(TargetId(query.job_id))
        .await
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err))?;

    Ok(Json(SuccessResponse { success: true }))
}
