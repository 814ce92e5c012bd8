use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use liveness_core::Supervisor;
use liveness_mailer::Mailer;
use liveness_models::NotificationId;
use liveness_store::Store;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// `primary_admin` is accepted but ignored (spec.md §6.1: "informational
/// only; the Store's update applies uniformly to whichever notification row
/// carries that id").
#[derive(Debug, Deserialize)]
pub struct ReceiveAlertQuery {
    pub notification_id: i64,
    #[serde(default)]
    #[allow(dead_code)]
    pub primary_admin: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

pub async fn handle_receive_alert<S: Store, M: Mailer>(
    State(supervisor): State<Arc<Supervisor<S, M>>>,
    Query(query): Query<ReceiveAlertQuery>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let id = NotificationId(query.notification_id);

    let applied = supervisor
        .store()
        .set_notification_acknowledged(id)
        .await
        .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err))?;

    if !applied {
        return Err(ApiError::bad_request(anyhow::anyhow!(
            "notification {id} is unknown or already acknowledged"
        )));
    }

    Ok(Json(SuccessResponse { success: true }))
}
