use axum::http::StatusCode;

/// Ambient liveness endpoint for the outer orchestrator (SPEC_FULL.md §6.1),
/// not part of the alerting contract: no Store access, always `200 "ok"`
/// once the router is serving.
pub async fn handle_health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
