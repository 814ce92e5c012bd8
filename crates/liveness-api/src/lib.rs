//! The thin CRUD admin HTTP API of spec.md §6.1, an `axum` router over a
//! [`Supervisor`]. Grounded on `agent::api::build_router`'s shape (CORS
//! layer, `Arc<App>` state, one module per handler) but with the Supervisor
//! itself as the shared state rather than a bespoke `App` struct, since the
//! Supervisor already owns everything a handler needs (Store, Mailer,
//! owned-set, shard index).

mod error;
mod handlers;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{delete, get, post};
use liveness_core::Supervisor;
use liveness_mailer::Mailer;
use liveness_store::Store;

pub use error::ApiError;

/// Builds the admin API router. `allow_origin` entries are parsed as CORS
/// origins; an empty slice disables cross-origin requests entirely.
pub fn build_router<S: Store, M: Mailer>(
    supervisor: Arc<Supervisor<S, M>>,
    allow_origin: &[String],
) -> anyhow::Result<axum::Router<()>> {
    let allow_origin = allow_origin
        .iter()
        .map(|o| o.parse())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse allowed origins")?;

    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_origin(tower_http::cors::AllowOrigin::list(allow_origin));

    let router = axum::Router::new()
        .route("/add_service", post(handlers::add_service::handle_add_service))
        .route("/receive_alert", get(handlers::receive_alert::handle_receive_alert))
        .route("/alerting_jobs", get(handlers::alerting_jobs::handle_alerting_jobs))
        .route("/del_job", delete(handlers::del_job::handle_del_job))
        .route("/health", get(handlers::health::handle_health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(supervisor);

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use liveness_mailer::test_support::RecordingMailer;
    use liveness_core::AckUrlConfig;
    use liveness_store::fake::FakeStore;
    use tower::ServiceExt;

    fn supervisor() -> Arc<Supervisor<FakeStore, RecordingMailer>> {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        Arc::new(Supervisor::new(
            Arc::new(FakeStore::new()),
            Arc::new(RecordingMailer::default()),
            Arc::new(liveness_mailer::Renderer::try_new().unwrap()),
            reqwest_client_stub(),
            liveness_core::new_owned_set(),
            0,
            AckUrlConfig {
                app_host: "localhost".into(),
                app_port: 8080,
            },
            rx,
        ))
    }

    fn reqwest_client_stub() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let router = build_router(supervisor(), &[]).unwrap();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_service_rejects_non_positive_period() {
        let router = build_router(supervisor(), &[]).unwrap();
        let body = serde_json::json!({
            "url": "http://example.test/healthz",
            "primary_email": "a@example.test",
            "secondary_email": "b@example.test",
            "period": 0,
            "alerting_window": 1000,
            "response_time": 5000,
        });
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/add_service")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn alerting_jobs_requires_primary_email() {
        let router = build_router(supervisor(), &[]).unwrap();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/alerting_jobs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
