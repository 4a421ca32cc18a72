//! C9 — REST API + WebSocket surface: a thin adapter over C2/C4/C6
//! (spec.md §4.9).

pub mod auth;
pub mod dto;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the `/api` router. Standard endpoints are capped at 100 requests
/// per 15 minutes per IP; the trigger endpoint at 10/hour (spec.md §4.9
/// "Rate limiting"). Write endpoints require the shared API key.
pub fn build_router(state: AppState) -> Router {
    let standard_governor = Box::leak(Box::new(
        GovernorConfigBuilder::default()
            .per_nanosecond(Duration::from_secs(9).as_nanos() as u64)
            .burst_size(100)
            .finish()
            .expect("static governor config is valid"),
    ));

    let trigger_governor = Box::leak(Box::new(
        GovernorConfigBuilder::default()
            .per_nanosecond(Duration::from_secs(360).as_nanos() as u64)
            .burst_size(10)
            .finish()
            .expect("static governor config is valid"),
    ));

    let read_only = Router::new()
        .route("/status", get(routes::get_status))
        .route("/pipelines", get(routes::list_pipelines))
        .route("/pipelines/:pipeline_id/jobs", get(routes::pipeline_jobs))
        .route("/jobs", get(routes::list_jobs))
        .route("/jobs/:job_id", get(routes::get_job))
        .route("/ws", get(ws::ws_handler))
        .layer(GovernorLayer {
            config: standard_governor,
        });

    // `route_layer` only wraps routes already registered on the same
    // `Router` value at the point it's called, so the trigger route (its
    // own, tighter limit) and the standard-rate cancel/retry routes are
    // built as separate chains before being merged — otherwise the second
    // governor would silently apply to nothing.
    let trigger_routes = Router::new()
        .route("/pipelines/:pipeline_id/trigger", post(routes::trigger_pipeline))
        .route_layer(GovernorLayer {
            config: trigger_governor,
        });

    let standard_write_routes = Router::new()
        .route("/jobs/:job_id/cancel", post(routes::cancel_job))
        .route("/jobs/:job_id/retry", post(routes::retry_job))
        .route_layer(GovernorLayer {
            config: standard_governor,
        });

    let writes = trigger_routes
        .merge(standard_write_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .nest(
            "/api",
            read_only.merge(writes).fallback(unmatched_api_route),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Every route this surface exposes is enumerated in spec.md §4.9; any path
/// under `/api` that doesn't match one is, on this closed surface, a
/// malformed id (extra path segments, traversal attempts) rather than a
/// genuine unknown endpoint — so it is reported the same way a failed
/// `[A-Za-z0-9_-]{1,100}` check would be (spec.md §8 property 5, §8 S7).
async fn unmatched_api_route() -> dto::ApiError {
    dto::ApiError::InvalidId("request path".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::executor::{Executor, ExecutorConfig};
    use crate::registry::WorkerRegistry;
    use crate::repository::{JobRepository, SqliteJobRepository};
    use crate::retry::{RetryConfig, RetryEngine};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::in_memory().await.unwrap());
        let registry = WorkerRegistry::new();
        let executor = Executor::new(
            repo,
            Arc::new(registry),
            Arc::new(RetryEngine::new(RetryConfig::default())),
            Arc::new(EventBus::new()),
            None,
            ExecutorConfig::default(),
        );
        AppState {
            executor,
            events: Arc::new(EventBus::new()),
            api_key: Some("test-key".into()),
        }
    }

    #[tokio::test]
    async fn status_endpoint_is_readable_without_a_key() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cancel_without_key_is_unauthorized() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/jobs/job-1/cancel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_job_id_is_rejected() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/../etc/passwd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
