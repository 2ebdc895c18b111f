//! Operator HTTP API for the integration engine.
//!
//! Exposes order intake, saga status, fleet health, queue state and
//! inventory sync, with structured logging (tracing), correlation ids on
//! every request and Prometheus metrics.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::metrics::MetricsState;
pub use state::{AppState, create_default_state};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            router: state.router.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/health/systems", get(routes::health::systems))
        .route("/adapters/info", get(routes::adapters::info))
        .route("/queues/stats", get(routes::queues::stats))
        .route("/jobs/{id}", get(routes::queues::job))
        .route("/orders", post(routes::orders::create).get(routes::orders::list))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/archive", post(routes::orders::archive))
        .route(
            "/inventory/sync",
            post(routes::inventory::start).get(routes::inventory::list),
        )
        .route("/inventory/sync/{id}", get(routes::inventory::status))
        .route("/audit", get(routes::audit::list))
        .with_state(state)
        .merge(metrics_router)
        .layer(axum::middleware::from_fn(middleware::correlation_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
