//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use queue::PriorityQueueRouter;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub router: PriorityQueueRouter,
}

/// GET /metrics: Prometheus text format, with queue depth gauges refreshed
/// at scrape time.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    for (domain, stats) in state.router.stats() {
        metrics::gauge!("queue_jobs_waiting", "domain" => domain.as_str())
            .set(stats.waiting as f64);
        metrics::gauge!("queue_jobs_active", "domain" => domain.as_str())
            .set(stats.active as f64);
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
