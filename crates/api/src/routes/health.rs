//! Health check endpoints.

use std::sync::Arc;

use adapters::{CallContext, HealthReport, HealthStatus};
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub overall: HealthStatus,
    pub healthy_systems: usize,
    pub total_systems: usize,
    pub timestamp: DateTime<Utc>,
}

/// GET /health: liveness plus the last known state of the systems.
///
/// Reads the health monitor without probing anything.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let aggregate = state.fleet.health().aggregate();
    Json(HealthResponse {
        status: "ok",
        overall: aggregate.overall,
        healthy_systems: aggregate.healthy_count,
        total_systems: aggregate.total,
        timestamp: Utc::now(),
    })
}

/// GET /health/systems: probes every system and reports the result.
///
/// Responds 503 when the fleet is unhealthy so load balancers can react.
#[tracing::instrument(skip_all, fields(correlation_id = %correlation_id))]
pub async fn systems(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
) -> (StatusCode, Json<HealthReport>) {
    let report = state
        .fleet
        .health_report(&CallContext::new(correlation_id))
        .await;
    let status = match report.overall {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}
