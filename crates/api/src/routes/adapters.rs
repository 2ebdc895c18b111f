//! Adapter system information.

use std::sync::Arc;

use adapters::{CallContext, SystemInfoReport};
use axum::extract::State;
use axum::{Extension, Json};
use common::CorrelationId;

use crate::state::AppState;

/// GET /adapters/info: system information from every adapter.
#[tracing::instrument(skip_all, fields(correlation_id = %correlation_id))]
pub async fn info(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
) -> Json<Vec<SystemInfoReport>> {
    let reports = state
        .fleet
        .system_info(&CallContext::new(correlation_id))
        .await;
    Json(reports)
}
