//! Inventory sync endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use common::CorrelationId;
use saga::{SyncRequest, SyncStatus};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /inventory/sync: start a warehouse-to-channel sync.
#[tracing::instrument(skip_all, fields(correlation_id = %correlation_id))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Json(req): Json<SyncRequest>,
) -> Result<(StatusCode, Json<SyncStatus>), ApiError> {
    let status = state.inventory_sync.start_sync(req, correlation_id).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// GET /inventory/sync: every sync started by this process, newest first.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<SyncStatus>> {
    Json(state.inventory_sync.list())
}

/// GET /inventory/sync/{id}
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SyncStatus>, ApiError> {
    state
        .inventory_sync
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Sync {id} not found")))
}
