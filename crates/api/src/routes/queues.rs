//! Queue depth and job lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::JobId;
use queue::{Domain, JobRecord, QueueStats};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /queues/stats: counters of every domain queue.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<BTreeMap<Domain, QueueStats>> {
    Json(state.router.stats())
}

/// GET /jobs/{id}: current state of one job.
pub async fn job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let job_id = JobId::parse(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid job id: {e}")))?;
    state
        .router
        .job(job_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))
}
