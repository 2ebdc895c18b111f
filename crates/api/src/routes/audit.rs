//! Integration log queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use common::CorrelationId;
use queue::AuditEntry;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub correlation_id: Option<String>,
    pub limit: Option<usize>,
}

/// GET /audit: the entries of one correlation id, or the most recent ones.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let entries = match query.correlation_id {
        Some(id) => {
            state
                .audit
                .by_correlation(&CorrelationId::from(id))
                .await?
        }
        None => {
            state
                .audit
                .recent(query.limit.unwrap_or(DEFAULT_LIMIT))
                .await?
        }
    };
    Ok(Json(entries))
}
