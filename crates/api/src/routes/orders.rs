//! Order intake and saga status endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId};
use saga::{OrderRequest, SagaInstance, SagaStatus, SagaStep};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

// -- Request types --

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaStatusResponse {
    pub order_id: OrderId,
    pub correlation_id: CorrelationId,
    pub status: SagaStatus,
    pub needs_intervention: bool,
    pub steps: Vec<SagaStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SagaInstance> for SagaStatusResponse {
    fn from(saga: SagaInstance) -> Self {
        Self {
            order_id: saga.order_id(),
            correlation_id: saga.correlation_id().clone(),
            status: saga.status(),
            needs_intervention: saga.needs_intervention(),
            steps: saga.steps().to_vec(),
            created_at: saga.created_at(),
            updated_at: saga.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: accept an order and start its saga.
#[tracing::instrument(skip_all, fields(correlation_id = %correlation_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Json(req): Json<OrderRequest>,
) -> Result<(StatusCode, Json<SagaStatusResponse>), ApiError> {
    let saga = state.orchestrator.submit(req, correlation_id).await?;
    Ok((StatusCode::ACCEPTED, Json(saga.into())))
}

/// GET /orders: most recent sagas, newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SagaStatusResponse>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);
    let sagas = state.orchestrator.list(limit).await?;
    Ok(Json(sagas.into_iter().map(Into::into).collect()))
}

/// GET /orders/{id}: the saga of one order.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let saga = state.orchestrator.get(order_id).await?;
    Ok(Json(saga.into()))
}

/// POST /orders/{id}/archive: drop a finished saga from listings.
#[tracing::instrument(skip(state))]
pub async fn archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.orchestrator.archive(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
