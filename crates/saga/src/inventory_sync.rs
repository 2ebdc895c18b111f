//! Warehouse-to-channel stock synchronisation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{CorrelationId, JobId};
use parking_lot::RwLock;
use queue::{Domain, JobPayload, JobStatus, PriorityQueueRouter, QueueJob};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    Incremental,
    Product,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
            SyncType::Product => "product",
        }
    }

    /// Product count reported when the request names no products.
    fn estimated_products(&self) -> usize {
        match self {
            SyncType::Full => 1500,
            SyncType::Incremental => 150,
            SyncType::Product => 1,
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub sync_type: SyncType,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

/// Job data of `inventory/inventory_sync` and `channel/sync_inventory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJobData {
    pub sync_id: String,
    #[serde(flatten)]
    pub request: SyncRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub sync_id: String,
    pub status: SyncState,
    pub sync_type: SyncType,
    pub products_count: usize,
    pub started_at: DateTime<Utc>,
    pub job_ids: Vec<JobId>,
}

/// Fans a sync request out to the warehouse and sales-channel queues.
pub struct InventorySyncService {
    router: PriorityQueueRouter,
    syncs: RwLock<HashMap<String, SyncStatus>>,
}

impl InventorySyncService {
    pub fn new(router: PriorityQueueRouter) -> Arc<Self> {
        Arc::new(Self {
            router,
            syncs: RwLock::new(HashMap::new()),
        })
    }

    #[tracing::instrument(
        skip(self, request, correlation_id),
        fields(sync_type = %request.sync_type, correlation_id = %correlation_id)
    )]
    pub async fn start_sync(
        &self,
        request: SyncRequest,
        correlation_id: CorrelationId,
    ) -> Result<SyncStatus> {
        if request.sync_type == SyncType::Product && request.product_ids.is_empty() {
            return Err(SagaError::Validation(
                "product sync requires at least one product id".to_string(),
            ));
        }

        let sync_id = format!("sync-{}", Uuid::new_v4());
        let products_count = if request.product_ids.is_empty() {
            request.sync_type.estimated_products()
        } else {
            request.product_ids.len()
        };
        let data = serde_json::to_value(SyncJobData {
            sync_id: sync_id.clone(),
            request: request.clone(),
        })?;

        let mut job_ids = Vec::with_capacity(2);
        for (domain, action) in [
            (Domain::Inventory, "inventory_sync"),
            (Domain::Channel, "sync_inventory"),
        ] {
            let job = QueueJob::new(
                JobPayload::new(domain, action).with_data(data.clone()),
                correlation_id.clone(),
            );
            job_ids.push(self.router.enqueue(job).await?);
        }

        let status = SyncStatus {
            sync_id: sync_id.clone(),
            status: SyncState::Processing,
            sync_type: request.sync_type,
            products_count,
            started_at: Utc::now(),
            job_ids,
        };
        self.syncs.write().insert(sync_id, status.clone());
        tracing::info!(sync_id = %status.sync_id, products_count, "inventory sync started");

        Ok(self.refresh(status))
    }

    /// Returns the sync with its status derived from its jobs.
    pub fn status(&self, sync_id: &str) -> Option<SyncStatus> {
        let status = self.syncs.read().get(sync_id).cloned()?;
        Some(self.refresh(status))
    }

    pub fn list(&self) -> Vec<SyncStatus> {
        let syncs: Vec<SyncStatus> = self.syncs.read().values().cloned().collect();
        let mut syncs: Vec<SyncStatus> = syncs.into_iter().map(|s| self.refresh(s)).collect();
        syncs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        syncs
    }

    fn refresh(&self, mut status: SyncStatus) -> SyncStatus {
        let states: Vec<Option<JobStatus>> = status
            .job_ids
            .iter()
            .map(|id| self.router.job(*id).map(|r| r.status))
            .collect();

        status.status = if states.contains(&Some(JobStatus::Failed)) {
            SyncState::Failed
        } else if states.iter().all(|s| *s == Some(JobStatus::Completed)) {
            SyncState::Completed
        } else {
            SyncState::Processing
        };
        status
    }
}
