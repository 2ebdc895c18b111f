//! Integration audit log and the `audit/log_operation` job handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{JobError, QueueError, Result};
use crate::job::{Domain, JobPayload, QueueJob};
use crate::registry::JobHandler;

pub const LOG_OPERATION: &str = "log_operation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Error,
    Retry,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
            AuditStatus::Retry => "retry",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AuditStatus::Success),
            "error" => Some(AuditStatus::Error),
            "retry" => Some(AuditStatus::Retry),
            _ => None,
        }
    }
}

/// One row of the integration log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub system_name: String,
    pub operation: String,
    pub status: AuditStatus,
    pub payload: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of an `audit/log_operation` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRequest {
    pub system_name: String,
    pub operation: String,
    pub status: AuditStatus,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl AuditRequest {
    pub fn new(system_name: impl Into<String>, operation: impl Into<String>, status: AuditStatus) -> Self {
        Self {
            system_name: system_name.into(),
            operation: operation.into(),
            status,
            payload: serde_json::Value::Null,
            error_message: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Wraps the request in an audit job.
    pub fn into_job(self, correlation_id: CorrelationId) -> Result<QueueJob> {
        let data = serde_json::to_value(&self)?;
        Ok(QueueJob::new(
            JobPayload::new(Domain::Audit, LOG_OPERATION).with_data(data),
            correlation_id,
        ))
    }
}

/// Append-only store of integration log entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;

    /// Returns the most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Returns every entry for a correlation id, oldest first.
    async fn by_correlation(&self, correlation_id: &CorrelationId) -> Result<Vec<AuditEntry>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn by_correlation(&self, correlation_id: &CorrelationId) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| &e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }
}

/// PostgreSQL-backed audit log over the `integration_logs` table.
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: PgRow) -> Result<AuditEntry> {
        let status: String = row.try_get("status")?;
        let status = AuditStatus::parse(&status)
            .ok_or_else(|| QueueError::Transport(format!("unknown audit status: {status}")))?;
        let correlation_id: String = row.try_get("correlation_id")?;

        Ok(AuditEntry {
            id: row.try_get("id")?,
            correlation_id: CorrelationId::from(correlation_id),
            system_name: row.try_get("system_name")?,
            operation: row.try_get("operation")?,
            status,
            payload: row.try_get("payload")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integration_logs
                (id, correlation_id, system_name, operation, status, payload, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.correlation_id.as_str())
        .bind(&entry.system_name)
        .bind(&entry.operation)
        .bind(entry.status.as_str())
        .bind(&entry.payload)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM integration_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn by_correlation(&self, correlation_id: &CorrelationId) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM integration_logs WHERE correlation_id = $1 ORDER BY created_at ASC",
        )
        .bind(correlation_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }
}

/// Handles `audit/log_operation` by appending to the audit log.
pub struct LogOperationHandler {
    log: Arc<dyn AuditLog>,
}

impl LogOperationHandler {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl JobHandler for LogOperationHandler {
    async fn handle(&self, job: &QueueJob) -> std::result::Result<serde_json::Value, JobError> {
        let request: AuditRequest = job.payload.data_as()?;
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            correlation_id: job.correlation_id.clone(),
            system_name: request.system_name,
            operation: request.operation,
            status: request.status,
            payload: request.payload,
            error_message: request.error_message,
            created_at: Utc::now(),
        };
        let id = entry.id;

        self.log
            .record(entry)
            .await
            .map_err(|e| JobError::transport(e.to_string()))?;
        Ok(serde_json::json!({ "logged": true, "id": id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::ErrorKind;

    #[tokio::test]
    async fn test_log_operation_handler_records_entry() {
        let log = InMemoryAuditLog::new();
        let handler = LogOperationHandler::new(Arc::new(log.clone()));
        let correlation_id = CorrelationId::from("corr-1");

        let job = AuditRequest::new("saga", "order_completed", AuditStatus::Success)
            .with_payload(serde_json::json!({ "order": "o-1" }))
            .into_job(correlation_id.clone())
            .unwrap();
        assert_eq!(job.priority, crate::job::priority::AUDIT);

        let result = handler.handle(&job).await.unwrap();
        assert_eq!(result["logged"], true);

        let entries = log.by_correlation(&correlation_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "order_completed");
        assert_eq!(entries[0].status, AuditStatus::Success);
        assert_eq!(entries[0].payload["order"], "o-1");
    }

    #[tokio::test]
    async fn test_malformed_request_is_validation_error() {
        let handler = LogOperationHandler::new(Arc::new(InMemoryAuditLog::new()));
        let job = QueueJob::new(
            JobPayload::new(Domain::Audit, LOG_OPERATION)
                .with_data(serde_json::json!({ "operation": "x" })),
            CorrelationId::new(),
        );
        let err = handler.handle(&job).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let log = InMemoryAuditLog::new();
        for op in ["a", "b", "c"] {
            log.record(AuditEntry {
                id: Uuid::new_v4(),
                correlation_id: CorrelationId::new(),
                system_name: "inventory".to_string(),
                operation: op.to_string(),
                status: AuditStatus::Retry,
                payload: serde_json::Value::Null,
                error_message: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let recent = log.recent(2).await.unwrap();
        let ops: Vec<_> = recent.iter().map(|e| e.operation.as_str()).collect();
        assert_eq!(ops, vec!["c", "b"]);
    }
}
