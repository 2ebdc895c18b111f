//! Job model shared by producers, the router and handlers.

use adapters::ErrorKind;
use chrono::{DateTime, Utc};
use common::{CorrelationId, JobId, OrderId};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Default priorities per kind of work. Higher dequeues first.
pub mod priority {
    pub const AUDIT: u8 = 1;
    pub const CUSTOMER: u8 = 4;
    pub const INVENTORY: u8 = 7;
    pub const CHANNEL: u8 = 8;
    pub const BILLING: u8 = 9;
    /// Alert-class inventory jobs such as low-stock notifications.
    pub const ALERT: u8 = 10;
}

/// Independent queue a job is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Inventory,
    Billing,
    Customer,
    Channel,
    Audit,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Inventory,
        Domain::Billing,
        Domain::Customer,
        Domain::Channel,
        Domain::Audit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Inventory => "inventory",
            Domain::Billing => "billing",
            Domain::Customer => "customer",
            Domain::Channel => "channel",
            Domain::Audit => "audit",
        }
    }

    /// Priority used when the producer does not pick one.
    pub fn default_priority(&self) -> u8 {
        match self {
            Domain::Inventory => priority::INVENTORY,
            Domain::Billing => priority::BILLING,
            Domain::Customer => priority::CUSTOMER,
            Domain::Channel => priority::CHANNEL,
            Domain::Audit => priority::AUDIT,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| JobError::validation(format!("unknown domain: {s}")))
    }
}

/// What a worker is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub domain: Domain,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl JobPayload {
    pub fn new(domain: Domain, action: impl Into<String>) -> Self {
        Self {
            domain,
            action: action.into(),
            order_id: None,
            product_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Deserializes `data` into a typed request.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            JobError::validation(format!("invalid {} payload: {e}", self.action))
        })
    }
}

/// A unit of work owned by the router until a worker picks it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    pub domain: Domain,
    pub priority: u8,
    pub payload: JobPayload,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    /// Deliveries so far. Zero until a worker first picks the job up.
    pub attempt: u32,
    /// Router-level delivery bound. `None` uses the router default.
    pub max_deliveries: Option<u32>,
}

impl QueueJob {
    /// Creates a job routed to the payload's domain with its default priority.
    pub fn new(payload: JobPayload, correlation_id: CorrelationId) -> Self {
        Self {
            id: JobId::new(),
            domain: payload.domain,
            priority: payload.domain.default_priority(),
            payload,
            correlation_id,
            created_at: Utc::now(),
            attempt: 0,
            max_deliveries: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    pub fn action(&self) -> &str {
        &self.payload.action
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Queryable state of a job, kept by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub domain: Domain,
    pub action: String,
    pub priority: u8,
    pub status: JobStatus,
    pub attempts: u32,
    pub order_id: Option<OrderId>,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<JobError>,
    pub result: Option<serde_json::Value>,
    /// True if the job ran inline because the transport was unavailable.
    pub inline: bool,
}

impl JobRecord {
    pub(crate) fn waiting(job: &QueueJob) -> Self {
        Self {
            id: job.id,
            domain: job.domain,
            action: job.payload.action.clone(),
            priority: job.priority,
            status: JobStatus::Waiting,
            attempts: job.attempt,
            order_id: job.payload.order_id,
            correlation_id: job.correlation_id.clone(),
            created_at: job.created_at,
            updated_at: Utc::now(),
            last_error: None,
            result: None,
            inline: false,
        }
    }
}

/// Final result of a job, published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job: QueueJob,
    pub result: Result<serde_json::Value, JobError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(|e| e.kind)
    }
}

/// Lifecycle notifications emitted by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A worker picked the job up. Emitted once per delivery.
    Started(QueueJob),
    /// The job reached a terminal state.
    Finished(JobOutcome),
}
