//! Priority job routing for the integration bus.
//!
//! Jobs are tagged with a [`Domain`] and a priority. Each domain has its own
//! queue and worker; handlers are looked up in an explicit
//! [`HandlerRegistry`] built at startup.

pub mod audit;
pub mod error;
pub mod job;
pub mod registry;
pub mod router;
pub mod transport;

pub use audit::{
    AuditEntry, AuditLog, AuditRequest, AuditStatus, InMemoryAuditLog, LOG_OPERATION,
    LogOperationHandler, PostgresAuditLog,
};
pub use error::{JobError, QueueError, Result};
pub use job::{Domain, JobEvent, JobOutcome, JobPayload, JobRecord, JobStatus, QueueJob, priority};
pub use registry::{FnHandler, HandlerRegistry, JobHandler, handler_fn};
pub use router::{PriorityQueueRouter, QueueStats, RouterConfig};
pub use transport::{InMemoryJobTransport, JobTransport};
