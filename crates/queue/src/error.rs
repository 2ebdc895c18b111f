//! Queue error types.

use adapters::{AdapterError, ErrorKind};
use common::JobId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::Domain;

/// Failure reported by a job handler.
///
/// The kind decides whether the router redelivers the job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<AdapterError> for JobError {
    fn from(err: AdapterError) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
        }
    }
}

impl From<JobError> for AdapterError {
    fn from(err: JobError) -> Self {
        AdapterError::new(err.kind, err.message)
    }
}

/// Errors returned by the router and the audit log.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No handler is registered for the job's domain and action.
    #[error("No handler registered for {domain}/{action}")]
    UnknownHandler { domain: Domain, action: String },

    /// Two handlers were registered for the same domain and action.
    #[error("Duplicate handler for {domain}/{action}")]
    DuplicateHandler { domain: Domain, action: String },

    /// Required handlers are missing from the registry.
    #[error("Missing handlers: {0:?}")]
    MissingHandlers(Vec<String>),

    /// The job does not exist.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The router has been shut down and accepts no new jobs.
    #[error("Router is shutting down")]
    ShuttingDown,

    /// The durable transport rejected an operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
