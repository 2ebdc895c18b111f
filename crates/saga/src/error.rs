//! Saga error types.

use common::OrderId;
use queue::QueueError;
use thiserror::Error;

use crate::state::{SagaStatus, StepName, StepStatus};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step was asked to make a transition its current status forbids.
    #[error("Invalid transition for step '{step}' of order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        step: StepName,
        from: StepStatus,
        to: StepStatus,
    },

    /// The saga is in the wrong status for the requested operation.
    #[error("Invalid saga status for order {order_id}: {status}")]
    InvalidStatus { order_id: OrderId, status: SagaStatus },

    /// A saga for this order already exists.
    #[error("Saga already exists for order {0}")]
    AlreadyExists(OrderId),

    /// No saga exists for this order.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The request is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Queue error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
