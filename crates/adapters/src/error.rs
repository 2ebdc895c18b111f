//! Adapter error types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The attempt did not settle within its timeout.
    Timeout,
    /// The downstream system could not be reached or answered with an error.
    TransportError,
    /// The circuit for the adapter is open; no call was attempted.
    CircuitOpen,
    /// The referenced entity does not exist at the downstream system.
    NotFound,
    /// The request or job was malformed.
    ValidationError,
    /// A compensating action failed after exhausting its retry budget.
    CompensationExhausted,
}

impl ErrorKind {
    /// Returns true for failures worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::TransportError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "Timeout",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::CircuitOpen => "CircuitOpen",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::CompensationExhausted => "CompensationExhausted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by an adapter operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("timed out after {}ms", after.as_millis()),
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    pub fn circuit_open(adapter: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit for {adapter} is open"),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn compensation_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CompensationExhausted, message)
    }

    /// Returns true if the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Convenience type alias for adapter results.
pub type Result<T> = std::result::Result<T, AdapterError>;
