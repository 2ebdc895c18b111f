//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use queue::QueueError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga intake or lookup error.
    Saga(SagaError),
    /// Job routing error.
    Queue(QueueError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Queue(err) => queue_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::OrderNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::AlreadyExists(_)
        | SagaError::InvalidStatus { .. }
        | SagaError::InvalidTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        SagaError::Queue(err) => queue_error_to_response(err),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn queue_error_to_response(err: QueueError) -> (StatusCode, String) {
    match &err {
        QueueError::JobNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        QueueError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Queue(err)
    }
}
