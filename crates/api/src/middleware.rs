//! Correlation-id propagation for every request.

use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use common::CorrelationId;

pub const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");
const ALT_CORRELATION_HEADER: HeaderName = HeaderName::from_static("correlation-id");

/// Reads the caller's correlation id or assigns one, exposes it to handlers
/// as an extension and echoes it on the response.
pub async fn correlation_id(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(&CORRELATION_HEADER)
        .or_else(|| request.headers().get(&ALT_CORRELATION_HEADER))
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(CorrelationId::from)
        .unwrap_or_default();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::info!(%correlation_id, %method, %path, "request started");
    let started = Instant::now();

    request.extensions_mut().insert(correlation_id.clone());
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    tracing::info!(
        %correlation_id,
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}
