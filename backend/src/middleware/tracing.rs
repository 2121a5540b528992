//! Request logging with a correlation id

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::client_ip;

pub static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Logs each request inside a span carrying its request id, and echoes the
/// id back to the client
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = client_ip(request.headers());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();
    let mut response = async move {
        tracing::debug!(client_ip = ?client_ip, "Request started");
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();
    span.in_scope(|| {
        if response.status().is_server_error() {
            tracing::error!(status, duration_ms, "Request failed");
        } else if response.status().is_client_error() {
            tracing::warn!(status, duration_ms, "Request rejected");
        } else {
            tracing::info!(status, duration_ms, "Request completed");
        }
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID.clone(), value);
    }
    response
}
