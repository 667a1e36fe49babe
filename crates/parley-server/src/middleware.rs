//! Request middleware.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Header carrying the per-request correlation id.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Logs each request and stamps an `x-request-id` on the response.
///
/// A well-formed id supplied by the client is kept; otherwise a fresh v4
/// UUID is generated.
pub async fn request_logging_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .cloned()
        .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let header_names: Vec<&str> = req.headers().keys().map(HeaderName::as_str).collect();
    tracing::info!(%method, %path, "request received");
    tracing::debug!(%method, %path, headers = ?header_names, "request headers");

    let started = Instant::now();
    let mut response = next.run(req).await;
    tracing::debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );

    if let Some(id) = request_id {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), id);
    }
    response
}
