//! Request logging middleware.
//!
//! One span per request with method, path, status, and latency. Health
//! checks are skipped to keep the log readable.

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn, Span};

pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path.ends_with("/healthz") {
        return next.run(request).await;
    }

    let start = Instant::now();
    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );
    let _guard = span.enter();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    Span::current().record("status", status);
    Span::current().record("latency_ms", start.elapsed().as_millis() as u64);

    if status >= 500 {
        warn!(method = %method, path = %path, status, "request failed");
    } else {
        info!(method = %method, path = %path, status, "request");
    }
    response
}
