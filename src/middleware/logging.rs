//! Request logging
//! Mission: Log every HTTP request with method, path, status, and
//! latency, skipping health checks to keep the log free of polling noise.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Span};

/// Logs at WARN for 5xx, INFO otherwise, with method/path/status/latency
/// and the caller's address (used on layers that run after
/// `ConnectInfo` extraction, i.e. the bound TCP listener, not behind a
/// proxy that would need `X-Forwarded-For`).
pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        client_ip = %addr.ip(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );
    let _guard = span.enter();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();
    Span::current().record("status", status);
    Span::current().record("latency_ms", latency.as_millis() as u64);

    if status >= 500 {
        warn!(%method, %path, status, latency_ms = latency.as_millis(), client_ip = %addr.ip(), "request failed");
    } else {
        info!(%method, %path, status, latency_ms = latency.as_millis(), "request completed");
    }

    response
}

/// Same as [`request_logging`] without `ConnectInfo`, for routers
/// mounted without `into_make_service_with_connect_info` (unit tests,
/// nested sub-routers).
pub async fn request_logging_simple(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(%method, %path, status, latency_ms = latency.as_millis(), "request failed");
    } else {
        info!(%method, %path, status, latency_ms = latency.as_millis(), "request completed");
    }

    response
}
