//! Request-side helpers and middleware.
//!
//! # Responsibilities
//! - Record request metrics and, in development, a one-line access log
//! - Buffer request bodies under the configured size limit
//! - Recover the client address from the connection info
//!
//! # Design Decisions
//! - The access log runs outside the handlers, so it reports the status
//!   that nested rendering actually produced
//! - Noise paths (`/.well-known`, `/favicon.ico`, `/robots.txt`) are not
//!   access-logged

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::config::Environment;
use crate::http::response::bare_error;
use crate::observability::metrics;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

const QUIET_PREFIXES: [&str; 3] = ["/.well-known", "/favicon.ico", "/robots.txt"];

/// True if `path` belongs in the access log.
pub fn should_log_request(path: &str) -> bool {
    !QUIET_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Middleware: request metrics for every request, access log in dev.
pub async fn access_log(State(env): State<Environment>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let status = response.status().as_u16();

    metrics::record_request(&method, status, start);
    if env.is_dev() && should_log_request(&path) {
        tracing::info!("{} {} {}ms", path, status, start.elapsed().as_millis());
    }
    response
}

/// Client address recorded by `into_make_service_with_connect_info`.
pub fn remote_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// The request's correlation ID, if the request-id layer set one.
pub fn request_id(request: &Request) -> &str {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Buffer `body`, answering 413 if it exceeds `limit` bytes.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        tracing::debug!(error = %e, limit, "Request body rejected");
        bare_error(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
    })
}
