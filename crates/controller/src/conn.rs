//! Serves one accepted connection with hyper's HTTP/1 server, inline on the
//! caller's task. Keep-alive is off, so every connection carries exactly one
//! request and is closed once the response is written.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

/// Smallest read buffer hyper accepts; also caps the request head.
const MAX_HEAD: usize = 8 * 1024;
const MAX_BODY: usize = 16 * 1024;

/// Wrap `router` so every request body is fully read, within `client_timeout`
/// and `MAX_BODY`, before any handler runs.
pub fn with_limits(router: Router, client_timeout: Duration) -> Router {
    router.layer(middleware::from_fn_with_state(client_timeout, buffer_body))
}

async fn buffer_body(
    State(client_timeout): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    match timeout(client_timeout, axum::body::to_bytes(body, MAX_BODY)).await {
        Ok(Ok(bytes)) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Ok(Err(e)) => {
            tracing::warn!(uri = %parts.uri, "request body rejected: {e}");
            (StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n").into_response()
        }
        Err(_) => {
            tracing::warn!(uri = %parts.uri, "request body not received within {client_timeout:?}");
            (StatusCode::REQUEST_TIMEOUT, "request body timed out\n").into_response()
        }
    }
}

/// Serve the single request on `stream`. The request head must arrive within
/// `client_timeout`; the handler itself is not bounded, since it may run a
/// full actuation.
pub async fn serve<S>(stream: S, router: &Router, client_timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = http1::Builder::new();
    builder
        .keep_alive(false)
        .max_buf_size(MAX_HEAD)
        .timer(TokioTimer::new())
        .header_read_timeout(client_timeout);
    builder
        .serve_connection(
            TokioIo::new(stream),
            TowerToHyperService::new(router.clone()),
        )
        .await
        .context("connection failed")
}

// ===========================================================================
// Tests
// ===========================================================================
