//! HTTP intake.
//!
//! | Method     | Path               | Result                                   |
//! |------------|--------------------|------------------------------------------|
//! | POST, PUT  | `/api/logs/{*tag}` | 202 accepted, 400 / 503 / 504 refused    |
//! | POST, PUT  | `/api/logs`        | same, written to the default destination |
//! | GET        | `/api/health`      | 200 `OK`                                 |
//!
//! The body encoding follows `Content-Type`: msgpack content types select the
//! streaming decoder, anything else is treated as JSON. Every request is
//! bounded by the configured request timeout and answered with 408 when it
//! runs over.

use std::os::unix::fs::FileTypeExt;
use std::path::Path as FsPath;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use logdb_core::config::{Network, ServerConfig};
use logdb_core::Encoding;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::{IngestService, SubmitError};

impl SubmitError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Saturated { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::StoreUnreachable(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Failed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the intake router around `service`.
///
/// The health check made when every write slot is taken gets half of
/// `request_timeout`, so a hung store is answered with 504 rather than 408.
pub fn router(service: IngestService, request_timeout: Duration) -> Router {
    let service = service.with_health_probe_timeout(request_timeout / 2);
    Router::new()
        .route("/api/logs/{*tag}", post(ingest).put(ingest))
        .route("/api/logs", post(ingest_untagged).put(ingest_untagged))
        .route("/api/logs/", post(ingest_untagged).put(ingest_untagged))
        .route("/api/health", get(health))
        .with_state(service)
        .layer(middleware::from_fn_with_state(request_timeout, enforce_timeout))
        .layer(middleware::from_fn(log_request))
}

async fn ingest(
    State(service): State<IngestService>,
    Path(tag): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, SubmitError> {
    accept(&service, &tag, &headers, &body).await
}

async fn ingest_untagged(
    State(service): State<IngestService>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, SubmitError> {
    accept(&service, "", &headers, &body).await
}

async fn accept(
    service: &IngestService,
    tag: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, SubmitError> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let encoding = Encoding::from_content_type(content_type);
    service.submit(tag, body, encoding).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn health() -> &'static str {
    "OK"
}

async fn enforce_timeout(State(timeout): State<Duration>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(?timeout, "request timed out");
            (
                StatusCode::REQUEST_TIMEOUT,
                Json(json!({ "error": "request timed out" })),
            )
                .into_response()
        }
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Serve the intake API until `shutdown` is cancelled, then finish in-flight
/// requests and return.
pub async fn serve(
    config: &ServerConfig,
    service: IngestService,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(service, config.request_timeout());
    let signal = async move { shutdown.cancelled().await };

    match config.network {
        Network::Tcp => {
            let listener = tokio::net::TcpListener::bind(&config.listen)
                .await
                .with_context(|| format!("error while binding {}", config.listen))?;
            info!(addr = %listener.local_addr()?, "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
                .context("http server failed")?;
        }
        Network::Unix => {
            let path = FsPath::new(&config.listen);
            if let Ok(meta) = std::fs::symlink_metadata(path) {
                if !meta.file_type().is_socket() {
                    anyhow::bail!("{} exists and is not a socket", path.display());
                }
                std::fs::remove_file(path)
                    .with_context(|| format!("error while removing stale socket {}", path.display()))?;
            }
            let listener = tokio::net::UnixListener::bind(path)
                .with_context(|| format!("error while binding {}", path.display()))?;
            info!(socket = %path.display(), "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
                .context("http server failed")?;
        }
    }
    info!("http server stopped");
    Ok(())
}
