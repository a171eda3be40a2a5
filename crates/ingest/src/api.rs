//! HTTP API: the remote-write endpoint plus health checks and metrics

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ingest_lib::{
    health::{ComponentStatus, HealthRegistry},
    pipeline::Pipeline,
    proto::WriteRequest,
};
use prometheus::{Encoder, TextEncoder};
use prost::Message;
use snap::raw::Decoder;
use std::sync::Arc;
use tracing::{debug, info};

/// Largest accepted remote-write body.
const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Response header carrying the number of samples in the request.
const SAMPLES_WRITTEN_HEADER: &str = "X-Prometheus-Remote-Write-Samples-Written";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, health_registry: HealthRegistry) -> Self {
        Self {
            pipeline,
            health_registry,
        }
    }
}

/// Remote-write receiver: snappy-compressed protobuf in, 204 out.
async fn receive(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let mut decoder = Decoder::new();
    let decompressed = match decoder.decompress_vec(&body) {
        Ok(data) => data,
        Err(e) => {
            debug!(error = %e, "Failed to decompress write request");
            return (StatusCode::BAD_REQUEST, "failed to decompress payload").into_response();
        }
    };

    let request = match WriteRequest::decode(decompressed.as_slice()) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Failed to decode write request");
            return (StatusCode::BAD_REQUEST, "failed to decode write request").into_response();
        }
    };

    let summary = state.pipeline.process(request).await;

    (
        StatusCode::NO_CONTENT,
        [(SAMPLES_WRITTEN_HEADER, summary.samples.to_string())],
    )
        .into_response()
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/receive", post(receive))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_SIZE))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
