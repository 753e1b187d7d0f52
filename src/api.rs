//! HTTP server for health and metrics endpoints
//!
//! - GET /health  - Checkpoints and counters (JSON)
//! - GET /healthz - Liveness probe
//! - GET /readyz  - Ready once a cycle has completed
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::metrics::Metrics;

/// Relay statistics shared between the relay loop and the HTTP server
#[derive(Debug, Default, Clone, Serialize)]
pub struct RelayStats {
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub source_checkpoint: u64,
    pub destination_checkpoint: u64,
    /// Mirrored transactions confirmed on chain
    pub relayed: u64,
    /// Events whose mirrored transaction failed terminally
    pub failed: u64,
    pub duplicates_skipped: u64,
    pub decode_failures: u64,
    pub reconnects: u64,
    pub dry_run: bool,
}

pub type SharedStats = Arc<RwLock<RelayStats>>;
pub type SharedMetrics = Arc<Metrics>;

#[derive(Clone)]
pub struct AppState {
    pub stats: SharedStats,
    pub metrics: SharedMetrics,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub stats: RelayStats,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.stats.read().await.clone();
    Json(HealthResponse {
        status: "healthy",
        stats,
    })
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.stats.read().await.cycles > 0 {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(stats: SharedStats, metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(AppState { stats, metrics })
}

/// Serve the health and metrics endpoints until the process exits
pub async fn start_api_server(
    bind_address: &str,
    stats: SharedStats,
    metrics: SharedMetrics,
) -> eyre::Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}: {}", bind_address, e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, router(stats, metrics)).await?;

    Ok(())
}
