//! # Health & Observability Endpoints
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /healthz` | Liveness: process is alive |
//! | `GET /readyz` | Readiness: database and job store reachable |
//! | `GET /metrics` | Prometheus scraping endpoint |
//!
//! Readiness checks both backends with a 2-second timeout each and returns
//! 503 when either is unreachable.

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;
use std::time::Duration;

/// Liveness probe: returns 200 if the process is running.
pub(super) async fn handler_healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(super) async fn handler_readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::time::timeout(Duration::from_secs(2), state.db.health_check()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable"),
        Err(_) => return (StatusCode::SERVICE_UNAVAILABLE, "database timeout"),
    }
    match tokio::time::timeout(Duration::from_secs(2), state.store.ping()).await {
        Ok(Ok(())) => (StatusCode::OK, "ok"),
        Ok(Err(_)) => (StatusCode::SERVICE_UNAVAILABLE, "job store unreachable"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "job store timeout"),
    }
}

/// Prometheus metrics in OpenMetrics text format.
pub(super) async fn handler_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.prom_metrics.encode();
    (
        StatusCode::OK,
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
}
