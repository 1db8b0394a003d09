//! # Server — HTTP API for the Clock-in Workflow
//!
//! Axum router over the workflow: detection submission and polling, clock-in
//! lifecycle, projects, history, locations, and summaries. `run` also starts
//! the in-process detection workers and the daily promotion sweep.
//!
//! Handlers return `Result<_, WorkflowError>`; the error maps onto an HTTP
//! status with a `{"error": "..."}` body.

mod forms;
pub mod middleware_auth;
mod routes_clockins;
mod routes_detection;
mod routes_health;
mod routes_history;
mod routes_locations;
mod routes_projects;
mod routes_summary;

use anyhow::Result;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Instrument};

use crate::config::{Config, ServerConfig};
use crate::db::Database;
use crate::detection::dispatch::Dispatcher;
use crate::detection::resolver::Resolver;
use crate::detection::runner::Runner;
use crate::detection::{detector_from_config, policy_from_config};
use crate::ephemeral::EphemeralStore;
use crate::error::WorkflowError;
use crate::photos::PhotoStore;
use crate::{prom_metrics, scheduler};

pub struct AppState {
    pub db: Database,
    pub store: EphemeralStore,
    pub dispatcher: Dispatcher,
    pub resolver: Resolver<Database>,
    pub photos: PhotoStore,
    pub config: Config,
    pub jwt_secret: Option<String>,
    pub prom_metrics: Arc<prom_metrics::Metrics>,
}

impl AppState {
    pub fn new(
        db: Database,
        store: EphemeralStore,
        photos: PhotoStore,
        config: Config,
        jwt_secret: Option<String>,
    ) -> Arc<Self> {
        let metrics = Arc::new(prom_metrics::Metrics::new());
        let dispatcher = Dispatcher::new(store.clone(), Arc::clone(&metrics));
        let resolver = Resolver::new(
            store.clone(),
            db.clone(),
            Duration::from_millis(config.detection.resolve_lock_ms),
            Arc::clone(&metrics),
        );
        Arc::new(AppState {
            db,
            store,
            dispatcher,
            resolver,
            photos,
            config,
            jwt_secret,
            prom_metrics: metrics,
        })
    }

    /// Runner sharing this state's store, photo directory, and metrics.
    pub fn runner(&self) -> Runner {
        let cfg = &self.config.detection;
        Runner::new(
            self.store.clone(),
            Arc::from(detector_from_config(cfg)),
            Arc::from(policy_from_config(&cfg.policy)),
            self.photos.clone(),
            Arc::clone(&self.prom_metrics),
        )
    }
}

/// HTTP status for a workflow error.
pub fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::InvalidStateTransition(_) => StatusCode::CONFLICT,
        WorkflowError::DispatchUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Middleware that records HTTP request duration into the Prometheus histogram,
/// generates (or propagates) a request ID for correlation, and wraps the
/// request in a tracing span.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse UUID and numeric path segments into placeholders to keep
/// histogram label cardinality bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else if seg.ends_with(".jpg") || seg.ends_with(".png") || seg.ends_with(".webp") {
                ":file".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn cors_layer(cfg: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let server_cfg = state.config.server.clone();
    Router::new()
        .route(
            "/api/detections",
            post(routes_detection::handler_api_detection_submit),
        )
        .route(
            "/api/detections/{handle}",
            get(routes_detection::handler_api_detection_poll),
        )
        .route(
            "/api/detections/{handle}/context",
            put(routes_detection::handler_api_detection_context),
        )
        .route(
            "/api/clockins",
            get(routes_clockins::handler_api_clockins_list)
                .post(routes_clockins::handler_api_clockins_create),
        )
        .route(
            "/api/clockins/office",
            post(routes_clockins::handler_api_clockins_office),
        )
        .route(
            "/api/clockins/{id}",
            get(routes_clockins::handler_api_clockin_get)
                .delete(routes_clockins::handler_api_clockin_delete),
        )
        .route(
            "/api/clockins/{id}/end",
            post(routes_clockins::handler_api_clockin_end),
        )
        .route(
            "/api/clockins/{id}/hours",
            put(routes_clockins::handler_api_clockin_hours),
        )
        .route(
            "/api/clockins/{id}/detections",
            get(routes_clockins::handler_api_clockin_detections),
        )
        .route(
            "/api/clockins/{id}/locations",
            get(routes_locations::handler_api_clockin_locations),
        )
        .route(
            "/api/projects",
            get(routes_projects::handler_api_projects_list)
                .post(routes_projects::handler_api_projects_create),
        )
        .route(
            "/api/projects/{id}",
            get(routes_projects::handler_api_project_get)
                .patch(routes_projects::handler_api_project_update)
                .delete(routes_projects::handler_api_project_delete),
        )
        .route(
            "/api/projects/{id}/history",
            get(routes_projects::handler_api_project_history),
        )
        .route(
            "/api/history/clockins",
            get(routes_history::handler_api_clockin_history_list),
        )
        .route(
            "/api/history/clockins/{id}",
            patch(routes_history::handler_api_clockin_history_correct)
                .delete(routes_history::handler_api_clockin_history_delete),
        )
        .route(
            "/api/history/projects",
            get(routes_history::handler_api_project_history_list),
        )
        .route(
            "/api/locations",
            get(routes_locations::handler_api_locations_list)
                .post(routes_locations::handler_api_locations_record),
        )
        .route("/api/summary", get(routes_summary::handler_api_summary))
        .route(
            "/api/summary/monthly",
            get(routes_summary::handler_api_summary_monthly),
        )
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        .nest_service("/uploads", ServeDir::new(state.photos.root()))
        .layer(cors_layer(&server_cfg))
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(server_cfg.body_limit_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server_cfg.request_timeout_secs),
        ))
        .with_state(state)
}

/// Serve the API. With `with_workers`, detection workers run in this process
/// alongside the HTTP server.
pub async fn run(state: Arc<AppState>, port: u16, with_workers: bool) -> Result<()> {
    let app = build_router(state.clone());

    if with_workers {
        let runner = Arc::new(state.runner());
        let cfg = &state.config.detection;
        runner.spawn_workers(cfg.workers, Duration::from_millis(cfg.poll_interval_ms));
    }

    scheduler::spawn_daily(
        state.db.clone(),
        state.config.promotion.clone(),
        Arc::clone(&state.prom_metrics),
    );

    // Background task: sample queue depth for /metrics
    let sample_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            match sample_state.store.queue_len().await {
                Ok(n) => {
                    sample_state.prom_metrics.queue_depth.set(n as i64);
                }
                Err(e) => warn!(error = %e, "failed to sample detection queue depth"),
            }
        }
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, backend = state.store.backend(), "siteclock API running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server shut down gracefully");
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! { _ = ctrl_c => info!("received SIGINT, shutting down"), _ = sigterm.recv() => info!("received SIGTERM, shutting down") }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
