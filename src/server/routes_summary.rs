//! Hours summaries.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

use super::middleware_auth::RequireAuth;
use super::routes_history::ScopeQuery;
use super::AppState;
use crate::auth::Action;
use crate::error::WorkflowError;

/// GET /api/summary: week, month, and total hours.
pub(super) async fn handler_api_summary(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Query(q): Query<ScopeQuery>,
) -> Result<impl IntoResponse, WorkflowError> {
    let scope = q.resolve(&actor, Action::ViewAllSummary)?;
    Ok(Json(state.db.summary(scope, Utc::now()).await?))
}

/// GET /api/summary/monthly: the caller's hours per month.
pub(super) async fn handler_api_summary_monthly(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
) -> Result<impl IntoResponse, WorkflowError> {
    Ok(Json(state.db.monthly_hours(actor.user_id).await?))
}
