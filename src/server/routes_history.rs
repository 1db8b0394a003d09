//! History API. `?all=true` widens a listing to every user and needs the
//! matching admin permission; otherwise listings are the caller's own.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::middleware_auth::RequireAuth;
use super::AppState;
use crate::auth::{Action, Actor};
use crate::db::HistoryCorrection;
use crate::error::WorkflowError;

#[derive(Deserialize, Default)]
pub(super) struct ScopeQuery {
    #[serde(default)]
    all: bool,
}

impl ScopeQuery {
    /// `None` means every user. Requires `action` when `all` is set.
    pub(super) fn resolve(&self, actor: &Actor, action: Action) -> Result<Option<Uuid>, WorkflowError> {
        if self.all {
            actor.ensure(action)?;
            Ok(None)
        } else {
            Ok(Some(actor.user_id))
        }
    }
}

/// GET /api/history/clockins
pub(super) async fn handler_api_clockin_history_list(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Query(q): Query<ScopeQuery>,
) -> Result<impl IntoResponse, WorkflowError> {
    let scope = q.resolve(&actor, Action::ViewAllHistory)?;
    Ok(Json(state.db.list_clockin_history(scope).await?))
}

/// PATCH /api/history/clockins/{id}: address correction.
pub(super) async fn handler_api_clockin_history_correct(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
    Json(correction): Json<HistoryCorrection>,
) -> Result<impl IntoResponse, WorkflowError> {
    Ok(Json(
        state
            .db
            .correct_clockin_history(&actor, id, &correction)
            .await?,
    ))
}

/// DELETE /api/history/clockins/{id}
pub(super) async fn handler_api_clockin_history_delete(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    state.db.delete_clockin_history(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/history/projects: grouped with per-project totals.
pub(super) async fn handler_api_project_history_list(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Query(q): Query<ScopeQuery>,
) -> Result<impl IntoResponse, WorkflowError> {
    let scope = q.resolve(&actor, Action::ViewAllHistory)?;
    Ok(Json(state.db.list_project_history(scope).await?))
}
