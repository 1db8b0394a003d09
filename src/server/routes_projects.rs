//! Project API: CRUD and per-project snapshot history.

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use super::middleware_auth::RequireAuth;
use super::AppState;
use crate::error::WorkflowError;
use crate::project::{NewProject, ProjectUpdate};

/// GET /api/projects: every project with its completed hours.
pub(super) async fn handler_api_projects_list(
    State(state): State<Arc<AppState>>,
    RequireAuth(_actor): RequireAuth,
) -> Result<impl IntoResponse, WorkflowError> {
    Ok(Json(state.db.list_projects().await?))
}

/// POST /api/projects
pub(super) async fn handler_api_projects_create(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(payload): Json<NewProject>,
) -> Result<impl IntoResponse, WorkflowError> {
    let record = state.db.create_project(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/projects/{id}
pub(super) async fn handler_api_project_get(
    State(state): State<Arc<AppState>>,
    RequireAuth(_actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    Ok(Json(state.db.get_project(id).await?))
}

/// PATCH /api/projects/{id}: partial update; absent fields are untouched.
pub(super) async fn handler_api_project_update(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
    Json(update): Json<ProjectUpdate>,
) -> Result<impl IntoResponse, WorkflowError> {
    Ok(Json(state.db.update_project(&actor, id, &update).await?))
}

/// DELETE /api/projects/{id}: admin only.
pub(super) async fn handler_api_project_delete(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    state.db.delete_project(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/projects/{id}/history: snapshots, oldest first.
pub(super) async fn handler_api_project_history(
    State(state): State<Arc<AppState>>,
    RequireAuth(_actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    state.db.get_project(id).await?;
    Ok(Json(state.db.project_snapshots(id).await?))
}
