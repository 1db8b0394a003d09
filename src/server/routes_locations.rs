//! Location sampling: record a point, list the feed, replay one clock-in.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::middleware_auth::RequireAuth;
use super::routes_history::ScopeQuery;
use super::AppState;
use crate::auth::Action;
use crate::error::WorkflowError;

#[derive(Deserialize)]
pub(super) struct LocationPayload {
    latitude: f64,
    longitude: f64,
    clockin_id: Option<Uuid>,
}

fn check_coordinates(lat: f64, long: f64) -> Result<(), WorkflowError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
        return Err(WorkflowError::validation(format!(
            "coordinates out of range: {}, {}",
            lat, long
        )));
    }
    Ok(())
}

/// POST /api/locations
pub(super) async fn handler_api_locations_record(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(payload): Json<LocationPayload>,
) -> Result<impl IntoResponse, WorkflowError> {
    actor.ensure(Action::RecordLocation)?;
    check_coordinates(payload.latitude, payload.longitude)?;
    if let Some(clockin_id) = payload.clockin_id {
        let view = state.db.get_clockin(clockin_id).await?;
        actor.ensure_owns(view.clockin.user_id)?;
    }
    let point = state
        .db
        .record_location(
            actor.user_id,
            payload.latitude,
            payload.longitude,
            payload.clockin_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(point)))
}

/// GET /api/locations
pub(super) async fn handler_api_locations_list(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Query(q): Query<ScopeQuery>,
) -> Result<impl IntoResponse, WorkflowError> {
    let scope = q.resolve(&actor, Action::ViewAllLocations)?;
    Ok(Json(state.db.list_locations(scope).await?))
}

/// GET /api/clockins/{id}/locations: oldest first.
pub(super) async fn handler_api_clockin_locations(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    let view = state.db.get_clockin(id).await?;
    actor.ensure_owns(view.clockin.user_id)?;
    Ok(Json(state.db.list_locations_for_clockin(id).await?))
}
