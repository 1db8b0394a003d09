//! Clock-in API: direct and office creation, reads, end, hours correction,
//! delete.
//!
//! Field workers never create clock-ins here; their path is the detection
//! gate in `routes_detection`.

use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::forms::PhotoForm;
use super::middleware_auth::RequireAuth;
use super::AppState;
use crate::auth::Action;
use crate::clockin::{ClockinDraft, EndSpec};
use crate::detection::sniff_image;
use crate::error::WorkflowError;

/// GET /api/clockins: the caller's clock-ins, newest first.
pub(super) async fn handler_api_clockins_list(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
) -> Result<impl IntoResponse, WorkflowError> {
    let clockins = state.db.list_clockins_for_user(actor.user_id).await?;
    Ok(Json(clockins))
}

#[derive(Deserialize)]
pub(super) struct DirectClockinPayload {
    project_id: Option<Uuid>,
    location_lat: Option<f64>,
    location_long: Option<f64>,
    postal_code: Option<String>,
}

/// POST /api/clockins: create without the detection gate.
pub(super) async fn handler_api_clockins_create(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(payload): Json<DirectClockinPayload>,
) -> Result<impl IntoResponse, WorkflowError> {
    actor.ensure(Action::CreateDirectClockin)?;
    let draft = ClockinDraft {
        user_id: actor.user_id,
        project_id: payload.project_id,
        location_lat: payload.location_lat,
        location_long: payload.location_long,
        postal_code: payload.postal_code,
        photo_path: None,
    };
    let view = state.db.create_direct_clockin(draft).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /api/clockins/office: multipart `photo` plus project and address.
pub(super) async fn handler_api_clockins_office(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    multipart: Multipart,
) -> Result<impl IntoResponse, WorkflowError> {
    actor.ensure(Action::CreateDirectClockin)?;
    let form = PhotoForm::read(multipart).await?;
    let photo = form.require_photo()?;
    let kind = sniff_image(photo).map_err(|e| WorkflowError::validation(e.to_string()))?;
    let address = form.address();
    let mut draft = ClockinDraft {
        user_id: actor.user_id,
        project_id: form.parsed::<Uuid>("project_id")?,
        location_lat: form.parsed::<f64>("latitude")?,
        location_long: form.parsed::<f64>("longitude")?,
        postal_code: address.postal_code.clone(),
        photo_path: None,
    };
    let photo_path = state.photos.save(photo, kind.extension()).await?;
    draft.photo_path = Some(photo_path.clone());
    match state.db.create_office_clockin(draft, &address).await {
        Ok(view) => Ok((StatusCode::CREATED, Json(view))),
        Err(e) => {
            state.photos.delete(&photo_path).await;
            Err(e)
        }
    }
}

/// GET /api/clockins/{id}
pub(super) async fn handler_api_clockin_get(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    let view = state.db.get_clockin(id).await?;
    actor.ensure_owns(view.clockin.user_id)?;
    Ok(Json(view))
}

/// DELETE /api/clockins/{id}
pub(super) async fn handler_api_clockin_delete(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    state.db.delete_clockin(&actor, id, &state.photos).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Either the client stopwatch or an explicit end time. Neither means now.
#[derive(Deserialize, Default)]
pub(super) struct EndPayload {
    elapsed_ms: Option<i64>,
    end_time: Option<DateTime<Utc>>,
}

impl EndPayload {
    fn into_spec(self, now: DateTime<Utc>) -> Result<EndSpec, WorkflowError> {
        match (self.elapsed_ms, self.end_time) {
            (Some(_), Some(_)) => Err(WorkflowError::validation(
                "give either elapsed_ms or end_time, not both",
            )),
            (Some(ms), None) => Ok(EndSpec::from_elapsed_ms(ms)),
            (None, Some(at)) => Ok(EndSpec::At(at)),
            (None, None) => Ok(EndSpec::At(now)),
        }
    }
}

/// POST /api/clockins/{id}/end
pub(super) async fn handler_api_clockin_end(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
    Json(payload): Json<EndPayload>,
) -> Result<impl IntoResponse, WorkflowError> {
    actor.ensure(Action::EndClockin)?;
    let spec = payload.into_spec(Utc::now())?;
    let record = state.db.end_clockin(&actor, id, spec).await?;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub(super) struct HoursPayload {
    hours: f64,
}

/// PUT /api/clockins/{id}/hours
pub(super) async fn handler_api_clockin_hours(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
    Json(payload): Json<HoursPayload>,
) -> Result<impl IntoResponse, WorkflowError> {
    actor.ensure(Action::ModifyClockinHours)?;
    let record = state
        .db
        .modify_clockin_hours(&actor, id, payload.hours)
        .await?;
    Ok(Json(record))
}

/// GET /api/clockins/{id}/detections
pub(super) async fn handler_api_clockin_detections(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<impl IntoResponse, WorkflowError> {
    let view = state.db.get_clockin(id).await?;
    actor.ensure_owns(view.clockin.user_id)?;
    Ok(Json(state.db.detections_for(id).await?))
}
