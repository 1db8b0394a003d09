//! Detection API: submit a photo, attach context, poll for the result.
//!
//! Polling answers with the HTTP status of the outcome: 202 while pending,
//! 201 when the clock-in was created, 200 for a failed or rejected job, and
//! 404 for a handle that is unknown or already consumed.

use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

use super::forms::PhotoForm;
use super::middleware_auth::RequireAuth;
use super::AppState;
use crate::auth::Action;
use crate::detection::resolver::PollOutcome;
use crate::detection::{JobContext, JobHandle};
use crate::error::WorkflowError;

/// POST /api/detections: multipart `photo` plus optional context fields.
pub(super) async fn handler_api_detection_submit(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    multipart: Multipart,
) -> Result<impl IntoResponse, WorkflowError> {
    actor.ensure(Action::SubmitDetection)?;
    let form = PhotoForm::read(multipart).await?;
    let photo = form.require_photo()?;
    let handle = match form.job_context()? {
        Some(ctx) => {
            state
                .dispatcher
                .submit_with_context(photo, actor.user_id, &ctx)
                .await?
        }
        None => state.dispatcher.submit(photo, actor.user_id).await?,
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"handle": handle, "status": "pending"})),
    ))
}

/// PUT /api/detections/{handle}/context
pub(super) async fn handler_api_detection_context(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(handle): AxumPath<String>,
    Json(context): Json<JobContext>,
) -> Result<impl IntoResponse, WorkflowError> {
    actor.ensure(Action::SubmitDetection)?;
    let handle = JobHandle::parse(&handle)?;
    state.dispatcher.attach_context(&handle, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn poll_status(outcome: &PollOutcome) -> StatusCode {
    match outcome {
        PollOutcome::Pending => StatusCode::ACCEPTED,
        PollOutcome::Completed { .. } => StatusCode::CREATED,
        PollOutcome::Failed { .. } | PollOutcome::Rejected { .. } => StatusCode::OK,
        PollOutcome::Unknown => StatusCode::NOT_FOUND,
    }
}

/// GET /api/detections/{handle}
pub(super) async fn handler_api_detection_poll(
    State(state): State<Arc<AppState>>,
    RequireAuth(_actor): RequireAuth,
    AxumPath(handle): AxumPath<String>,
) -> Result<impl IntoResponse, WorkflowError> {
    let handle = JobHandle::parse(&handle)?;
    let outcome = state.resolver.poll(&handle).await?;
    Ok((poll_status(&outcome), Json(outcome)))
}
