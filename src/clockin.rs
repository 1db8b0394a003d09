//! Clock-in state machine.
//!
//! A clock-in is born `in_progress` (gated or direct creation) and moves to
//! `completed` through [`end`] or [`modify_hours`]. These functions are pure:
//! they validate the transition and return the next record, and the database
//! layer persists the result under a row lock together with the history
//! side effects.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::hours;
use crate::models::{Address, ClockinRecord, ClockinStatus, Detection};

/// Fields for a new clock-in, shared by the gated and direct creation paths.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClockinDraft {
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub location_lat: Option<f64>,
    pub location_long: Option<f64>,
    pub postal_code: Option<String>,
    pub photo_path: Option<String>,
}

impl ClockinDraft {
    /// Record for the non-gated path: approval defaults to false.
    pub fn direct(self, now: DateTime<Utc>) -> ClockinRecord {
        self.into_record(now, false)
    }

    /// Record for the gated path: only reached after the approval gate passed.
    pub fn gated(self, now: DateTime<Utc>) -> ClockinRecord {
        self.into_record(now, true)
    }

    fn into_record(self, now: DateTime<Utc>, approved: bool) -> ClockinRecord {
        ClockinRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            project_id: self.project_id,
            start_time: now,
            end_time: None,
            status: ClockinStatus::InProgress,
            location_lat: self.location_lat,
            location_long: self.location_long,
            postal_code: self.postal_code,
            photo_path: self.photo_path,
            approved,
            created_at: now,
        }
    }
}

/// Everything the resolver hands over once a job passes the approval gate.
#[derive(Debug, Clone)]
pub struct GatedClockin {
    /// Job that produced this clock-in; at most one clock-in exists per job.
    pub job_handle: Uuid,
    pub draft: ClockinDraft,
    pub detections: Vec<Detection>,
    /// Address context for the clock-in history snapshot.
    pub address: Address,
}

/// How a clock-in is ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EndSpec {
    /// Duration since `start_time` (the client-side stopwatch).
    Elapsed(Duration),
    At(DateTime<Utc>),
}

impl EndSpec {
    /// `i64::MIN` is outside chrono's range and is clamped to the most negative
    /// duration, which [`end`] rejects as negative.
    pub fn from_elapsed_ms(ms: i64) -> Self {
        let elapsed =
            Duration::try_milliseconds(ms).unwrap_or_else(|| Duration::milliseconds(-i64::MAX));
        EndSpec::Elapsed(elapsed)
    }
}

/// `in_progress -> completed`. Ending a completed record is rejected.
pub fn end(record: &ClockinRecord, spec: EndSpec) -> Result<ClockinRecord> {
    if record.status != ClockinStatus::InProgress {
        return Err(WorkflowError::InvalidStateTransition(format!(
            "clock-in {} is already {}",
            record.id, record.status
        )));
    }
    let end_time = match spec {
        EndSpec::Elapsed(elapsed) => {
            if elapsed < Duration::zero() {
                return Err(WorkflowError::validation("elapsed duration must not be negative"));
            }
            record.start_time.checked_add_signed(elapsed).ok_or_else(|| {
                WorkflowError::validation(format!(
                    "elapsed duration of {} ms is out of range",
                    elapsed.num_milliseconds()
                ))
            })?
        }
        EndSpec::At(at) => at,
    };
    complete_at(record, end_time)
}

/// Manual hours correction: `end_time = start_time + hours`. Valid from either
/// state; it is an alternate way into `completed`, not a separate state.
pub fn modify_hours(record: &ClockinRecord, hours_worked: f64) -> Result<ClockinRecord> {
    let end_time = hours::duration_from_hours(hours_worked)
        .and_then(|d| record.start_time.checked_add_signed(d))
        .ok_or_else(|| {
            WorkflowError::validation(format!(
                "hours must be between 0 and {}, got {}",
                hours::MAX_CLOCKIN_HOURS,
                hours_worked
            ))
        })?;
    complete_at(record, end_time)
}

fn complete_at(record: &ClockinRecord, end_time: DateTime<Utc>) -> Result<ClockinRecord> {
    if end_time < record.start_time {
        return Err(WorkflowError::validation(format!(
            "end time {} precedes start time {}",
            end_time, record.start_time
        )));
    }
    let mut next = record.clone();
    next.end_time = Some(end_time);
    next.status = ClockinStatus::Completed;
    Ok(next)
}
