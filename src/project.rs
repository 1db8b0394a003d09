//! # Project — Lifecycle State Machine
//!
//! Projects move through `start → in_progress → finished`, either by direct
//! edits or by the daily promotion sweep. Every transition keeps the date
//! invariants:
//!
//! - `finished` ⇒ `end_date` is set (the supplied value or now)
//! - entering `in_progress` clears `end_date`
//! - re-opening into `start` resets `start_date` and clears `end_date`
//!
//! The functions here are pure. `db::projects` applies them inside a
//! transaction and appends the history snapshot.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::models::{ProjectRecord, ProjectStatus};

/// Creation payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub postal_code: Option<String>,
    pub location_lat: Option<f64>,
    pub location_long: Option<f64>,
    pub status: Option<ProjectStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl NewProject {
    pub fn into_record(self, now: DateTime<Utc>) -> Result<ProjectRecord> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::validation("project name must not be empty"));
        }
        let status = self.status.unwrap_or(ProjectStatus::Start);
        let start_date = self.start_date.unwrap_or(now);
        let end_date = match status {
            ProjectStatus::Finished => Some(self.end_date.unwrap_or(now)),
            _ if self.end_date.is_some() => {
                return Err(WorkflowError::validation(
                    "end_date may only be set on a finished project",
                ))
            }
            _ => None,
        };
        let record = ProjectRecord {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            state: self.state,
            city: self.city,
            street: self.street,
            street_number: self.street_number,
            postal_code: self.postal_code,
            location_lat: self.location_lat,
            location_long: self.location_long,
            status,
            start_date,
            end_date,
            created_at: now,
        };
        check_dates(&record)?;
        Ok(record)
    }
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub postal_code: Option<String>,
    pub location_lat: Option<f64>,
    pub location_long: Option<f64>,
    pub status: Option<ProjectStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Apply `update` to `project`, returning the resulting record.
pub fn apply_update(
    project: &ProjectRecord,
    update: &ProjectUpdate,
    now: DateTime<Utc>,
) -> Result<ProjectRecord> {
    let mut next = project.clone();

    if let Some(status) = update.status {
        next.status = status;
        match status {
            ProjectStatus::InProgress => next.end_date = None,
            ProjectStatus::Finished => next.end_date = Some(update.end_date.unwrap_or(now)),
            ProjectStatus::Start => {
                next.start_date = update.start_date.unwrap_or(now);
                next.end_date = None;
            }
        }
    }

    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(WorkflowError::validation("project name must not be empty"));
        }
        next.name = name.clone();
    }
    set_if_present(&mut next.description, &update.description);
    set_if_present(&mut next.state, &update.state);
    set_if_present(&mut next.city, &update.city);
    set_if_present(&mut next.street, &update.street);
    set_if_present(&mut next.street_number, &update.street_number);
    set_if_present(&mut next.postal_code, &update.postal_code);
    if update.location_lat.is_some() {
        next.location_lat = update.location_lat;
    }
    if update.location_long.is_some() {
        next.location_long = update.location_long;
    }

    if let Some(start) = update.start_date {
        next.start_date = start;
    }
    if let Some(end) = update.end_date {
        if next.status != ProjectStatus::Finished {
            return Err(WorkflowError::validation(
                "end_date may only be set on a finished project",
            ));
        }
        next.end_date = Some(end);
    }

    check_dates(&next)?;
    Ok(next)
}

fn set_if_present(field: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        *field = value.clone();
    }
}

fn check_dates(project: &ProjectRecord) -> Result<()> {
    if let Some(end) = project.end_date {
        if end < project.start_date {
            return Err(WorkflowError::validation(format!(
                "end_date {} precedes start_date {}",
                end, project.start_date
            )));
        }
    }
    Ok(())
}

// ── Promotion sweep ─────────────────────────────────────────────

/// A project is promoted once it has sat in `start` for longer than `threshold`.
pub fn is_due_for_promotion(
    project: &ProjectRecord,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    project.status == ProjectStatus::Start && project.created_at <= now - threshold
}

/// `start → in_progress` as applied by the sweep.
pub fn promote(project: &ProjectRecord) -> ProjectRecord {
    let mut next = project.clone();
    next.status = ProjectStatus::InProgress;
    next.end_date = None;
    next
}

/// Next daily run strictly after `now`, at `hour:00` UTC.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
