//! History recorder: builds append-only snapshot rows.
//!
//! Every triggering event produces exactly one row; nothing is merged or
//! deduplicated. Missing address parts are stored as empty strings.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Address, ClockinHistorySnapshot, ClockinRecord, ProjectHistorySnapshot, ProjectRecord,
};

fn or_empty(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Snapshot of the address context supplied when a clock-in was created.
pub fn clockin_snapshot(
    clockin: &ClockinRecord,
    address: &Address,
    now: DateTime<Utc>,
) -> ClockinHistorySnapshot {
    let postal_code = address
        .postal_code
        .as_ref()
        .or(clockin.postal_code.as_ref())
        .cloned()
        .unwrap_or_default();
    ClockinHistorySnapshot {
        id: Uuid::new_v4(),
        clockin_id: clockin.id,
        user_id: clockin.user_id,
        project_id: clockin.project_id,
        state: or_empty(&address.state),
        city: or_empty(&address.city),
        street: or_empty(&address.street),
        street_number: or_empty(&address.street_number),
        postal_code,
        created_at: now,
    }
}

/// Full point-in-time copy of a project's address, status, and dates.
pub fn project_snapshot(
    project: &ProjectRecord,
    user_id: Option<Uuid>,
    clockin_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> ProjectHistorySnapshot {
    ProjectHistorySnapshot {
        id: Uuid::new_v4(),
        project_id: project.id,
        user_id,
        clockin_id,
        date: now,
        status: project.status,
        start_date: Some(project.start_date),
        end_date: project.end_date,
        state: or_empty(&project.state),
        city: or_empty(&project.city),
        street: or_empty(&project.street),
        street_number: or_empty(&project.street_number),
        postal_code: or_empty(&project.postal_code),
    }
}
