//! Domain records shared by the state machines, the database layer, and the API.
//!
//! Status enums are stored as `TEXT` columns and decoded through
//! `TryFrom<String>`, so row types can derive `sqlx::FromRow` directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::WorkflowError;

// ── Clock-ins ──────────────────────────────────────────────────

/// Persisted clock-in lifecycle. "Pending detection" never reaches the
/// database: it only exists as a job handle in the ephemeral store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockinStatus {
    InProgress,
    Completed,
}

impl ClockinStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClockinStatus::InProgress => "in_progress",
            ClockinStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ClockinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockinStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ClockinStatus::InProgress),
            "completed" => Ok(ClockinStatus::Completed),
            other => Err(WorkflowError::validation(format!(
                "unknown clock-in status '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ClockinStatus {
    type Error = WorkflowError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ClockinRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: ClockinStatus,
    pub location_lat: Option<f64>,
    pub location_long: Option<f64>,
    pub postal_code: Option<String>,
    pub photo_path: Option<String>,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

/// Public representation of a clock-in: the record plus display names.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClockinView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub clockin: ClockinRecord,
    pub user_name: String,
    pub project_name: Option<String>,
}

/// A labeled detection produced by the inference function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
}

// ── Projects ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Start,
    InProgress,
    Finished,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Start => "start",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ProjectStatus::Start),
            "in_progress" => Ok(ProjectStatus::InProgress),
            "finished" => Ok(ProjectStatus::Finished),
            other => Err(WorkflowError::validation(format!(
                "unknown project status '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ProjectStatus {
    type Error = WorkflowError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Structured postal address. Every part is optional on input; snapshots
/// store missing parts as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub state: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub postal_code: Option<String>,
    pub location_lat: Option<f64>,
    pub location_long: Option<f64>,
    #[sqlx(try_from = "String")]
    pub status: ProjectStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn address(&self) -> Address {
        Address {
            state: self.state.clone(),
            city: self.city.clone(),
            street: self.street.clone(),
            street_number: self.street_number.clone(),
            postal_code: self.postal_code.clone(),
        }
    }
}

/// A project with its completed hours, as returned by project reads.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub project: ProjectRecord,
    pub total_hours: f64,
}

// ── History ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ClockinHistorySnapshot {
    pub id: Uuid,
    pub clockin_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub state: String,
    pub city: String,
    pub street: String,
    pub street_number: String,
    pub postal_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProjectHistorySnapshot {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Option<Uuid>,
    pub clockin_id: Option<Uuid>,
    pub date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: ProjectStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub state: String,
    pub city: String,
    pub street: String,
    pub street_number: String,
    pub postal_code: String,
}

// ── Locations ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LocationPoint {
    pub id: Uuid,
    pub user_id: Uuid,
    pub clockin_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

// ── Users ──────────────────────────────────────────────────────

/// Closed set of user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Office,
    Field,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Office => "office",
            Role::Field => "field",
        }
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "office" => Ok(Role::Office),
            "field" => Ok(Role::Field),
            other => Err(WorkflowError::validation(format!("unknown role '{}'", other))),
        }
    }
}
