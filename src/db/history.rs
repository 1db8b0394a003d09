//! History snapshots: append helpers used inside other transactions, plus the
//! read and correction paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::collections::HashMap;
use uuid::Uuid;

use super::Database;
use crate::auth::Actor;
use crate::error::{Result, WorkflowError};
use crate::hours;
use crate::models::{ClockinHistorySnapshot, ProjectHistorySnapshot};

const CLOCKIN_HISTORY_COLUMNS: &str = "id, clockin_id, user_id, project_id, state, city, \
     street, street_number, postal_code, created_at";

pub(super) async fn insert_clockin_snapshot(
    conn: &mut PgConnection,
    s: &ClockinHistorySnapshot,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO clockin_history (id, clockin_id, user_id, project_id, state, city,
                                      street, street_number, postal_code, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(s.id)
    .bind(s.clockin_id)
    .bind(s.user_id)
    .bind(s.project_id)
    .bind(&s.state)
    .bind(&s.city)
    .bind(&s.street)
    .bind(&s.street_number)
    .bind(&s.postal_code)
    .bind(s.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub(super) async fn insert_project_snapshot(
    conn: &mut PgConnection,
    s: &ProjectHistorySnapshot,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO project_history (id, project_id, user_id, clockin_id, date, status,
                                      start_date, end_date, state, city, street,
                                      street_number, postal_code)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(s.id)
    .bind(s.project_id)
    .bind(s.user_id)
    .bind(s.clockin_id)
    .bind(s.date)
    .bind(s.status.as_str())
    .bind(s.start_date)
    .bind(s.end_date)
    .bind(&s.state)
    .bind(&s.city)
    .bind(&s.street)
    .bind(&s.street_number)
    .bind(&s.postal_code)
    .execute(conn)
    .await?;
    Ok(())
}

/// Clock-in history row with its clock-in's times and display names.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClockinHistoryEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub snapshot: ClockinHistorySnapshot,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub photo_path: Option<String>,
    pub user_name: String,
    pub project_name: Option<String>,
    /// Open clock-ins are measured up to the snapshot's creation time.
    #[sqlx(skip)]
    pub hours: f64,
}

/// Partial address correction; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryCorrection {
    pub state: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ProjectHistoryRow {
    #[sqlx(flatten)]
    snapshot: ProjectHistorySnapshot,
    project_name: String,
    user_name: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

/// One line of the grouped project history: a per-project TOTAL followed by
/// the individual snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectHistoryEntry {
    Total {
        project_id: Uuid,
        project_name: String,
        total_hours: f64,
    },
    Snapshot {
        #[serde(flatten)]
        snapshot: ProjectHistorySnapshot,
        project_name: String,
        user_name: Option<String>,
        hours: f64,
    },
}

impl Database {
    /// Newest first. `scope = None` lists every user's history.
    pub async fn list_clockin_history(
        &self,
        scope: Option<Uuid>,
    ) -> Result<Vec<ClockinHistoryEntry>> {
        let mut rows = sqlx::query_as::<_, ClockinHistoryEntry>(
            "SELECT h.id, h.clockin_id, h.user_id, h.project_id, h.state, h.city, h.street,
                    h.street_number, h.postal_code, h.created_at,
                    c.start_time, c.end_time, c.photo_path,
                    u.name AS user_name, p.name AS project_name
             FROM clockin_history h
             JOIN clockins c ON c.id = h.clockin_id
             JOIN users u ON u.id = h.user_id
             LEFT JOIN projects p ON p.id = h.project_id
             WHERE ($1::uuid IS NULL OR h.user_id = $1)
             ORDER BY h.created_at DESC",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        for row in &mut rows {
            let end = row.end_time.unwrap_or(row.snapshot.created_at);
            row.hours = hours::hours_between(row.start_time, end).max(0.0);
        }
        Ok(rows)
    }

    async fn clockin_history_owner(&self, id: Uuid) -> Result<Uuid> {
        sqlx::query_scalar("SELECT user_id FROM clockin_history WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("clock-in history {}", id)))
    }

    pub async fn correct_clockin_history(
        &self,
        actor: &Actor,
        id: Uuid,
        correction: &HistoryCorrection,
    ) -> Result<ClockinHistorySnapshot> {
        actor.ensure_owns(self.clockin_history_owner(id).await?)?;
        let row = sqlx::query_as::<_, ClockinHistorySnapshot>(&format!(
            "UPDATE clockin_history
             SET state = COALESCE($2, state),
                 city = COALESCE($3, city),
                 street = COALESCE($4, street),
                 street_number = COALESCE($5, street_number),
                 postal_code = COALESCE($6, postal_code)
             WHERE id = $1
             RETURNING {}",
            CLOCKIN_HISTORY_COLUMNS
        ))
        .bind(id)
        .bind(&correction.state)
        .bind(&correction.city)
        .bind(&correction.street)
        .bind(&correction.street_number)
        .bind(&correction.postal_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_clockin_history(&self, actor: &Actor, id: Uuid) -> Result<()> {
        actor.ensure_owns(self.clockin_history_owner(id).await?)?;
        sqlx::query("DELETE FROM clockin_history WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Snapshots of one project, oldest first.
    pub async fn project_snapshots(&self, project_id: Uuid) -> Result<Vec<ProjectHistorySnapshot>> {
        let rows = sqlx::query_as::<_, ProjectHistorySnapshot>(
            "SELECT id, project_id, user_id, clockin_id, date, status, start_date, end_date,
                    state, city, street, street_number, postal_code
             FROM project_history WHERE project_id = $1 ORDER BY date, id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Grouped project history. With `scope = Some(user)` both the snapshots
    /// and the totals are restricted to that user.
    pub async fn list_project_history(&self, scope: Option<Uuid>) -> Result<Vec<ProjectHistoryEntry>> {
        let rows = sqlx::query_as::<_, ProjectHistoryRow>(
            "SELECT h.id, h.project_id, h.user_id, h.clockin_id, h.date, h.status,
                    h.start_date, h.end_date, h.state, h.city, h.street, h.street_number,
                    h.postal_code, p.name AS project_name, u.name AS user_name,
                    c.start_time, c.end_time
             FROM project_history h
             JOIN projects p ON p.id = h.project_id
             LEFT JOIN users u ON u.id = h.user_id
             LEFT JOIN clockins c ON c.id = h.clockin_id
             WHERE ($1::uuid IS NULL OR h.user_id = $1)
             ORDER BY p.name, h.project_id, h.date",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        let totals: HashMap<Uuid, f64> = sqlx::query_as::<_, (Uuid, f64)>(
            "SELECT c.project_id,
                    COALESCE(SUM(EXTRACT(EPOCH FROM (c.end_time - c.start_time))), 0)::float8
             FROM clockins c
             WHERE c.project_id IS NOT NULL AND c.status = 'completed'
               AND ($1::uuid IS NULL OR c.user_id = $1)
             GROUP BY c.project_id",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        let mut out = Vec::with_capacity(rows.len() + totals.len());
        let mut current: Option<Uuid> = None;
        for row in rows {
            let project_id = row.snapshot.project_id;
            if current != Some(project_id) {
                current = Some(project_id);
                let seconds = totals.get(&project_id).copied().unwrap_or(0.0);
                out.push(ProjectHistoryEntry::Total {
                    project_id,
                    project_name: row.project_name.clone(),
                    total_hours: hours::round2(seconds / 3600.0),
                });
            }
            let hours = match (row.start_time, row.end_time) {
                (Some(start), Some(end)) => hours::hours_between(start, end),
                _ => 0.0,
            };
            out.push(ProjectHistoryEntry::Snapshot {
                snapshot: row.snapshot,
                project_name: row.project_name,
                user_name: row.user_name,
                hours,
            });
        }
        Ok(out)
    }
}
