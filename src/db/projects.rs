//! Project persistence.
//!
//! ## Lifecycle
//!
//! 1. `create_project` inserts the project and its first history snapshot
//! 2. `update_project` locks the row, applies [`project::apply_update`], and
//!    appends a snapshot attributed to the actor and the project's most
//!    recently completed clock-in
//! 3. `promote_stale_projects` (daily sweep) moves old `start` projects to
//!    `in_progress`, one snapshot per promoted project
//! 4. `delete_project` (admin) removes project history first

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::history::insert_project_snapshot;
use super::Database;
use crate::auth::{Action, Actor};
use crate::error::{Result, WorkflowError};
use crate::history;
use crate::hours;
use crate::models::{ProjectRecord, ProjectView};
use crate::project::{self, NewProject, ProjectUpdate};

const PROJECT_COLUMNS: &str = "id, name, description, state, city, street, street_number, \
     postal_code, location_lat, location_long, status, start_date, end_date, created_at";

const PROJECT_VIEW_SELECT: &str = "SELECT p.id, p.name, p.description, p.state, p.city, \
     p.street, p.street_number, p.postal_code, p.location_lat, p.location_long, p.status, \
     p.start_date, p.end_date, p.created_at, \
     COALESCE(SUM(EXTRACT(EPOCH FROM (c.end_time - c.start_time))), 0)::float8 AS total_seconds \
     FROM projects p \
     LEFT JOIN clockins c ON c.project_id = p.id AND c.status = 'completed'";

#[derive(sqlx::FromRow)]
struct ProjectTotalsRow {
    #[sqlx(flatten)]
    project: ProjectRecord,
    total_seconds: f64,
}

impl From<ProjectTotalsRow> for ProjectView {
    fn from(row: ProjectTotalsRow) -> Self {
        ProjectView {
            project: row.project,
            total_hours: hours::round2(row.total_seconds / 3600.0),
        }
    }
}

pub(super) async fn fetch_project(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<ProjectRecord> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    sqlx::query_as::<_, ProjectRecord>(&format!(
        "SELECT {} FROM projects WHERE id = $1{}",
        PROJECT_COLUMNS, lock
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| WorkflowError::not_found(format!("project {}", id)))
}

async fn insert_project(conn: &mut PgConnection, p: &ProjectRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO projects (id, name, description, state, city, street, street_number,
                               postal_code, location_lat, location_long, status, start_date,
                               end_date, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(p.id)
    .bind(&p.name)
    .bind(&p.description)
    .bind(&p.state)
    .bind(&p.city)
    .bind(&p.street)
    .bind(&p.street_number)
    .bind(&p.postal_code)
    .bind(p.location_lat)
    .bind(p.location_long)
    .bind(p.status.as_str())
    .bind(p.start_date)
    .bind(p.end_date)
    .bind(p.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn write_project(conn: &mut PgConnection, p: &ProjectRecord) -> Result<()> {
    sqlx::query(
        "UPDATE projects
         SET name = $2, description = $3, state = $4, city = $5, street = $6,
             street_number = $7, postal_code = $8, location_lat = $9, location_long = $10,
             status = $11, start_date = $12, end_date = $13
         WHERE id = $1",
    )
    .bind(p.id)
    .bind(&p.name)
    .bind(&p.description)
    .bind(&p.state)
    .bind(&p.city)
    .bind(&p.street)
    .bind(&p.street_number)
    .bind(&p.postal_code)
    .bind(p.location_lat)
    .bind(p.location_long)
    .bind(p.status.as_str())
    .bind(p.start_date)
    .bind(p.end_date)
    .execute(conn)
    .await?;
    Ok(())
}

async fn last_completed_clockin(conn: &mut PgConnection, project_id: Uuid) -> Result<Option<Uuid>> {
    let id = sqlx::query_scalar(
        "SELECT id FROM clockins
         WHERE project_id = $1 AND status = 'completed'
         ORDER BY end_time DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

impl Database {
    pub async fn create_project(&self, actor: &Actor, new: NewProject) -> Result<ProjectRecord> {
        actor.ensure(Action::CreateProject)?;
        let now = Utc::now();
        let record = new.into_record(now)?;
        let mut tx = self.pool.begin().await?;
        insert_project(&mut tx, &record).await?;
        let snap = history::project_snapshot(&record, Some(actor.user_id), None, now);
        insert_project_snapshot(&mut tx, &snap).await?;
        tx.commit().await?;
        info!(project_id = %record.id, name = %record.name, "project created");
        Ok(record)
    }

    pub async fn get_project(&self, id: Uuid) -> Result<ProjectView> {
        sqlx::query_as::<_, ProjectTotalsRow>(&format!(
            "{} WHERE p.id = $1 GROUP BY p.id",
            PROJECT_VIEW_SELECT
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(ProjectView::from)
        .ok_or_else(|| WorkflowError::not_found(format!("project {}", id)))
    }

    /// Newest first.
    pub async fn list_projects(&self) -> Result<Vec<ProjectView>> {
        let rows = sqlx::query_as::<_, ProjectTotalsRow>(&format!(
            "{} GROUP BY p.id ORDER BY p.created_at DESC",
            PROJECT_VIEW_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ProjectView::from).collect())
    }

    pub async fn update_project(
        &self,
        actor: &Actor,
        id: Uuid,
        update: &ProjectUpdate,
    ) -> Result<ProjectRecord> {
        actor.ensure(Action::UpdateProject)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let current = fetch_project(&mut tx, id, true).await?;
        let next = project::apply_update(&current, update, now)?;
        write_project(&mut tx, &next).await?;
        let clockin_id = last_completed_clockin(&mut tx, id).await?;
        let snap = history::project_snapshot(&next, Some(actor.user_id), clockin_id, now);
        insert_project_snapshot(&mut tx, &snap).await?;
        tx.commit().await?;
        info!(project_id = %id, from = %current.status, to = %next.status, "project updated");
        Ok(next)
    }

    pub async fn delete_project(&self, actor: &Actor, id: Uuid) -> Result<()> {
        actor.ensure(Action::DeleteProject)?;
        let mut tx = self.pool.begin().await?;
        fetch_project(&mut tx, id, true).await?;
        sqlx::query("DELETE FROM project_history WHERE project_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(project_id = %id, "project deleted");
        Ok(())
    }

    /// Promote every `start` project created at or before `now - threshold`.
    /// Returns the promoted ids; a second run right after finds none.
    pub async fn promote_stale_projects(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let candidates = sqlx::query_as::<_, ProjectRecord>(&format!(
            "SELECT {} FROM projects
             WHERE status = 'start' AND created_at <= $1
             FOR UPDATE SKIP LOCKED",
            PROJECT_COLUMNS
        ))
        .bind(now - threshold)
        .fetch_all(&mut *tx)
        .await?;

        let mut promoted = Vec::with_capacity(candidates.len());
        for p in candidates
            .iter()
            .filter(|p| project::is_due_for_promotion(p, now, threshold))
        {
            let next = project::promote(p);
            write_project(&mut tx, &next).await?;
            let snap = history::project_snapshot(&next, None, None, now);
            insert_project_snapshot(&mut tx, &snap).await?;
            promoted.push(next.id);
        }
        tx.commit().await?;
        if !promoted.is_empty() {
            info!(count = promoted.len(), "promoted stale projects to in_progress");
        }
        Ok(promoted)
    }
}
