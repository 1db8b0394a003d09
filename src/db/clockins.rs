//! Clock-in persistence: creation paths, end/modify under a row lock, and
//! cascading delete.

use chrono::Utc;
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::history::{insert_clockin_snapshot, insert_project_snapshot};
use super::projects::fetch_project;
use super::Database;
use crate::auth::Actor;
use crate::clockin::{self, ClockinDraft, EndSpec, GatedClockin};
use crate::detection::resolver::GatedClockinSink;
use crate::error::{Result, WorkflowError};
use crate::history;
use crate::models::{Address, ClockinRecord, ClockinView, Detection};
use crate::photos::PhotoStore;

const CLOCKIN_COLUMNS: &str = "id, user_id, project_id, start_time, end_time, status, \
     location_lat, location_long, postal_code, photo_path, approved, created_at";

pub(super) const VIEW_SELECT: &str = "SELECT c.id, c.user_id, c.project_id, c.start_time, \
     c.end_time, c.status, c.location_lat, c.location_long, c.postal_code, c.photo_path, \
     c.approved, c.created_at, u.name AS user_name, p.name AS project_name \
     FROM clockins c \
     JOIN users u ON u.id = c.user_id \
     LEFT JOIN projects p ON p.id = c.project_id";

/// Returns false when a clock-in for `job_handle` already exists.
async fn insert_clockin(
    conn: &mut PgConnection,
    rec: &ClockinRecord,
    job_handle: Option<Uuid>,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO clockins (id, user_id, project_id, start_time, end_time, status,
                               location_lat, location_long, postal_code, photo_path,
                               approved, created_at, job_handle)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (job_handle) DO NOTHING",
    )
    .bind(rec.id)
    .bind(rec.user_id)
    .bind(rec.project_id)
    .bind(rec.start_time)
    .bind(rec.end_time)
    .bind(rec.status.as_str())
    .bind(rec.location_lat)
    .bind(rec.location_long)
    .bind(&rec.postal_code)
    .bind(&rec.photo_path)
    .bind(rec.approved)
    .bind(rec.created_at)
    .bind(job_handle)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn fetch_view_by_handle(
    conn: &mut PgConnection,
    job_handle: Uuid,
) -> Result<Option<ClockinView>> {
    let view =
        sqlx::query_as::<_, ClockinView>(&format!("{} WHERE c.job_handle = $1", VIEW_SELECT))
            .bind(job_handle)
            .fetch_optional(conn)
            .await?;
    Ok(view)
}

async fn fetch_view(conn: &mut PgConnection, id: Uuid) -> Result<ClockinView> {
    sqlx::query_as::<_, ClockinView>(&format!("{} WHERE c.id = $1", VIEW_SELECT))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| WorkflowError::not_found(format!("clock-in {}", id)))
}

async fn insert_detections(
    conn: &mut PgConnection,
    clockin_id: Uuid,
    detections: &[Detection],
) -> Result<()> {
    for d in detections {
        sqlx::query("INSERT INTO detections (clockin_id, label, confidence) VALUES ($1, $2, $3)")
            .bind(clockin_id)
            .bind(&d.label)
            .bind(d.confidence)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn lock_clockin(conn: &mut PgConnection, id: Uuid) -> Result<ClockinRecord> {
    sqlx::query_as::<_, ClockinRecord>(&format!(
        "SELECT {} FROM clockins WHERE id = $1 FOR UPDATE",
        CLOCKIN_COLUMNS
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| WorkflowError::not_found(format!("clock-in {}", id)))
}

async fn ensure_user(conn: &mut PgConnection, user_id: Uuid) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(conn)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(WorkflowError::not_found(format!("user {}", user_id)))
    }
}

async fn write_completion(
    conn: &mut PgConnection,
    actor: &Actor,
    next: &ClockinRecord,
) -> Result<()> {
    sqlx::query("UPDATE clockins SET end_time = $2, status = $3 WHERE id = $1")
        .bind(next.id)
        .bind(next.end_time)
        .bind(next.status.as_str())
        .execute(&mut *conn)
        .await?;
    if let Some(project_id) = next.project_id {
        let project = fetch_project(&mut *conn, project_id, false).await?;
        let snap = history::project_snapshot(&project, Some(actor.user_id), Some(next.id), Utc::now());
        insert_project_snapshot(conn, &snap).await?;
    }
    Ok(())
}

impl Database {
    pub async fn get_clockin(&self, id: Uuid) -> Result<ClockinView> {
        let mut conn = self.pool.acquire().await?;
        fetch_view(&mut conn, id).await
    }

    /// Newest first.
    pub async fn list_clockins_for_user(&self, user_id: Uuid) -> Result<Vec<ClockinView>> {
        let rows = sqlx::query_as::<_, ClockinView>(&format!(
            "{} WHERE c.user_id = $1 ORDER BY c.start_time DESC",
            VIEW_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn detections_for(&self, clockin_id: Uuid) -> Result<Vec<Detection>> {
        let rows = sqlx::query_as::<_, Detection>(
            "SELECT label, confidence FROM detections WHERE clockin_id = $1 ORDER BY id",
        )
        .bind(clockin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Gated creation: clock-in, detections, and clock-in history snapshot in
    /// one transaction. Idempotent per job handle: a repeat call returns the
    /// clock-in the first call created.
    pub async fn create_gated_clockin(&self, gated: GatedClockin) -> Result<ClockinView> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        if let Some(existing) = fetch_view_by_handle(&mut tx, gated.job_handle).await? {
            info!(
                clockin_id = %existing.clockin.id,
                handle = %gated.job_handle,
                "gated clock-in already recorded"
            );
            return Ok(existing);
        }
        ensure_user(&mut tx, gated.draft.user_id).await?;
        if let Some(project_id) = gated.draft.project_id {
            fetch_project(&mut tx, project_id, false).await?;
        }
        let record = gated.draft.gated(now);
        if !insert_clockin(&mut tx, &record, Some(gated.job_handle)).await? {
            // Lost a race with another resolver for the same job.
            return fetch_view_by_handle(&mut tx, gated.job_handle)
                .await?
                .ok_or_else(|| {
                    WorkflowError::not_found(format!("clock-in for job {}", gated.job_handle))
                });
        }
        insert_detections(&mut tx, record.id, &gated.detections).await?;
        let snap = history::clockin_snapshot(&record, &gated.address, now);
        insert_clockin_snapshot(&mut tx, &snap).await?;
        let view = fetch_view(&mut tx, record.id).await?;
        tx.commit().await?;
        info!(clockin_id = %record.id, user_id = %record.user_id, "gated clock-in created");
        Ok(view)
    }

    /// Non-gated creation. `approved` stays false and no history is written.
    pub async fn create_direct_clockin(&self, draft: ClockinDraft) -> Result<ClockinView> {
        let mut conn = self.pool.acquire().await?;
        ensure_user(&mut conn, draft.user_id).await?;
        if let Some(project_id) = draft.project_id {
            fetch_project(&mut conn, project_id, false).await?;
        }
        let record = draft.direct(Utc::now());
        insert_clockin(&mut conn, &record, None).await?;
        drop(conn);
        info!(clockin_id = %record.id, user_id = %record.user_id, "direct clock-in created");
        self.get_clockin(record.id).await
    }

    /// Office path: a photo and an address without the detection gate. Writes
    /// the clock-in history snapshot and, when a project is set, a project
    /// snapshot.
    pub async fn create_office_clockin(
        &self,
        draft: ClockinDraft,
        address: &Address,
    ) -> Result<ClockinView> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        ensure_user(&mut tx, draft.user_id).await?;
        let project = match draft.project_id {
            Some(id) => Some(fetch_project(&mut tx, id, false).await?),
            None => None,
        };
        let record = draft.direct(now);
        insert_clockin(&mut tx, &record, None).await?;
        let snap = history::clockin_snapshot(&record, address, now);
        insert_clockin_snapshot(&mut tx, &snap).await?;
        if let Some(project) = project {
            let psnap =
                history::project_snapshot(&project, Some(record.user_id), Some(record.id), now);
            insert_project_snapshot(&mut tx, &psnap).await?;
        }
        tx.commit().await?;
        info!(clockin_id = %record.id, user_id = %record.user_id, "office clock-in created");
        self.get_clockin(record.id).await
    }

    /// `in_progress -> completed`, plus a project snapshot when a project is set.
    pub async fn end_clockin(&self, actor: &Actor, id: Uuid, spec: EndSpec) -> Result<ClockinRecord> {
        let mut tx = self.pool.begin().await?;
        let current = lock_clockin(&mut tx, id).await?;
        actor.ensure_owns(current.user_id)?;
        let next = clockin::end(&current, spec)?;
        write_completion(&mut tx, actor, &next).await?;
        tx.commit().await?;
        info!(clockin_id = %id, "clock-in ended");
        Ok(next)
    }

    /// Manual correction: `end_time = start_time + hours`.
    pub async fn modify_clockin_hours(
        &self,
        actor: &Actor,
        id: Uuid,
        hours: f64,
    ) -> Result<ClockinRecord> {
        let mut tx = self.pool.begin().await?;
        let current = lock_clockin(&mut tx, id).await?;
        actor.ensure_owns(current.user_id)?;
        let next = clockin::modify_hours(&current, hours)?;
        write_completion(&mut tx, actor, &next).await?;
        tx.commit().await?;
        info!(clockin_id = %id, hours, "clock-in hours modified");
        Ok(next)
    }

    /// Delete a clock-in with its history rows, then remove its photo.
    /// Photo removal is best-effort.
    pub async fn delete_clockin(&self, actor: &Actor, id: Uuid, photos: &PhotoStore) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let current = lock_clockin(&mut tx, id).await?;
        actor.ensure_owns(current.user_id)?;
        sqlx::query("DELETE FROM clockin_history WHERE clockin_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM project_history WHERE clockin_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM clockins WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        if let Some(path) = &current.photo_path {
            photos.delete(path).await;
        }
        info!(clockin_id = %id, "clock-in deleted");
        Ok(())
    }
}

impl GatedClockinSink for Database {
    async fn create_gated(&self, gated: GatedClockin) -> Result<ClockinView> {
        self.create_gated_clockin(gated).await
    }
}
