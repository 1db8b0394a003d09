//! Location samples. Stored with a server-assigned timestamp; no link to
//! clock-in status is enforced.

use chrono::Utc;
use uuid::Uuid;

use super::Database;
use crate::error::Result;
use crate::models::LocationPoint;

const LOCATION_COLUMNS: &str = "id, user_id, clockin_id, latitude, longitude, timestamp";

impl Database {
    pub async fn record_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
        clockin_id: Option<Uuid>,
    ) -> Result<LocationPoint> {
        let point = sqlx::query_as::<_, LocationPoint>(&format!(
            "INSERT INTO user_locations (id, user_id, clockin_id, latitude, longitude, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            LOCATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(clockin_id)
        .bind(latitude)
        .bind(longitude)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(point)
    }

    /// Global feed, newest first. `scope` restricts to one user.
    pub async fn list_locations(&self, scope: Option<Uuid>) -> Result<Vec<LocationPoint>> {
        let rows = sqlx::query_as::<_, LocationPoint>(&format!(
            "SELECT {} FROM user_locations
             WHERE ($1::uuid IS NULL OR user_id = $1)
             ORDER BY timestamp DESC",
            LOCATION_COLUMNS
        ))
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Replay order for one clock-in: oldest first.
    pub async fn list_locations_for_clockin(&self, clockin_id: Uuid) -> Result<Vec<LocationPoint>> {
        let rows = sqlx::query_as::<_, LocationPoint>(&format!(
            "SELECT {} FROM user_locations WHERE clockin_id = $1 ORDER BY timestamp ASC",
            LOCATION_COLUMNS
        ))
        .bind(clockin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
