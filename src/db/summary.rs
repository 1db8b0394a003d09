//! Hours aggregates over completed clock-ins.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Database;
use crate::error::Result;
use crate::hours;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoursSummary {
    pub week_hours: f64,
    pub month_hours: f64,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyHours {
    /// `YYYY-MM` of the clock-in start.
    pub month: String,
    pub hours: f64,
}

/// First instant of `now`'s calendar month, UTC.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

impl Database {
    async fn completed_seconds_since(
        &self,
        scope: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<f64> {
        let secs: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(EXTRACT(EPOCH FROM (end_time - start_time))), 0)::float8
             FROM clockins
             WHERE status = 'completed'
               AND ($1::uuid IS NULL OR user_id = $1)
               AND ($2::timestamptz IS NULL OR start_time >= $2)",
        )
        .bind(scope)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(secs)
    }

    /// Week = last 7 days, month = since the first of the current month.
    pub async fn summary(&self, scope: Option<Uuid>, now: DateTime<Utc>) -> Result<HoursSummary> {
        let week = self
            .completed_seconds_since(scope, Some(now - Duration::days(7)))
            .await?;
        let month = self
            .completed_seconds_since(scope, Some(month_start(now)))
            .await?;
        let total = self.completed_seconds_since(scope, None).await?;
        Ok(HoursSummary {
            week_hours: hours::round2(week / 3600.0),
            month_hours: hours::round2(month / 3600.0),
            total_hours: hours::round2(total / 3600.0),
        })
    }

    /// Hours per calendar month of `start_time`, oldest first.
    pub async fn monthly_hours(&self, user_id: Uuid) -> Result<Vec<MonthlyHours>> {
        let rows = sqlx::query_as::<_, (String, f64)>(
            "SELECT to_char(date_trunc('month', start_time AT TIME ZONE 'UTC'), 'YYYY-MM') AS month,
                    COALESCE(SUM(EXTRACT(EPOCH FROM (end_time - start_time))), 0)::float8
             FROM clockins
             WHERE status = 'completed' AND user_id = $1
             GROUP BY 1
             ORDER BY 1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(month, secs)| MonthlyHours {
                month,
                hours: hours::round2(secs / 3600.0),
            })
            .collect())
    }
}
