//! # Database — PostgreSQL Storage Layer
//!
//! Durable state for the clock-in workflow via `sqlx::PgPool`.
//!
//! ## Schema
//!
//! - `users`: name, email, role (`admin | office | field`)
//! - `projects`: address, coordinates, lifecycle status and dates
//! - `clockins`: attendance records, `end_time` set iff `completed`
//! - `detections`: labels and confidences behind each gated clock-in
//! - `clockin_history` / `project_history`: append-only snapshots
//! - `user_locations`: geo samples, optionally tied to a clock-in
//!
//! ## Module Structure
//!
//! - [`clockins`]: gated/direct/office creation, end, modify, delete
//! - [`projects`]: CRUD, status transitions, promotion sweep
//! - [`history`]: snapshot inserts, history reads and corrections
//! - [`locations`]: location samples
//! - [`summary`]: hours aggregates
//! - [`users`]: user lookups
//!
//! ## Concurrency
//!
//! Multi-row mutations run in one transaction. End and modify lock the
//! clock-in row with `SELECT ... FOR UPDATE`, so two concurrent `end` calls
//! serialise and the second sees `completed`.

mod clockins;
mod history;
mod locations;
mod projects;
mod summary;
mod users;

pub use history::{ClockinHistoryEntry, HistoryCorrection, ProjectHistoryEntry};
pub use summary::{HoursSummary, MonthlyHours};
pub use users::UserRecord;

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

const SCHEMA: &str = include_str!("../../migrations/001_schema.sql");

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Credentials are percent-decoded from the URL before being handed to
    /// `PgConnectOptions`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema. Every statement is `IF NOT EXISTS`, so re-running is safe.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// `SELECT 1`, used by the `/readyz` probe.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
