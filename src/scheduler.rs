//! Daily promotion sweep.
//!
//! Projects left in `start` for longer than the configured threshold are
//! promoted to `in_progress` once a day at `run_hour_utc`. The sweep filters
//! on `status = 'start'`, so running it twice promotes nothing the second time.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PromotionConfig;
use crate::db::Database;
use crate::error::{Result, WorkflowError};
use crate::project::next_daily_run;
use crate::prom_metrics::Metrics;

/// Run the sweep once. Returns how many projects were promoted.
pub async fn run_sweep(db: &Database, cfg: &PromotionConfig, metrics: &Metrics) -> Result<usize> {
    let threshold = cfg.threshold().ok_or_else(|| {
        WorkflowError::validation(format!(
            "promotion threshold of {} hours is out of range",
            cfg.threshold_hours
        ))
    })?;
    let promoted = db.promote_stale_projects(Utc::now(), threshold).await?;
    metrics.projects_promoted.inc_by(promoted.len() as u64);
    Ok(promoted.len())
}

/// Sleep until the next scheduled hour, sweep, repeat.
pub fn spawn_daily(db: Database, cfg: PromotionConfig, metrics: Arc<Metrics>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_daily_run(now, cfg.run_hour_utc);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "promotion sweep scheduled");
            tokio::time::sleep(wait).await;
            match run_sweep(&db, &cfg, &metrics).await {
                Ok(n) => info!(promoted = n, "promotion sweep finished"),
                Err(e) => warn!(error = %e, "promotion sweep failed"),
            }
        }
    })
}
