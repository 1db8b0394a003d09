//! Subcommand implementations for the `siteclock` binary.

use anyhow::{Context, Result};
use siteclock::config::Config;
use siteclock::db::Database;
use siteclock::detection::runner::Runner;
use siteclock::detection::{detector_from_config, policy_from_config};
use siteclock::ephemeral::EphemeralStore;
use siteclock::models::Role;
use siteclock::photos::PhotoStore;
use siteclock::prom_metrics::Metrics;
use siteclock::server::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::Cli;

async fn connect_db(cli: &Cli) -> Result<Database> {
    let database_url = cli.database_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
    })?;
    Database::connect(database_url)
        .await
        .context("connecting to PostgreSQL")
}

pub async fn run_serve(cli: &Cli, config: Config, port: u16, with_workers: bool) -> Result<()> {
    let db = connect_db(cli).await?;
    db.migrate().await.context("applying schema")?;

    let store = match cli.redis_url.as_deref() {
        Some(url) => EphemeralStore::connect(url).await?,
        None => {
            if !with_workers {
                anyhow::bail!("--no-workers needs REDIS_URL so external workers can see the queue");
            }
            warn!("REDIS_URL not set, detection jobs are kept in memory");
            EphemeralStore::in_memory()
        }
    };
    if cli.jwt_secret.is_none() {
        warn!("JWT_SECRET not set, bearer tokens are accepted without verification");
    }

    let photos = PhotoStore::new(cli.upload_dir.clone());
    let state = AppState::new(db, store, photos, config, cli.jwt_secret.clone());
    server::run(state, port, with_workers).await
}

pub async fn run_worker(cli: &Cli, config: Config, workers: Option<usize>) -> Result<()> {
    let redis_url = cli
        .redis_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("REDIS_URL is required for standalone workers"))?;
    let store = EphemeralStore::connect(redis_url).await?;
    let cfg = &config.detection;
    let runner = Arc::new(Runner::new(
        store,
        Arc::from(detector_from_config(cfg)),
        Arc::from(policy_from_config(&cfg.policy)),
        PhotoStore::new(cli.upload_dir.clone()),
        Arc::new(Metrics::new()),
    ));
    let count = workers.unwrap_or(cfg.workers);
    let handles = runner.spawn_workers(count, Duration::from_millis(cfg.poll_interval_ms));
    info!(workers = handles.len(), "detection workers running");

    server::shutdown_signal().await;
    for h in handles {
        h.abort();
    }
    info!("detection workers stopped");
    Ok(())
}

pub async fn run_promote(cli: &Cli, config: Config) -> Result<()> {
    let db = connect_db(cli).await?;
    let metrics = Metrics::new();
    let promoted = siteclock::scheduler::run_sweep(&db, &config.promotion, &metrics).await?;
    println!("Promoted {} project(s)", promoted);
    Ok(())
}

pub async fn run_migrate(cli: &Cli) -> Result<()> {
    let db = connect_db(cli).await?;
    db.migrate().await?;
    println!("Schema applied");
    Ok(())
}

pub async fn run_user_add(cli: &Cli, name: &str, email: &str, role: &str) -> Result<()> {
    let role: Role = role.parse()?;
    let db = connect_db(cli).await?;
    let user = db.insert_user(name, email, role).await?;
    println!("{}", user.id);
    Ok(())
}

pub fn run_user_token(cli: &Cli, user_id: Uuid, hours: u64) -> Result<()> {
    let secret = cli
        .jwt_secret
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("JWT_SECRET is required to sign tokens"))?;
    let token = server::middleware_auth::issue_token(user_id, secret, hours * 3600)?;
    println!("{}", token);
    Ok(())
}
