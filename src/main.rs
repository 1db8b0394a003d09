//! # Main — CLI Entry Point
//!
//! ## Subcommands
//!
//! - `serve`: HTTP API, with detection workers in-process unless `--no-workers`.
//! - `worker`: detection workers only; shares jobs with the API through Redis.
//! - `promote`: run the project promotion sweep once.
//! - `migrate`: apply the database schema.
//! - `user`: create a user, or mint a bearer token for one.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--redis-url` / `REDIS_URL`: job store. Without it the API keeps jobs
//!   in memory, which only works with in-process workers.
//! - `--upload-dir` / `UPLOAD_DIR`: photo storage root.
//! - `--config` / `SITECLOCK_CONFIG`: TOML configuration file.
//! - `--jwt-secret` / `JWT_SECRET`: HS256 secret; unset means tokens are not verified.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "siteclock", about = "PPE-gated clock-in service for field crews")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis URL for the shared job store (or set REDIS_URL env var)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Directory where clock-in photos are written
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// TOML configuration file
    #[arg(long, env = "SITECLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// HS256 secret for bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Do not run detection workers in this process
        #[arg(long)]
        no_workers: bool,
    },
    /// Run detection workers against the shared job store
    Worker {
        /// Number of concurrent workers (defaults to the configured value)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Promote stale projects from start to in_progress once
    Promote,
    /// Apply the database schema
    Migrate,
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// admin, office, or field
        #[arg(long)]
        role: String,
    },
    /// Print a bearer token for a user id
    Token {
        #[arg(long)]
        user_id: uuid::Uuid,
        /// Token lifetime in hours
        #[arg(long, default_value_t = 12)]
        hours: u64,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let config = siteclock::config::load(cli.config.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    match &cli.command {
        Commands::Serve { port, no_workers } => {
            rt.block_on(cli::run_serve(&cli, config, *port, !*no_workers))
        }
        Commands::Worker { workers } => rt.block_on(cli::run_worker(&cli, config, *workers)),
        Commands::Promote => rt.block_on(cli::run_promote(&cli, config)),
        Commands::Migrate => rt.block_on(cli::run_migrate(&cli)),
        Commands::User { action } => match action {
            UserAction::Add { name, email, role } => {
                rt.block_on(cli::run_user_add(&cli, name, email, role))
            }
            UserAction::Token { user_id, hours } => cli::run_user_token(&cli, *user_id, *hours),
        },
    }
}
