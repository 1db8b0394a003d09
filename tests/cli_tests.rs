//! CLI integration tests using assert_cmd.
//!
//! Tests without database: always run (help, arg validation).
//! Tests with database: gated on TEST_DATABASE_URL environment variable.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn siteclock() -> Command {
    let mut cmd = Command::cargo_bin("siteclock").unwrap();
    cmd.env_remove("DATABASE_URL")
        .env_remove("REDIS_URL")
        .env_remove("JWT_SECRET")
        .env_remove("SITECLOCK_CONFIG");
    cmd
}

// --- Help and arg validation (no database needed) ---

#[test]
fn help_shows_all_subcommands() {
    siteclock().arg("--help").assert().success().stdout(
        predicate::str::contains("serve")
            .and(predicate::str::contains("worker"))
            .and(predicate::str::contains("promote"))
            .and(predicate::str::contains("migrate"))
            .and(predicate::str::contains("user")),
    );
}

#[test]
fn help_serve_shows_args() {
    siteclock()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--port").and(predicate::str::contains("--no-workers")));
}

#[test]
fn missing_subcommand_fails() {
    siteclock().assert().failure();
}

#[test]
fn promote_without_database_url_fails() {
    siteclock()
        .arg("promote")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DATABASE_URL is required"));
}

#[test]
fn worker_without_redis_fails() {
    siteclock()
        .arg("worker")
        .assert()
        .failure()
        .stderr(predicate::str::contains("REDIS_URL is required"));
}

#[test]
fn token_requires_a_secret() {
    siteclock()
        .args(["user", "token", "--user-id", "6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JWT_SECRET is required"));
}

#[test]
fn token_is_printed_with_a_secret() {
    siteclock()
        .args([
            "--jwt-secret",
            "cli-secret",
            "user",
            "token",
            "--user-id",
            "6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b",
        ])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^[\w-]+\.[\w-]+\.[\w-]+\n$").unwrap());
}

#[test]
fn unreadable_config_fails() {
    siteclock()
        .args(["--config", "/nonexistent/siteclock.toml", "promote"])
        .assert()
        .failure();
}

// --- With database ---

#[test]
fn migrate_and_add_user() {
    if !common::has_test_db() {
        eprintln!("Skipping: TEST_DATABASE_URL not set");
        return;
    }
    siteclock()
        .env("DATABASE_URL", common::test_db_url())
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema applied"));
    siteclock()
        .env("DATABASE_URL", common::test_db_url())
        .args([
            "user",
            "add",
            "--name",
            "CLI User",
            "--email",
            &format!("cli-{}@example.test", uuid::Uuid::new_v4()),
            "--role",
            "field",
        ])
        .assert()
        .success();
}
