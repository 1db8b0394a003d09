//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use siteclock::auth::Actor;
use siteclock::clockin::GatedClockin;
use siteclock::config::Config;
use siteclock::db::Database;
use siteclock::detection::resolver::GatedClockinSink;
use siteclock::detection::Detector;
use siteclock::ephemeral::EphemeralStore;
use siteclock::models::{ClockinStatus, ClockinView, Detection, Role};
use siteclock::photos::PhotoStore;
use siteclock::server::AppState;
use siteclock::WorkflowError;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Smallest byte sequence the image sniffer accepts as a JPEG.
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

static SCHEMA_INIT: Once = Once::new();

/// Apply the schema once per test binary.
pub fn ensure_schema() {
    SCHEMA_INIT.call_once(|| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let db = Database::connect(&test_db_url()).await.unwrap();
            db.migrate().await.unwrap();
        });
    });
}

/// Connect to the test database (also ensures schema is set up) and empty it.
pub async fn setup_test_db() -> Database {
    ensure_schema();
    let db = Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(db.pool()).await;
    db
}

pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE user_locations, detections, clockin_history, project_history,
                        clockins, projects, users
         CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_user(db: &Database, name: &str, role: Role) -> Actor {
    let email = format!("{}-{}@example.test", name, uuid::Uuid::new_v4());
    let user = db.insert_user(name, &email, role).await.unwrap();
    Actor::new(user.id, role)
}

/// App state over the test database, an in-memory job store, and a
/// throwaway upload directory.
pub async fn build_test_state(uploads: &std::path::Path) -> Arc<AppState> {
    let db = setup_test_db().await;
    AppState::new(
        db,
        EphemeralStore::in_memory(),
        PhotoStore::new(uploads.to_path_buf()),
        Config::default(),
        Some(JWT_SECRET.to_string()),
    )
}

pub fn bearer(actor: &Actor) -> String {
    let token =
        siteclock::server::middleware_auth::issue_token(actor.user_id, JWT_SECRET, 3600).unwrap();
    format!("Bearer {}", token)
}

// ── Fakes for the detection pipeline ───────────────────────────

/// Returns a fixed label set for every image.
pub struct ScriptedDetector {
    labels: Vec<&'static str>,
}

impl ScriptedDetector {
    pub fn new(labels: &[&'static str]) -> Self {
        ScriptedDetector {
            labels: labels.to_vec(),
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, _image: &[u8]) -> siteclock::Result<Vec<Detection>> {
        Ok(self
            .labels
            .iter()
            .map(|l| Detection {
                label: l.to_string(),
                confidence: 0.9,
            })
            .collect())
    }
}

/// Records every gated clock-in instead of persisting it. Clones share the
/// same state. Like the database sink, a repeat call for a job handle returns
/// the clock-in recorded the first time.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub created: Arc<Mutex<Vec<GatedClockin>>>,
    by_handle: Arc<Mutex<HashMap<Uuid, ClockinView>>>,
    /// Upcoming calls that record the clock-in and then report an error,
    /// the way a lost connection after COMMIT looks to the caller.
    fail_after_record: Arc<AtomicUsize>,
}

impl RecordingSink {
    /// The next `times` new clock-ins are recorded and then reported as errors.
    pub fn failing_after_record(times: usize) -> Self {
        let sink = RecordingSink::default();
        sink.fail_after_record.store(times, Ordering::SeqCst);
        sink
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

impl GatedClockinSink for RecordingSink {
    async fn create_gated(&self, gated: GatedClockin) -> siteclock::Result<ClockinView> {
        if let Some(existing) = self.by_handle.lock().unwrap().get(&gated.job_handle) {
            return Ok(existing.clone());
        }
        let record = gated.draft.clone().gated(chrono::Utc::now());
        assert_eq!(record.status, ClockinStatus::InProgress);
        let view = ClockinView {
            clockin: record,
            user_name: "test".to_string(),
            project_name: None,
        };
        self.by_handle
            .lock()
            .unwrap()
            .insert(gated.job_handle, view.clone());
        self.created.lock().unwrap().push(gated);
        let fail = self
            .fail_after_record
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(WorkflowError::Storage("connection lost after commit".into()));
        }
        Ok(view)
    }
}
