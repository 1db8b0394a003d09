//! Database integration tests for the PostgreSQL storage layer.
//!
//! # Prerequisites
//!
//! - A running PostgreSQL instance with `TEST_DATABASE_URL` set.
//!
//! ```bash
//! TEST_DATABASE_URL=postgres://... cargo test --test db_integration -- --test-threads=1
//! ```
//!
//! Each test starts from truncated tables via `common::setup_test_db()`.

mod common;

use chrono::{Duration, Utc};
use siteclock::clockin::{ClockinDraft, EndSpec, GatedClockin};
use siteclock::db::{HistoryCorrection, ProjectHistoryEntry};
use siteclock::detection::resolver::GatedClockinSink;
use siteclock::error::WorkflowError;
use siteclock::models::{Address, ClockinStatus, Detection, ProjectStatus, Role};
use siteclock::photos::PhotoStore;
use siteclock::project::{NewProject, ProjectUpdate};

macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

fn new_project(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        city: Some("Leipzig".into()),
        street: Some("Hauptstrasse".into()),
        street_number: Some("12".into()),
        postal_code: Some("04109".into()),
        ..Default::default()
    }
}

fn gated(user_id: uuid::Uuid, project_id: Option<uuid::Uuid>) -> GatedClockin {
    GatedClockin {
        job_handle: uuid::Uuid::new_v4(),
        draft: ClockinDraft {
            user_id,
            project_id,
            location_lat: Some(51.34),
            location_long: Some(12.37),
            postal_code: Some("04109".into()),
            photo_path: Some("/uploads/clockins/test.jpg".into()),
        },
        detections: vec![
            Detection {
                label: "helmet".into(),
                confidence: 0.91,
            },
            Detection {
                label: "vest".into(),
                confidence: 0.84,
            },
        ],
        address: Address {
            city: Some("Leipzig".into()),
            postal_code: Some("04109".into()),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn gated_clockin_writes_detections_and_history() {
    require_db!();
    let db = common::setup_test_db().await;
    let worker = common::seed_user(&db, "Field Worker", Role::Field).await;

    let view = db.create_gated(gated(worker.user_id, None)).await.unwrap();
    assert_eq!(view.clockin.status, ClockinStatus::InProgress);
    assert!(view.clockin.approved);
    assert_eq!(view.user_name, "Field Worker");

    let detections = db.detections_for(view.clockin.id).await.unwrap();
    assert_eq!(detections.len(), 2);

    let history = db.list_clockin_history(Some(worker.user_id)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].snapshot.clockin_id, view.clockin.id);
    assert_eq!(history[0].snapshot.city, "Leipzig");
    assert_eq!(history[0].snapshot.state, "");
}

#[tokio::test]
async fn gated_clockin_is_created_once_per_job() {
    require_db!();
    let db = common::setup_test_db().await;
    let worker = common::seed_user(&db, "w", Role::Field).await;
    let job = gated(worker.user_id, None);

    let first = db.create_gated_clockin(job.clone()).await.unwrap();
    let again = db.create_gated_clockin(job.clone()).await.unwrap();
    assert_eq!(again.clockin.id, first.clockin.id);

    let (a, b) = tokio::join!(
        db.create_gated_clockin(job.clone()),
        db.create_gated_clockin(job)
    );
    assert_eq!(a.unwrap().clockin.id, first.clockin.id);
    assert_eq!(b.unwrap().clockin.id, first.clockin.id);

    assert_eq!(db.list_clockins_for_user(worker.user_id).await.unwrap().len(), 1);
    assert_eq!(db.list_clockin_history(Some(worker.user_id)).await.unwrap().len(), 1);
    assert_eq!(db.detections_for(first.clockin.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn gated_clockin_for_unknown_project_is_rejected() {
    require_db!();
    let db = common::setup_test_db().await;
    let worker = common::seed_user(&db, "w", Role::Field).await;
    let err = db
        .create_gated_clockin(gated(worker.user_id, Some(uuid::Uuid::new_v4())))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
    assert!(db.list_clockins_for_user(worker.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn end_after_one_hour_records_one_hour() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    let project = db.create_project(&office, new_project("Depot")).await.unwrap();

    let view = db
        .create_direct_clockin(ClockinDraft {
            user_id: office.user_id,
            project_id: Some(project.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!view.clockin.approved);

    let ended = db
        .end_clockin(&office, view.clockin.id, EndSpec::from_elapsed_ms(3_600_000))
        .await
        .unwrap();
    assert_eq!(ended.status, ClockinStatus::Completed);
    assert_eq!(ended.end_time.unwrap() - ended.start_time, Duration::hours(1));

    let project_view = db.get_project(project.id).await.unwrap();
    assert_eq!(project_view.total_hours, 1.0);

    // create + end both snapshot the project; the end row names the clock-in.
    let snaps = db.project_snapshots(project.id).await.unwrap();
    assert_eq!(snaps.len(), 2);
    assert_eq!(snaps[1].clockin_id, Some(view.clockin.id));
}

#[tokio::test]
async fn second_end_is_an_invalid_transition() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    let view = db
        .create_direct_clockin(ClockinDraft {
            user_id: office.user_id,
            ..Default::default()
        })
        .await
        .unwrap();
    db.end_clockin(&office, view.clockin.id, EndSpec::from_elapsed_ms(60_000))
        .await
        .unwrap();
    let err = db
        .end_clockin(&office, view.clockin.id, EndSpec::from_elapsed_ms(60_000))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn only_owner_or_admin_may_end() {
    require_db!();
    let db = common::setup_test_db().await;
    let owner = common::seed_user(&db, "Owner", Role::Office).await;
    let other = common::seed_user(&db, "Other", Role::Office).await;
    let admin = common::seed_user(&db, "Admin", Role::Admin).await;
    let view = db
        .create_direct_clockin(ClockinDraft {
            user_id: owner.user_id,
            ..Default::default()
        })
        .await
        .unwrap();

    let err = db
        .modify_clockin_hours(&other, view.clockin.id, 2.0)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));

    let done = db
        .modify_clockin_hours(&admin, view.clockin.id, 2.5)
        .await
        .unwrap();
    assert_eq!(
        done.end_time.unwrap() - done.start_time,
        Duration::minutes(150)
    );
}

#[tokio::test]
async fn promotion_sweep_is_idempotent() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    let stale = db.create_project(&office, new_project("Stale")).await.unwrap();

    let later = Utc::now() + Duration::hours(25);
    let first = db
        .promote_stale_projects(later, Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(first, vec![stale.id]);
    let second = db
        .promote_stale_projects(later, Duration::hours(24))
        .await
        .unwrap();
    assert!(second.is_empty());

    let view = db.get_project(stale.id).await.unwrap();
    assert_eq!(view.project.status, ProjectStatus::InProgress);
    let snaps = db.project_snapshots(stale.id).await.unwrap();
    assert_eq!(snaps.len(), 2);
    assert_eq!(snaps[1].status, ProjectStatus::InProgress);
    assert_eq!(snaps[1].user_id, None);
}

#[tokio::test]
async fn fresh_projects_are_not_promoted() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    db.create_project(&office, new_project("Fresh")).await.unwrap();
    let promoted = db
        .promote_stale_projects(Utc::now(), Duration::hours(24))
        .await
        .unwrap();
    assert!(promoted.is_empty());
}

#[tokio::test]
async fn finishing_a_project_sets_end_date() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    let project = db.create_project(&office, new_project("Bridge")).await.unwrap();
    let updated = db
        .update_project(
            &office,
            project.id,
            &ProjectUpdate {
                status: Some(ProjectStatus::Finished),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, ProjectStatus::Finished);
    assert!(updated.end_date.is_some());
}

#[tokio::test]
async fn only_admin_deletes_projects() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    let admin = common::seed_user(&db, "Admin", Role::Admin).await;
    let project = db.create_project(&office, new_project("Tower")).await.unwrap();

    let err = db.delete_project(&office, project.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));
    db.delete_project(&admin, project.id).await.unwrap();
    assert!(matches!(
        db.get_project(project.id).await.unwrap_err(),
        WorkflowError::NotFound(_)
    ));
}

#[tokio::test]
async fn deleting_a_clockin_removes_history_and_photo() {
    require_db!();
    let db = common::setup_test_db().await;
    let uploads = tempfile::tempdir().unwrap();
    let photos = PhotoStore::new(uploads.path().to_path_buf());
    let photo_path = photos.save(common::JPEG, "jpg").await.unwrap();
    let on_disk = photos.resolve(&photo_path).unwrap();
    assert!(on_disk.exists());

    let office = common::seed_user(&db, "Office", Role::Office).await;
    let view = db
        .create_office_clockin(
            ClockinDraft {
                user_id: office.user_id,
                photo_path: Some(photo_path),
                ..Default::default()
            },
            &Address::default(),
        )
        .await
        .unwrap();
    assert_eq!(db.list_clockin_history(None).await.unwrap().len(), 1);

    db.delete_clockin(&office, view.clockin.id, &photos)
        .await
        .unwrap();
    assert!(db.list_clockin_history(None).await.unwrap().is_empty());
    assert!(!on_disk.exists());
    assert!(matches!(
        db.get_clockin(view.clockin.id).await.unwrap_err(),
        WorkflowError::NotFound(_)
    ));
}

#[tokio::test]
async fn history_corrections_only_touch_given_fields() {
    require_db!();
    let db = common::setup_test_db().await;
    let worker = common::seed_user(&db, "Field", Role::Field).await;
    db.create_gated_clockin(gated(worker.user_id, None))
        .await
        .unwrap();
    let entry = db
        .list_clockin_history(Some(worker.user_id))
        .await
        .unwrap()
        .remove(0);

    let corrected = db
        .correct_clockin_history(
            &worker,
            entry.snapshot.id,
            &HistoryCorrection {
                street: Some("Marktplatz".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(corrected.street, "Marktplatz");
    assert_eq!(corrected.city, "Leipzig");
}

#[tokio::test]
async fn project_history_groups_with_totals() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    let project = db.create_project(&office, new_project("Depot")).await.unwrap();
    let view = db
        .create_direct_clockin(ClockinDraft {
            user_id: office.user_id,
            project_id: Some(project.id),
            ..Default::default()
        })
        .await
        .unwrap();
    db.modify_clockin_hours(&office, view.clockin.id, 3.0)
        .await
        .unwrap();

    let entries = db.list_project_history(None).await.unwrap();
    match &entries[0] {
        ProjectHistoryEntry::Total {
            project_id,
            total_hours,
            ..
        } => {
            assert_eq!(*project_id, project.id);
            assert_eq!(*total_hours, 3.0);
        }
        other => panic!("expected a total row first, got {:?}", other),
    }
    assert!(entries[1..]
        .iter()
        .all(|e| matches!(e, ProjectHistoryEntry::Snapshot { .. })));
}

#[tokio::test]
async fn summary_counts_completed_hours_only() {
    require_db!();
    let db = common::setup_test_db().await;
    let office = common::seed_user(&db, "Office", Role::Office).await;
    let done = db
        .create_direct_clockin(ClockinDraft {
            user_id: office.user_id,
            ..Default::default()
        })
        .await
        .unwrap();
    db.modify_clockin_hours(&office, done.clockin.id, 1.5)
        .await
        .unwrap();
    db.create_direct_clockin(ClockinDraft {
        user_id: office.user_id,
        ..Default::default()
    })
    .await
    .unwrap();

    let summary = db.summary(Some(office.user_id), Utc::now()).await.unwrap();
    assert_eq!(summary.total_hours, 1.5);
    assert_eq!(summary.week_hours, 1.5);

    let monthly = db.monthly_hours(office.user_id).await.unwrap();
    assert_eq!(monthly.len(), 1);
    assert_eq!(monthly[0].hours, 1.5);
}

#[tokio::test]
async fn locations_replay_in_order() {
    require_db!();
    let db = common::setup_test_db().await;
    let worker = common::seed_user(&db, "Field", Role::Field).await;
    let view = db.create_gated_clockin(gated(worker.user_id, None)).await.unwrap();
    for i in 0..3 {
        db.record_location(worker.user_id, 51.0 + i as f64 * 0.01, 12.0, Some(view.clockin.id))
            .await
            .unwrap();
    }
    let replay = db.list_locations_for_clockin(view.clockin.id).await.unwrap();
    assert_eq!(replay.len(), 3);
    assert!(replay.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let feed = db.list_locations(Some(worker.user_id)).await.unwrap();
    assert!(feed.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}
