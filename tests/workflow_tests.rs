//! End-to-end tests of the PPE-gated clock-in pipeline.
//!
//! Submission, the runner, and the resolver run against the in-memory job
//! store, a scripted detector, and a sink that records gated clock-ins.
//! No database or network access is required.
//!
//! ```bash
//! cargo test --test workflow_tests
//! ```

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingSink, ScriptedDetector, JPEG};
use siteclock::detection::dispatch::Dispatcher;
use siteclock::detection::resolver::{PollOutcome, Resolver};
use siteclock::detection::runner::Runner;
use siteclock::detection::{JobContext, JobHandle, JobOutcome, NegativePrefix};
use siteclock::ephemeral::EphemeralStore;
use siteclock::models::Address;
use siteclock::photos::PhotoStore;
use siteclock::prom_metrics::Metrics;
use uuid::Uuid;

struct Pipeline {
    dispatcher: Dispatcher,
    runner: Runner,
    resolver: Arc<Resolver<RecordingSink>>,
    sink: RecordingSink,
    store: EphemeralStore,
    _uploads: tempfile::TempDir,
}

fn pipeline(labels: &[&'static str]) -> Pipeline {
    pipeline_with_sink(labels, RecordingSink::default())
}

fn pipeline_with_sink(labels: &[&'static str], sink: RecordingSink) -> Pipeline {
    let store = EphemeralStore::in_memory();
    let metrics = Arc::new(Metrics::new());
    let uploads = tempfile::tempdir().unwrap();
    Pipeline {
        dispatcher: Dispatcher::new(store.clone(), Arc::clone(&metrics)),
        runner: Runner::new(
            store.clone(),
            Arc::new(ScriptedDetector::new(labels)),
            Arc::new(NegativePrefix::new("not_")),
            PhotoStore::new(uploads.path().to_path_buf()),
            Arc::clone(&metrics),
        ),
        resolver: Arc::new(Resolver::new(
            store.clone(),
            sink.clone(),
            Duration::from_secs(30),
            metrics,
        )),
        sink,
        store,
        _uploads: uploads,
    }
}

impl Pipeline {
    /// Pop and process the next queued job.
    async fn run_one(&self) -> JobOutcome {
        let job = self
            .store
            .dequeue()
            .await
            .unwrap()
            .expect("a queued job");
        self.runner.process(job).await
    }
}

#[tokio::test]
async fn helmet_photo_creates_one_clockin() {
    let p = pipeline(&["helmet", "vest"]);
    let user = Uuid::new_v4();
    let handle = p.dispatcher.submit(JPEG, user).await.unwrap();

    assert!(matches!(
        p.resolver.poll(&handle).await.unwrap(),
        PollOutcome::Pending
    ));

    p.run_one().await;
    let outcome = p.resolver.poll(&handle).await.unwrap();
    let PollOutcome::Completed { clockin } = outcome else {
        panic!("expected completed, got {:?}", outcome);
    };
    assert_eq!(clockin.clockin.user_id, user);
    assert!(clockin.clockin.approved);
    assert!(clockin.clockin.end_time.is_none());
    assert!(clockin
        .clockin
        .photo_path
        .as_deref()
        .unwrap()
        .starts_with("/uploads/clockins/"));

    let created = p.sink.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    let labels: Vec<&str> = created[0].detections.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["helmet", "vest"]);
}

#[tokio::test]
async fn resolved_handle_becomes_unknown() {
    let p = pipeline(&["helmet"]);
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    p.run_one().await;

    assert!(matches!(
        p.resolver.poll(&handle).await.unwrap(),
        PollOutcome::Completed { .. }
    ));
    assert!(matches!(
        p.resolver.poll(&handle).await.unwrap(),
        PollOutcome::Unknown
    ));
    assert_eq!(p.sink.count(), 1);
}

#[tokio::test]
async fn negative_label_rejects_without_creating() {
    let p = pipeline(&["not_helmet", "vest"]);
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    let outcome = p.run_one().await;
    assert_eq!(outcome.label(), "rejected");

    match p.resolver.poll(&handle).await.unwrap() {
        PollOutcome::Rejected { reason } => assert!(reason.contains("not_helmet")),
        other => panic!("expected rejected, got {:?}", other),
    }
    assert!(matches!(
        p.resolver.poll(&handle).await.unwrap(),
        PollOutcome::Unknown
    ));
    assert_eq!(p.sink.count(), 0);
}

#[tokio::test]
async fn undecodable_image_fails_the_job() {
    let p = pipeline(&["helmet"]);
    let handle = p
        .dispatcher
        .submit(b"definitely not an image", Uuid::new_v4())
        .await
        .unwrap();
    let outcome = p.run_one().await;
    assert!(matches!(outcome, JobOutcome::Failed { .. }));

    assert!(matches!(
        p.resolver.poll(&handle).await.unwrap(),
        PollOutcome::Failed { .. }
    ));
    assert_eq!(p.sink.count(), 0);
}

#[tokio::test]
async fn never_submitted_handle_is_unknown() {
    let p = pipeline(&["helmet"]);
    assert!(matches!(
        p.resolver.poll(&JobHandle::new()).await.unwrap(),
        PollOutcome::Unknown
    ));
}

#[tokio::test]
async fn empty_upload_is_rejected_before_queueing() {
    let p = pipeline(&["helmet"]);
    assert!(p.dispatcher.submit(&[], Uuid::new_v4()).await.is_err());
    assert_eq!(p.store.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn context_attached_after_processing_is_used() {
    let p = pipeline(&["helmet"]);
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    p.run_one().await;

    let project = Uuid::new_v4();
    let ctx = JobContext {
        project_id: Some(project),
        latitude: Some(48.137),
        longitude: Some(11.575),
        city: Some("Munich".into()),
        postal_code: Some("80331".into()),
        ..Default::default()
    };
    p.dispatcher.attach_context(&handle, &ctx).await.unwrap();
    p.resolver.poll(&handle).await.unwrap();

    let created = p.sink.created.lock().unwrap();
    let gated = &created[0];
    assert_eq!(gated.draft.project_id, Some(project));
    assert_eq!(gated.draft.location_lat, Some(48.137));
    assert_eq!(gated.draft.postal_code.as_deref(), Some("80331"));
    assert_eq!(gated.address.city.as_deref(), Some("Munich"));
}

#[tokio::test]
async fn last_context_write_wins() {
    let p = pipeline(&["helmet"]);
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    let first = JobContext {
        city: Some("Berlin".into()),
        ..Default::default()
    };
    let second = JobContext {
        city: Some("Hamburg".into()),
        ..Default::default()
    };
    p.dispatcher.attach_context(&handle, &first).await.unwrap();
    p.dispatcher.attach_context(&handle, &second).await.unwrap();
    p.run_one().await;
    p.resolver.poll(&handle).await.unwrap();

    let created = p.sink.created.lock().unwrap();
    assert_eq!(created[0].address.city.as_deref(), Some("Hamburg"));
}

#[tokio::test]
async fn missing_context_means_no_project() {
    let p = pipeline(&["helmet"]);
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    p.run_one().await;
    p.resolver.poll(&handle).await.unwrap();

    let created = p.sink.created.lock().unwrap();
    assert_eq!(created[0].draft.project_id, None);
    assert_eq!(created[0].address, Address::default());
}

#[tokio::test]
async fn submit_with_context_carries_it_through() {
    let p = pipeline(&["helmet"]);
    let project = Uuid::new_v4();
    let ctx = JobContext {
        project_id: Some(project),
        ..Default::default()
    };
    let handle = p
        .dispatcher
        .submit_with_context(JPEG, Uuid::new_v4(), &ctx)
        .await
        .unwrap();
    p.run_one().await;
    p.resolver.poll(&handle).await.unwrap();
    assert_eq!(
        p.sink.created.lock().unwrap()[0].draft.project_id,
        Some(project)
    );
}

#[tokio::test]
async fn concurrent_polls_create_exactly_once() {
    let p = pipeline(&["helmet"]);
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    p.run_one().await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let resolver = Arc::clone(&p.resolver);
        tasks.push(tokio::spawn(async move { resolver.poll(&handle).await }));
    }
    let mut completed = 0;
    for t in tasks {
        match t.await.unwrap().unwrap() {
            PollOutcome::Completed { .. } => completed += 1,
            PollOutcome::Pending | PollOutcome::Unknown => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(p.sink.count(), 1);
}

#[tokio::test]
async fn failure_after_commit_does_not_create_twice() {
    let p = pipeline_with_sink(&["helmet"], RecordingSink::failing_after_record(1));
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    p.run_one().await;

    // The clock-in was written but the caller saw an error.
    assert!(p.resolver.poll(&handle).await.is_err());
    assert_eq!(p.sink.count(), 1);

    // The handle is still live, and the retry returns the same clock-in.
    let PollOutcome::Completed { clockin } = p.resolver.poll(&handle).await.unwrap() else {
        panic!("retry should complete");
    };
    let recorded_user = p.sink.created.lock().unwrap()[0].draft.user_id;
    assert_eq!(clockin.clockin.user_id, recorded_user);

    for _ in 0..3 {
        assert!(matches!(
            p.resolver.poll(&handle).await.unwrap(),
            PollOutcome::Unknown
        ));
    }
    assert_eq!(p.sink.count(), 1);
}

#[tokio::test]
async fn jobs_from_different_users_stay_separate() {
    let p = pipeline(&["helmet"]);
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let ha = p.dispatcher.submit(JPEG, alice).await.unwrap();
    let hb = p.dispatcher.submit(JPEG, bob).await.unwrap();
    assert_ne!(ha, hb);
    p.run_one().await;
    p.run_one().await;

    let PollOutcome::Completed { clockin: b } = p.resolver.poll(&hb).await.unwrap() else {
        panic!("bob's job should complete");
    };
    let PollOutcome::Completed { clockin: a } = p.resolver.poll(&ha).await.unwrap() else {
        panic!("alice's job should complete");
    };
    assert_eq!(a.clockin.user_id, alice);
    assert_eq!(b.clockin.user_id, bob);
}

#[tokio::test]
async fn wait_for_returns_once_the_worker_finishes() {
    let p = pipeline(&["helmet"]);
    let handle = p.dispatcher.submit(JPEG, Uuid::new_v4()).await.unwrap();
    let runner = Arc::new(p.runner);
    let workers = runner.spawn_workers(1, Duration::from_millis(10));

    let outcome = runner
        .wait_for(handle, Duration::from_secs(5))
        .await
        .expect("job should finish");
    assert_eq!(outcome.label(), "approved");
    for w in workers {
        w.abort();
    }
}

#[tokio::test]
async fn wait_for_times_out_for_unknown_handles() {
    let p = pipeline(&["helmet"]);
    let outcome = p
        .runner
        .wait_for(JobHandle::new(), Duration::from_millis(50))
        .await;
    assert!(outcome.is_none());
}
