//! Inference job runner.
//!
//! Workers pop [`QueuedJob`]s from the shared queue, run the detector on a
//! blocking thread, apply the approval policy, persist the photo, and write a
//! terminal [`JobOutcome`]. Every failure path (corrupt payload, unknown image
//! format, detector error or panic, photo write failure) becomes
//! `JobOutcome::Failed`; nothing propagates out of a worker loop.
//!
//! Completed handles are also broadcast in-process so local callers can await
//! a job instead of polling on a timer.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{sniff_image, ApprovalPolicy, Detector, JobHandle, JobOutcome, JobState, QueuedJob};
use crate::ephemeral::EphemeralStore;
use crate::error::{Result, WorkflowError};
use crate::photos::PhotoStore;
use crate::prom_metrics::{Metrics, OutcomeLabel};

/// Broadcast when a job reaches a terminal outcome.
#[derive(Debug, Clone)]
pub struct Completion {
    pub handle: JobHandle,
    pub outcome: JobOutcome,
}

pub struct Runner {
    store: EphemeralStore,
    detector: Arc<dyn Detector>,
    policy: Arc<dyn ApprovalPolicy>,
    photos: PhotoStore,
    metrics: Arc<Metrics>,
    completions: broadcast::Sender<Completion>,
}

impl Runner {
    pub fn new(
        store: EphemeralStore,
        detector: Arc<dyn Detector>,
        policy: Arc<dyn ApprovalPolicy>,
        photos: PhotoStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (completions, _) = broadcast::channel(256);
        Runner {
            store,
            detector,
            policy,
            photos,
            metrics,
            completions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Completion> {
        self.completions.subscribe()
    }

    /// Run one job to a terminal outcome and record it.
    pub async fn process(&self, job: QueuedJob) -> JobOutcome {
        let handle = job.handle;
        let outcome = match self.execute(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(handle = %handle, error = %e, "detection job failed");
                JobOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        if let Err(e) = self.store.set_outcome(&handle, &outcome).await {
            warn!(handle = %handle, error = %e, "failed to store job outcome");
        }
        self.metrics
            .jobs_processed
            .get_or_create(&OutcomeLabel::new(outcome.label()))
            .inc();
        info!(handle = %handle, outcome = outcome.label(), "detection job finished");
        // No receivers is the normal case outside tests.
        let _ = self.completions.send(Completion {
            handle,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn execute(&self, job: &QueuedJob) -> Result<JobOutcome> {
        let image = job.image_bytes()?;
        let kind = sniff_image(&image)?;

        let detector = Arc::clone(&self.detector);
        let (image, detections) = tokio::task::spawn_blocking(move || {
            let detections = detector.detect(&image);
            (image, detections)
        })
        .await
        .map_err(|e| WorkflowError::InferenceFailure(format!("detector panicked: {}", e)))?;
        let detections = detections?;

        let approved = self.policy.approve(&detections);
        debug!(
            handle = %job.handle,
            policy = self.policy.name(),
            detections = detections.len(),
            approved,
            "approval gate applied"
        );

        // Stored regardless of the gate decision.
        let photo_path = self.photos.save(&image, kind.extension()).await?;

        Ok(JobOutcome::Success {
            user_id: job.user_id,
            detections,
            approved,
            photo_path,
        })
    }

    /// Wait for `handle` to reach a terminal outcome, up to `timeout`.
    pub async fn wait_for(&self, handle: JobHandle, timeout: Duration) -> Option<JobOutcome> {
        let mut rx = self.subscribe();
        if let Ok(Some(JobState::Done(outcome))) = self.store.job_state(&handle).await {
            return Some(outcome);
        }
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(c) if c.handle == handle => return Some(c.outcome),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Ok(Some(JobState::Done(outcome))) =
                            self.store.job_state(&handle).await
                        {
                            return Some(outcome);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    /// Spawn `count` queue consumers. Idle workers re-check the queue every
    /// `poll_interval`.
    pub fn spawn_workers(self: &Arc<Self>, count: usize, poll_interval: Duration) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|worker| {
                let runner = Arc::clone(self);
                tokio::spawn(async move {
                    let mut idle = tokio::time::interval(poll_interval);
                    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    info!(worker, "detection worker started");
                    loop {
                        match runner.store.dequeue().await {
                            Ok(Some(job)) => {
                                runner.process(job).await;
                            }
                            Ok(None) => {
                                idle.tick().await;
                            }
                            Err(e) => {
                                warn!(worker, error = %e, "failed to read detection queue");
                                idle.tick().await;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
