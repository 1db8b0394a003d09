//! Result resolver: turns a terminal job outcome into a workflow answer.
//!
//! Each poll is a single non-blocking check. Once a job is terminal, the
//! first poller to take the per-handle lock consumes it: it reads the
//! correlation records, creates the clock-in if the gate passed, and deletes
//! every key for the handle. Concurrent pollers that lose the lock see
//! `Pending`; later pollers see `Unknown`.
//!
//! If creation fails the handle's keys stay in place and a later poll retries.
//! The sink is keyed by job handle, so a retry after a creation that did
//! commit returns the same clock-in instead of a second one.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{JobHandle, JobOutcome, JobState};
use crate::clockin::{ClockinDraft, GatedClockin};
use crate::ephemeral::EphemeralStore;
use crate::error::Result;
use crate::models::{ClockinView, Detection};
use crate::prom_metrics::{Metrics, OutcomeLabel};

/// Durable side of a gated clock-in: persist the record, its detections,
/// and the clock-in history snapshot as one unit.
///
/// Must be idempotent per [`GatedClockin::job_handle`]: a second call for the
/// same job returns the existing clock-in.
pub trait GatedClockinSink: Send + Sync {
    fn create_gated(&self, gated: GatedClockin) -> impl Future<Output = Result<ClockinView>> + Send;
}

/// Answer to one poll.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Not terminal yet, or another poller is resolving it right now.
    Pending,
    /// Never submitted, or already resolved by an earlier poll.
    Unknown,
    Failed { reason: String },
    Rejected { reason: String },
    Completed { clockin: ClockinView },
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Pending => "pending",
            PollOutcome::Unknown => "unknown",
            PollOutcome::Failed { .. } => "failed",
            PollOutcome::Rejected { .. } => "rejected",
            PollOutcome::Completed { .. } => "completed",
        }
    }
}

fn rejection_reason(detections: &[Detection]) -> String {
    let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
    if labels.is_empty() {
        "protective equipment check failed".to_string()
    } else {
        format!("protective equipment check failed: {}", labels.join(", "))
    }
}

pub struct Resolver<S> {
    store: EphemeralStore,
    sink: S,
    lock_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl<S: GatedClockinSink> Resolver<S> {
    pub fn new(store: EphemeralStore, sink: S, lock_ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Resolver {
            store,
            sink,
            lock_ttl,
            metrics,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome> {
        match self.store.job_state(handle).await? {
            None => return Ok(PollOutcome::Unknown),
            Some(JobState::Pending) => return Ok(PollOutcome::Pending),
            Some(JobState::Done(_)) => {}
        }

        let Some(token) = self.store.try_lock(handle, self.lock_ttl).await? else {
            debug!(handle = %handle, "resolve lock held by another poller");
            return Ok(PollOutcome::Pending);
        };

        // Re-read under the lock: an earlier holder may have consumed it.
        let outcome = match self.store.job_state(handle).await? {
            Some(JobState::Done(outcome)) => outcome,
            other => {
                self.store.unlock(handle, &token).await?;
                return Ok(match other {
                    None => PollOutcome::Unknown,
                    _ => PollOutcome::Pending,
                });
            }
        };

        match self.resolve(handle, outcome).await {
            Ok(answer) => {
                // The clock-in is committed; a leftover handle resolves to it again.
                if let Err(e) = self.store.finish(handle).await {
                    warn!(handle = %handle, error = %e, "failed to clear resolved job");
                }
                self.metrics
                    .resolutions
                    .get_or_create(&OutcomeLabel::new(answer.label()))
                    .inc();
                info!(handle = %handle, outcome = answer.label(), "detection job resolved");
                Ok(answer)
            }
            Err(e) => {
                if let Err(unlock_err) = self.store.unlock(handle, &token).await {
                    warn!(handle = %handle, error = %unlock_err, "failed to release resolve lock");
                }
                Err(e)
            }
        }
    }

    async fn resolve(&self, handle: &JobHandle, outcome: JobOutcome) -> Result<PollOutcome> {
        let (user_id, detections, photo_path) = match outcome {
            JobOutcome::Failed { error } => return Ok(PollOutcome::Failed { reason: error }),
            JobOutcome::Success {
                approved: false,
                detections,
                ..
            } => {
                return Ok(PollOutcome::Rejected {
                    reason: rejection_reason(&detections),
                })
            }
            JobOutcome::Success {
                user_id,
                detections,
                photo_path,
                ..
            } => (user_id, detections, photo_path),
        };

        let (origin, context) = self.store.correlation(handle).await?;
        if origin.is_none() {
            debug!(handle = %handle, "origin record missing; using runner's user id");
        }
        let user_id = origin.map(|o| o.user_id).unwrap_or(user_id);
        let context = context.unwrap_or_default();

        let gated = GatedClockin {
            job_handle: handle.as_uuid(),
            draft: ClockinDraft {
                user_id,
                project_id: context.project_id,
                location_lat: context.latitude,
                location_long: context.longitude,
                postal_code: context.postal_code.clone(),
                photo_path: Some(photo_path),
            },
            detections,
            address: context.address(),
        };
        let clockin = self.sink.create_gated(gated).await?;
        Ok(PollOutcome::Completed { clockin })
    }
}
