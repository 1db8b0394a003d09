//! Job submission and context attachment.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{JobContext, JobHandle, JobOrigin, QueuedJob};
use crate::ephemeral::EphemeralStore;
use crate::error::{Result, WorkflowError};
use crate::prom_metrics::Metrics;

#[derive(Clone)]
pub struct Dispatcher {
    store: EphemeralStore,
    metrics: Arc<Metrics>,
}

fn unavailable(e: WorkflowError) -> WorkflowError {
    match e {
        WorkflowError::Ephemeral(e) => WorkflowError::DispatchUnavailable(e.to_string()),
        other => other,
    }
}

impl Dispatcher {
    pub fn new(store: EphemeralStore, metrics: Arc<Metrics>) -> Self {
        Dispatcher { store, metrics }
    }

    /// Queue an inference job and return its handle without waiting for it.
    pub async fn submit(&self, image: &[u8], user_id: Uuid) -> Result<JobHandle> {
        if image.is_empty() {
            return Err(WorkflowError::validation("image must not be empty"));
        }
        let handle = JobHandle::new();
        let origin = JobOrigin {
            user_id,
            submitted_at: Utc::now(),
        };
        let job = QueuedJob::new(handle, user_id, image);
        self.store.enqueue(&job, &origin).await.map_err(unavailable)?;
        self.metrics.jobs_submitted.inc();
        info!(handle = %handle, user_id = %user_id, bytes = image.len(), "detection job submitted");
        Ok(handle)
    }

    /// Submit with the context already attached, so it cannot lose a race
    /// against resolution.
    pub async fn submit_with_context(
        &self,
        image: &[u8],
        user_id: Uuid,
        context: &JobContext,
    ) -> Result<JobHandle> {
        if image.is_empty() {
            return Err(WorkflowError::validation("image must not be empty"));
        }
        let handle = JobHandle::new();
        self.store
            .put_context(&handle, context)
            .await
            .map_err(unavailable)?;
        let origin = JobOrigin {
            user_id,
            submitted_at: Utc::now(),
        };
        let job = QueuedJob::new(handle, user_id, image);
        self.store.enqueue(&job, &origin).await.map_err(unavailable)?;
        self.metrics.jobs_submitted.inc();
        info!(handle = %handle, user_id = %user_id, "detection job submitted with context");
        Ok(handle)
    }

    /// Write (or overwrite) the context record for `handle`. Accepted for any
    /// handle, including ones already resolved; such writes are never read.
    pub async fn attach_context(&self, handle: &JobHandle, context: &JobContext) -> Result<()> {
        self.store
            .put_context(handle, context)
            .await
            .map_err(unavailable)?;
        debug!(handle = %handle, project_id = ?context.project_id, "job context attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::JobState;

    fn dispatcher() -> (Dispatcher, EphemeralStore) {
        let store = EphemeralStore::in_memory();
        (
            Dispatcher::new(store.clone(), Arc::new(Metrics::new())),
            store,
        )
    }

    #[tokio::test]
    async fn submit_writes_origin_and_queues() {
        let (d, store) = dispatcher();
        let user = Uuid::new_v4();
        let h = d.submit(b"\xFF\xD8\xFF", user).await.unwrap();
        assert_eq!(store.job_state(&h).await.unwrap(), Some(JobState::Pending));
        let (origin, context) = store.correlation(&h).await.unwrap();
        assert_eq!(origin.map(|o| o.user_id), Some(user));
        assert!(context.is_none());
        assert_eq!(store.dequeue().await.unwrap().map(|j| j.handle), Some(h));
    }

    #[tokio::test]
    async fn submit_rejects_empty_image() {
        let (d, store) = dispatcher();
        let err = d.submit(&[], Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn attach_context_last_write_wins() {
        let (d, store) = dispatcher();
        let h = d.submit(b"\xFF\xD8\xFF", Uuid::new_v4()).await.unwrap();
        let first = JobContext {
            postal_code: Some("11111".into()),
            latitude: Some(1.0),
            ..Default::default()
        };
        let second = JobContext {
            postal_code: Some("22222".into()),
            ..Default::default()
        };
        d.attach_context(&h, &first).await.unwrap();
        d.attach_context(&h, &second).await.unwrap();
        let (_, ctx) = store.correlation(&h).await.unwrap();
        assert_eq!(ctx, Some(second));
    }

    #[tokio::test]
    async fn attach_context_to_unknown_handle_is_inert() {
        let (d, store) = dispatcher();
        let h = JobHandle::new();
        d.attach_context(&h, &JobContext::default()).await.unwrap();
        assert_eq!(store.job_state(&h).await.unwrap(), None);
    }
}
