//! Job completion watcher. Runs as a single background task per
//! pipeline, independent of any one tenant's worker loops, since reset
//! eligibility is purely a function of the job document and queue
//! state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use etl_broadcast::{ProgressBroadcaster, ProgressEvent};
use etl_queue::{JobStore, QueueBackend, QueueKind};
use tracing::{info, instrument};

use crate::error::WorkerResult;

pub struct CompletionWatcher {
    pub job_store: Arc<dyn JobStore>,
    pub queue: Arc<dyn QueueBackend>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    /// `{60s, 180s, 300s}` by default, indexed by `reset_attempt` and
    /// clamped to the last entry.
    pub reset_backoff_schedule: Vec<Duration>,
    pub poll_interval: Duration,
}

impl CompletionWatcher {
    /// Run forever, polling every `poll_interval`. Exits only if the
    /// underlying store/queue return an unrecoverable error.
    pub async fn run(&self) -> WorkerResult<()> {
        loop {
            self.tick(Utc::now()).await?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One polling pass: re-check every job whose `reset_deadline` has
    /// elapsed, either completing the reset or deferring it. Returns the
    /// number of jobs examined, for tests and operational logging.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> WorkerResult<usize> {
        let due = self.job_store.due_for_reset(now).await?;
        let count = due.len();

        for mut job in due {
            let settled = job.all_steps_settled();
            let work_remains = if settled {
                self.queue.peek_token(QueueKind::Embedding, job.tenant_id, job.token).await?
            } else {
                true
            };

            if settled && !work_remains {
                job.reset_to_ready();
                self.job_store.upsert(job.clone()).await?;
                self.broadcaster.publish(ProgressEvent::JobResetCompleted {
                    tenant_id: job.tenant_id,
                    job_name: job.job_name.clone(),
                    job_id: job.job_id,
                });
                info!(job_id = %job.job_id, "settle-and-reset complete, job back to READY");
            } else {
                job.defer_reset(now, &self.reset_backoff_schedule);
                let deadline = job.reset_deadline.expect("defer_reset always sets a deadline");
                self.job_store.upsert(job.clone()).await?;
                self.broadcaster.publish(ProgressEvent::JobResetScheduled {
                    tenant_id: job.tenant_id,
                    job_name: job.job_name.clone(),
                    job_id: job.job_id,
                    deadline,
                });
                info!(job_id = %job.job_id, attempt = job.reset_attempt, deadline = %deadline, "settle-and-reset deferred");
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::{IntegrationId, TenantId};
    use etl_queue::job::Stage;
    use etl_queue::{Envelope, JobDocument, MemoryBackend, MemoryJobStore};
    use uuid::Uuid;

    fn watcher(job_store: Arc<MemoryJobStore>, queue: Arc<MemoryBackend>) -> CompletionWatcher {
        CompletionWatcher {
            job_store,
            queue,
            broadcaster: Arc::new(ProgressBroadcaster::new(16)),
            reset_backoff_schedule: vec![Duration::from_secs(60), Duration::from_secs(180), Duration::from_secs(300)],
            poll_interval: Duration::from_millis(1),
        }
    }

    fn finished_job(tenant: TenantId, job_id: Uuid, token: Uuid, reset_deadline: DateTime<Utc>) -> JobDocument {
        let mut doc = JobDocument::new(tenant, IntegrationId(1), job_id, "sync", token, &["only_step"], Utc::now());
        for stage in [Stage::Extraction, Stage::Transform, Stage::Embedding] {
            doc.apply_first_item("only_step", stage);
            doc.apply_last_item("only_step", stage);
        }
        doc.complete(Utc::now(), reset_deadline);
        doc
    }

    #[tokio::test]
    async fn settled_job_with_no_queued_work_resets_to_ready() {
        let tenant = TenantId(1);
        let job_id = Uuid::new_v4();
        let token = Uuid::new_v4();
        let now = Utc::now();

        let job_store = Arc::new(MemoryJobStore::new());
        job_store.upsert(finished_job(tenant, job_id, token, now - chrono::Duration::seconds(1))).await.unwrap();
        let queue = Arc::new(MemoryBackend::new());

        let watcher = watcher(job_store.clone(), queue);
        let examined = watcher.tick(now).await.unwrap();
        assert_eq!(examined, 1);

        let job = job_store.get(tenant, job_id).await.unwrap();
        assert_eq!(job.overall, etl_queue::OverallStatus::Ready);
        assert!(job.reset_deadline.is_none());
    }

    #[tokio::test]
    async fn settled_job_with_queued_embedding_work_defers_instead_of_resetting() {
        let tenant = TenantId(1);
        let job_id = Uuid::new_v4();
        let token = Uuid::new_v4();
        let now = Utc::now();

        let job_store = Arc::new(MemoryJobStore::new());
        job_store.upsert(finished_job(tenant, job_id, token, now - chrono::Duration::seconds(1))).await.unwrap();

        let queue = Arc::new(MemoryBackend::new());
        let stray = Envelope::new(tenant, IntegrationId(1), job_id, "only_step", "issue", token, now, now);
        queue.publish(QueueKind::Embedding, tenant, stray).await.unwrap();

        let watcher = watcher(job_store.clone(), queue);
        watcher.tick(now).await.unwrap();

        let job = job_store.get(tenant, job_id).await.unwrap();
        assert_eq!(job.overall, etl_queue::OverallStatus::Finished);
        assert_eq!(job.reset_attempt, 1);
        assert!(job.reset_deadline.unwrap() > now);
    }

    #[tokio::test]
    async fn jobs_not_yet_past_their_deadline_are_left_alone() {
        let tenant = TenantId(1);
        let job_id = Uuid::new_v4();
        let now = Utc::now();

        let job_store = Arc::new(MemoryJobStore::new());
        job_store.upsert(finished_job(tenant, job_id, Uuid::new_v4(), now + chrono::Duration::seconds(30))).await.unwrap();
        let queue = Arc::new(MemoryBackend::new());

        let watcher = watcher(job_store.clone(), queue);
        let examined = watcher.tick(now).await.unwrap();
        assert_eq!(examined, 0);
    }
}
