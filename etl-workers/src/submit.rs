//! Job submission: the only way a new sync starts. A provider's step
//! sequence is declared once (`etl_providers::steps_for`); submission
//! always begins at step 0, and every step's kickoff message represents
//! the whole step rather than one record, so it always carries
//! `first_item=true, last_item=true, last_job_item=false` —
//! `last_job_item` only ever becomes true on the Transform/Embedding
//! messages the extraction worker derives from it.

use chrono::{DateTime, Utc};
use etl_core::{IntegrationId, TenantId};
use etl_domain::Provider;
use etl_queue::{Envelope, JobDocument, JobStore, QueueBackend, QueueKind};
use uuid::Uuid;

use crate::error::WorkerResult;

/// Start a new sync job for `(tenant, integration)` against `provider`,
/// watermarked from `last_sync_date`. Returns `(job_id, token)`.
pub async fn submit_sync_job(
    job_store: &dyn JobStore,
    queue: &dyn QueueBackend,
    tenant_id: TenantId,
    integration_id: IntegrationId,
    provider: Provider,
    job_name: impl Into<String>,
    last_sync_date: DateTime<Utc>,
) -> WorkerResult<(Uuid, Uuid)> {
    let steps = etl_providers::steps_for(provider);
    let step_names: Vec<&str> = steps.iter().map(|s| s.name).collect();

    let job_id = Uuid::new_v4();
    let token = Uuid::new_v4();
    let doc = JobDocument::new(tenant_id, integration_id, job_id, job_name, token, &step_names, last_sync_date);
    job_store.upsert(doc).await?;

    let first_step = steps.first().expect("every provider declares at least one step");
    let envelope = Envelope::new(tenant_id, integration_id, job_id, first_step.name, first_step.name, token, last_sync_date, Utc::now()).with_markers(true, true, false);
    queue.publish(QueueKind::Extraction, tenant_id, envelope).await?;

    Ok((job_id, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_queue::{MemoryBackend, MemoryJobStore};

    #[tokio::test]
    async fn submitting_seeds_a_job_document_and_a_step_zero_trigger() {
        let job_store = MemoryJobStore::new();
        let queue = MemoryBackend::new();
        let tenant = TenantId(1);

        let (job_id, token) = submit_sync_job(&job_store, &queue, tenant, IntegrationId(1), Provider::Jira, "sync", Utc::now()).await.unwrap();

        let job = job_store.get(tenant, job_id).await.unwrap();
        assert_eq!(job.token, token);
        assert_eq!(job.steps.len(), etl_providers::jira_steps().len());

        let (envelope, _ack) = queue.consume(QueueKind::Extraction, tenant).await.unwrap();
        assert_eq!(envelope.step_name, "jira_projects_and_issue_types");
        assert!(envelope.first_item && envelope.last_item && !envelope.last_job_item);
    }
}
