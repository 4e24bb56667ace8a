//! In-memory [`JobStore`], the same role [`crate::backend::memory::MemoryBackend`]
//! plays for [`crate::backend::QueueBackend`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etl_core::TenantId;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::job::JobDocument;
use crate::job_store::{JobStore, JobStoreError, JobStoreResult};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<(TenantId, Uuid), JobDocument>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, tenant: TenantId, job_id: Uuid) -> JobStoreResult<JobDocument> {
        self.jobs
            .lock()
            .get(&(tenant, job_id))
            .cloned()
            .ok_or(JobStoreError::NotFound(tenant, job_id))
    }

    async fn upsert(&self, document: JobDocument) -> JobStoreResult<()> {
        self.jobs.lock().insert((document.tenant_id, document.job_id), document);
        Ok(())
    }

    async fn due_for_reset(&self, now: DateTime<Utc>) -> JobStoreResult<Vec<JobDocument>> {
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|doc| doc.reset_deadline.map_or(false, |deadline| deadline <= now))
            .cloned()
            .collect())
    }
}
