//! Persistence boundary for [`JobDocument`]. The job-lifecycle
//! transitions in `job.rs` stay pure and unit-testable; this trait is
//! the only place I/O happens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etl_core::TenantId;
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobDocument;

pub mod memory;

pub type JobStoreResult<T> = Result<T, JobStoreError>;

#[derive(Error, Debug, Clone)]
pub enum JobStoreError {
    #[error("job not found: tenant={0} job_id={1}")]
    NotFound(TenantId, Uuid),
    #[error("job store error: {0}")]
    Other(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, tenant: TenantId, job_id: Uuid) -> JobStoreResult<JobDocument>;

    async fn upsert(&self, document: JobDocument) -> JobStoreResult<()>;

    /// Every job whose `reset_deadline` has passed, across all tenants —
    /// the completion watcher's scan set for settle-and-reset.
    async fn due_for_reset(&self, now: DateTime<Utc>) -> JobStoreResult<Vec<JobDocument>>;
}
