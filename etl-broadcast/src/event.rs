//! Progress events. Every event carries `tenant_id` and
//! `job_name`; the hub filters delivery to subscribers matching `tenant_id`.

use chrono::{DateTime, Utc};
use etl_core::TenantId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ProgressEvent {
    JobStarted { tenant_id: TenantId, job_name: String, job_id: Uuid },
    StepStatusChanged { tenant_id: TenantId, job_name: String, job_id: Uuid, step_name: String, stage: String, status: String },
    JobFinished { tenant_id: TenantId, job_name: String, job_id: Uuid },
    JobResetScheduled { tenant_id: TenantId, job_name: String, job_id: Uuid, deadline: DateTime<Utc> },
    JobResetCompleted { tenant_id: TenantId, job_name: String, job_id: Uuid },
    JobFailed { tenant_id: TenantId, job_name: String, job_id: Uuid, reason: String },
}

impl ProgressEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            ProgressEvent::JobStarted { tenant_id, .. }
            | ProgressEvent::StepStatusChanged { tenant_id, .. }
            | ProgressEvent::JobFinished { tenant_id, .. }
            | ProgressEvent::JobResetScheduled { tenant_id, .. }
            | ProgressEvent::JobResetCompleted { tenant_id, .. }
            | ProgressEvent::JobFailed { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn job_name(&self) -> &str {
        match self {
            ProgressEvent::JobStarted { job_name, .. }
            | ProgressEvent::StepStatusChanged { job_name, .. }
            | ProgressEvent::JobFinished { job_name, .. }
            | ProgressEvent::JobResetScheduled { job_name, .. }
            | ProgressEvent::JobResetCompleted { job_name, .. }
            | ProgressEvent::JobFailed { job_name, .. } => job_name,
        }
    }
}
