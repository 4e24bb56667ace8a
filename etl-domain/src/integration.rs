//! Per-provider integration configuration, consumed from external CRUD
//! workflows. The core never mutates this except `last_sync_date`.

use chrono::{DateTime, Utc};
use etl_core::{IntegrationId, TenantId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Jira,
    Github,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Jira => "jira",
            Provider::Github => "github",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSettings {
    pub tenant_id: TenantId,
    pub integration_id: IntegrationId,
    pub provider: Provider,
    pub projects: Vec<String>,
    pub base_search_filter: Option<String>,
    pub batch_size: u32,
    pub rate_limit_per_window: u32,
    pub rate_limit_window_secs: u64,
    pub board_ids: Vec<String>,
    pub last_sync_date: DateTime<Utc>,
}

impl IntegrationSettings {
    /// Read the watermark for an incoming job: `old_last_sync_date` before
    /// the run, paired with `now` as the job's new watermark. Only the
    /// old value is persisted here; the new one travels in every message
    /// and is written back atomically on job completion.
    pub fn watermarks(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.last_sync_date, now)
    }
}
