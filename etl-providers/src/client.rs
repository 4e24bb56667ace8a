//! The provider client boundary. This crate does not implement Jira or GitHub's REST APIs;
//! it only declares the request/response shape an extraction worker needs
//! and the uniform error surface in [`crate::error`]. A concrete client
//! (built on `reqwest`, per the workspace's dependency stack) is a drop-in
//! implementer of this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etl_domain::IntegrationSettings;
use serde_json::Value;

use crate::error::ProviderError;
use crate::steps::StepSpec;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// One request for one step's worth of work. `cursor` carries the
/// provider's own pagination token; `None` on the first page of a step.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub step: &'static StepSpec,
    pub settings: IntegrationSettings,
    pub watermark: DateTime<Utc>,
    pub cursor: Option<String>,
    /// Whether this step is eligible to run for the current issue/tenant.
    /// Only meaningful for steps gated on tenant configuration (Jira's
    /// `jira_dev_status` on `CustomFieldMapping::has_development_field`);
    /// `true` for every other step. A client must not fetch when this is
    /// `false` — the worker only sets it `false` to carry the decision
    /// through, never as a hint to re-check.
    pub dev_status_eligible: bool,
}

/// One page of raw payloads plus the cursor for the next page, if any.
#[derive(Debug, Clone)]
pub struct ProviderPage {
    /// Opaque, provider-native JSON payloads — one per logical record.
    /// Flattening into normalized rows happens in the transform worker,
    /// not here.
    pub records: Vec<Value>,
    pub next_cursor: Option<String>,
}

impl ProviderPage {
    pub fn is_last_page(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Implemented once per source provider. Every method surfaces the
/// `{transient, permanent, rate_limited, auth}` taxonomy via
/// [`ProviderError`]; the extraction worker never sees a raw HTTP status
/// code or exception.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Fetch one page for a step. Implementations own cursor encoding;
    /// the worker only round-trips `next_cursor` back as `cursor`.
    async fn fetch_page(&self, request: &ProviderRequest) -> ProviderResult<ProviderPage>;
}
