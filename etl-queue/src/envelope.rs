//! The message envelope and the closed set of queue kinds it travels
//! through. The field set is stable: everything here is flattened,
//! explicit, and optional fields are modeled as `Option`, never inferred
//! from presence/absence of other fields.

use chrono::{DateTime, Utc};
use etl_core::{IntegrationId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobToken;

/// The three stages of the pipeline; also the closed set of queue types.
/// Queue names are derived as `<kind>_queue_<tenant>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    Extraction,
    Transform,
    Embedding,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Extraction => "extraction",
            QueueKind::Transform => "transform",
            QueueKind::Embedding => "embedding",
        }
    }

    /// The durable queue name for this kind, scoped to one tenant.
    pub fn queue_name(&self, tenant: TenantId) -> String {
        format!("{}_queue_{}", self.as_str(), tenant.0)
    }

    pub fn all() -> [QueueKind; 3] {
        [QueueKind::Extraction, QueueKind::Transform, QueueKind::Embedding]
    }
}

/// Payload type tag. Provider step sequences declare these as static data
/// (see `etl-providers`); the queue fabric treats them as opaque strings so
/// it never needs to know about a specific provider.
pub type PayloadType = String;

/// Self-describing message envelope. At-least-once delivery; FIFO per
/// queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub tenant_id: TenantId,
    pub integration_id: IntegrationId,
    pub job_id: Uuid,
    pub step_name: String,
    pub payload_type: PayloadType,

    /// Set when this message hands off a specific raw-extraction row
    /// (transform/embedding stages).
    pub raw_id: Option<Uuid>,

    /// Set when this message refers to an already-normalized entity
    /// (embedding stage): `(table_name, lookup_value)`, where
    /// `lookup_value` is whatever field the table is looked up by (key,
    /// external_id, or stringified internal id) — never assumed to be an
    /// id by the reader.
    pub entity_ref: Option<(String, String)>,

    pub first_item: bool,
    pub last_item: bool,
    pub last_job_item: bool,

    /// Job token, threaded unchanged through every message of the same job.
    pub token: JobToken,

    pub old_last_sync_date: DateTime<Utc>,
    pub new_last_sync_date: DateTime<Utc>,

    /// Redelivery counter, incremented by the backend on nack.
    pub attempt: u32,
}

impl Envelope {
    /// Construct the first envelope of a job: `first_item` and `last_item`
    /// both unset, attempt 0.
    pub fn new(
        tenant_id: TenantId,
        integration_id: IntegrationId,
        job_id: Uuid,
        step_name: impl Into<String>,
        payload_type: impl Into<String>,
        token: JobToken,
        old_last_sync_date: DateTime<Utc>,
        new_last_sync_date: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            integration_id,
            job_id,
            step_name: step_name.into(),
            payload_type: payload_type.into(),
            raw_id: None,
            entity_ref: None,
            first_item: false,
            last_item: false,
            last_job_item: false,
            token,
            old_last_sync_date,
            new_last_sync_date,
            attempt: 0,
        }
    }

    pub fn with_raw_id(mut self, raw_id: Uuid) -> Self {
        self.raw_id = Some(raw_id);
        self
    }

    pub fn with_entity_ref(mut self, table: impl Into<String>, lookup_value: impl Into<String>) -> Self {
        self.entity_ref = Some((table.into(), lookup_value.into()));
        self
    }

    pub fn with_markers(mut self, first_item: bool, last_item: bool, last_job_item: bool) -> Self {
        self.first_item = first_item;
        self.last_item = last_item;
        self.last_job_item = last_job_item;
        self
    }
}

/// Build the single synthetic terminal message for a step that produced
/// zero items: publish a single synthetic terminal message with
/// `first_item=true, last_item=true`.
pub fn synthetic_terminal(mut envelope: Envelope, terminal_step: bool) -> Envelope {
    envelope.first_item = true;
    envelope.last_item = true;
    envelope.last_job_item = terminal_step;
    envelope
}

/// Publish N items for a step following the per-step publication rule:
/// zero items still emits one synthetic terminal message; N >= 1 marks the
/// first and last explicitly.
pub fn mark_step_sequence(mut envelopes: Vec<Envelope>, terminal_step: bool) -> Vec<Envelope> {
    if envelopes.is_empty() {
        return envelopes;
    }
    let last = envelopes.len() - 1;
    for (i, env) in envelopes.iter_mut().enumerate() {
        env.first_item = i == 0;
        env.last_item = i == last;
        env.last_job_item = terminal_step && i == last;
    }
    envelopes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_envelope() -> Envelope {
        Envelope::new(
            TenantId(1),
            IntegrationId(1),
            Uuid::nil(),
            "jira_issues_with_changelogs",
            "issue",
            Uuid::nil(),
            Utc::now(),
            Utc::now(),
        )
    }

    #[test]
    fn zero_items_still_yields_one_terminal_message() {
        let marked = mark_step_sequence(vec![], true);
        assert!(marked.is_empty());
    }

    #[test]
    fn exactly_one_first_and_one_last_marker() {
        let envs = vec![base_envelope(), base_envelope(), base_envelope()];
        let marked = mark_step_sequence(envs, true);
        assert_eq!(marked.iter().filter(|e| e.first_item).count(), 1);
        assert_eq!(marked.iter().filter(|e| e.last_item).count(), 1);
        assert!(marked[0].first_item);
        assert!(marked[2].last_item);
        assert!(marked[2].last_job_item);
        assert!(!marked[0].last_job_item && !marked[1].last_job_item);
    }

    #[test]
    fn non_terminal_step_never_sets_last_job_item() {
        let envs = vec![base_envelope()];
        let marked = mark_step_sequence(envs, false);
        assert!(!marked[0].last_job_item);
    }

    proptest::proptest! {
        #[test]
        fn exactly_one_first_and_last_marker_for_any_batch_size(n in 1usize..64, terminal in proptest::bool::ANY) {
            let envs: Vec<Envelope> = (0..n).map(|_| base_envelope()).collect();
            let marked = mark_step_sequence(envs, terminal);
            proptest::prop_assert_eq!(marked.iter().filter(|e| e.first_item).count(), 1);
            proptest::prop_assert_eq!(marked.iter().filter(|e| e.last_item).count(), 1);
            proptest::prop_assert!(marked[0].first_item);
            proptest::prop_assert!(marked[n - 1].last_item);
            proptest::prop_assert_eq!(marked[n - 1].last_job_item, terminal);
        }

        #[test]
        fn token_is_unchanged_by_marking(n in 1usize..16) {
            let token = Uuid::new_v4();
            let envs: Vec<Envelope> = (0..n).map(|_| { let mut e = base_envelope(); e.token = token; e }).collect();
            let marked = mark_step_sequence(envs, true);
            proptest::prop_assert!(marked.iter().all(|e| e.token == token));
        }
    }
}
