//! Raw extraction staging table: the durable handoff between extraction and
//! transform.

use etl_core::{IntegrationId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExtractionRecord {
    pub tenant_id: TenantId,
    pub raw_id: Uuid,
    pub integration_id: IntegrationId,
    pub payload_type: String,
    pub payload_bytes: Vec<u8>,
    pub status: RawStatus,
    /// Provider-native id used as an idempotency key for re-delivered
    /// extraction messages.
    pub provider_id: String,
}

impl RawExtractionRecord {
    pub fn new(
        tenant_id: TenantId,
        integration_id: IntegrationId,
        payload_type: impl Into<String>,
        payload_bytes: Vec<u8>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            raw_id: Uuid::new_v4(),
            integration_id,
            payload_type: payload_type.into(),
            payload_bytes,
            status: RawStatus::Pending,
            provider_id: provider_id.into(),
        }
    }
}
