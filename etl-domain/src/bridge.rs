//! Vector bridge record: binds a normalized row to its vector-index point.
//! Shares ownership semantics with the row it mirrors — `active` is a
//! projection, not an independent fact.

use chrono::{DateTime, Utc};
use etl_core::{IntegrationId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::EntityTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorType {
    /// The one vector type produced for now; kept as an enum rather than
    /// a bare unit because the uniqueness key explicitly includes it and
    /// a future provider may add a second embedding model per entity.
    Default,
}

/// Uniqueness key: `(tenant_id, table_name, record_id, vector_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorBridgeRecord {
    pub tenant_id: TenantId,
    pub integration_id: IntegrationId,
    pub table_name: EntityTable,
    pub record_id: Uuid,
    pub vector_type: VectorType,
    pub collection_name: String,
    pub point_id: Uuid,
    pub active: bool,
    pub last_updated_at: DateTime<Utc>,
}

impl VectorBridgeRecord {
    pub fn new(
        tenant_id: TenantId,
        integration_id: IntegrationId,
        table_name: EntityTable,
        record_id: Uuid,
        collection_name: impl Into<String>,
        point_id: Uuid,
    ) -> Self {
        Self {
            tenant_id,
            integration_id,
            table_name,
            record_id,
            vector_type: VectorType::Default,
            collection_name: collection_name.into(),
            point_id,
            active: true,
            last_updated_at: Utc::now(),
        }
    }

    /// Follow the normalized row's `active` flag in either direction —
    /// both activation and deactivation, not only deactivation.
    pub fn sync_active(&mut self, row_active: bool) {
        if self.active != row_active {
            self.active = row_active;
            self.last_updated_at = Utc::now();
        }
    }
}
