//! Deterministic point identity and collection naming. Re-running the
//! embedding worker against unchanged upstream data must not create
//! additional points.

use etl_core::TenantId;
use etl_domain::EntityTable;
use uuid::Uuid;

/// `UUIDv5(namespace=DNS, name="<tenant>_<table>_<record_id>")`.
/// Upserts with this id replace in place.
pub fn point_id(tenant_id: TenantId, table: EntityTable, record_id: Uuid) -> Uuid {
    let name = format!("{}_{}_{}", tenant_id, table.table_name(), record_id);
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

/// `tenant_<T>_<table_name>`.
pub fn collection_name(tenant_id: TenantId, table: EntityTable) -> String {
    format!("tenant_{}_{}", tenant_id, table.table_name())
}
