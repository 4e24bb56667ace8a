//! The relational store boundary. Transactional writes go through
//! [`TransformTx`]; the trait shape exists so tests can swap in an
//! in-memory fake without standing up Postgres, and so a concrete
//! `sqlx::Postgres`-backed implementation (not shipped here — the core
//! does not prescribe a transport beyond this contract) is a drop-in.

use async_trait::async_trait;
use etl_core::{IntegrationId, TenantId};
use thiserror::Error;
use uuid::Uuid;

use crate::bridge::VectorBridgeRecord;
use crate::entities::{EntityRow, EntityTable};
use crate::integration::{IntegrationSettings, Provider};
use crate::mapping::CustomFieldMapping;
use crate::raw::RawExtractionRecord;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("raw extraction record not found: {0}")]
    RawNotFound(Uuid),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("commit conflict: {0}")]
    CommitConflict(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// How the embedding worker (and mapping lookups) address one row.
#[derive(Debug, Clone)]
pub enum EntityLookup {
    /// Provider-native `key` (projects, work items).
    ByKey(String),
    /// Provider-native `external_id` (most other tables).
    ByExternalId(String),
    /// Internal row id (mapping tables, PR/work-item links).
    ById(Uuid),
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Idempotent upsert keyed on `(tenant_id, integration_id,
    /// payload_type, provider_id)` — a re-delivered extraction message
    /// re-issues this write rather than creating a duplicate raw record.
    /// Not part of [`TransformTx`]: extraction writes raw payloads outside
    /// the transform transaction.
    async fn write_raw(&self, record: RawExtractionRecord) -> StoreResult<RawExtractionRecord>;

    async fn get_raw(&self, tenant: TenantId, raw_id: Uuid) -> StoreResult<RawExtractionRecord>;

    /// Begin a transaction scoping one raw record's transform.
    async fn begin_transform(&self) -> StoreResult<Box<dyn TransformTx>>;

    /// Read a committed row by its embedding-lookup key. Used by the
    /// embedding worker; a missing row is not an error at this layer —
    /// the worker decides whether absence is expected.
    async fn fetch_entity(
        &self,
        tenant: TenantId,
        table: EntityTable,
        lookup: EntityLookup,
    ) -> StoreResult<Option<EntityRow>>;

    async fn fetch_custom_field_mapping(
        &self,
        tenant: TenantId,
        integration: IntegrationId,
    ) -> StoreResult<CustomFieldMapping>;

    /// Read the per-integration configuration (project/board scoping,
    /// search filter, rate-limit settings) extraction steps run against.
    /// `last_sync_date` on the returned value is a stale snapshot — the
    /// caller always overrides it with the job's own watermark before
    /// use, since that travels per-job rather than per-integration.
    async fn fetch_integration_settings(
        &self,
        tenant: TenantId,
        integration: IntegrationId,
        provider: Provider,
    ) -> StoreResult<IntegrationSettings>;

    /// Case-insensitive lookup of a mapping row's internal id
    /// (`wits_mapping_id`, `status_mapping_id`, `workflow_id`). An
    /// unresolved name returns `Ok(None)`, never an error — the caller
    /// persists the row with a null foreign key.
    async fn resolve_mapping_id(
        &self,
        tenant: TenantId,
        integration: IntegrationId,
        table: EntityTable,
        name: &str,
    ) -> StoreResult<Option<Uuid>>;

    /// Read the bridge row for one vector point, keyed on `(tenant_id,
    /// table_name, record_id, vector_type)`. `None` means this is the
    /// row's first vectorization.
    async fn fetch_vector_bridge(
        &self,
        tenant: TenantId,
        table: EntityTable,
        record_id: Uuid,
    ) -> StoreResult<Option<VectorBridgeRecord>>;

    /// Upsert on the same key. The embedding worker calls this after the
    /// vector index upsert has succeeded, never before — a bridge row
    /// must not claim a point exists until it does.
    async fn upsert_vector_bridge(&self, record: VectorBridgeRecord) -> StoreResult<VectorBridgeRecord>;

    /// Write back the job's new watermark on completion. The only field
    /// of an [`crate::integration::IntegrationSettings`] the pipeline
    /// ever mutates.
    async fn write_last_sync_date(
        &self,
        tenant: TenantId,
        integration: IntegrationId,
        new_last_sync_date: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()>;
}

/// One transaction scoped to a single raw record's transform.
#[async_trait]
pub trait TransformTx: Send {
    /// Bulk upsert using database-native `ON CONFLICT` semantics. Returns
    /// the rows as committed (with final ids) so the caller can enqueue
    /// embedding work for them — but only after `commit`.
    async fn upsert_entities(&mut self, rows: Vec<EntityRow>) -> StoreResult<Vec<EntityRow>>;

    /// `ON CONFLICT DO UPDATE` for the sprint row itself, `ON CONFLICT DO
    /// NOTHING` for membership — race-safe across concurrent transform
    /// workers on overlapping payloads.
    async fn upsert_sprint(&mut self, sprint_row: EntityRow) -> StoreResult<EntityRow>;
    async fn upsert_sprint_membership(&mut self, tenant: TenantId, work_item_id: Uuid, sprint_id: Uuid) -> StoreResult<()>;

    async fn mark_raw_completed(&mut self, tenant: TenantId, raw_id: Uuid) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
