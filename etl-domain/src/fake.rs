//! An in-memory [`RelationalStore`] for unit tests, mirroring the role
//! `MemoryBackend` plays for the queue trait: a faithful, non-durable
//! implementation of the same contract a real Postgres-backed store
//! would satisfy, used to exercise the worker logic above it without a
//! database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use etl_core::{IntegrationId, TenantId};
use parking_lot::Mutex;
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::bridge::VectorBridgeRecord;
use crate::entities::{EntityRow, EntityTable};
use crate::integration::{IntegrationSettings, Provider};
use crate::mapping::CustomFieldMapping;
use crate::raw::{RawExtractionRecord, RawStatus};
use crate::store::{EntityLookup, RelationalStore, StoreError, StoreResult, TransformTx};

#[derive(Default)]
struct State {
    raw: HashMap<Uuid, RawExtractionRecord>,
    entities: HashMap<(TenantId, EntityTable, Uuid), EntityRow>,
    sprint_membership: std::collections::HashSet<(TenantId, Uuid, Uuid)>,
    mappings: HashMap<TenantId, CustomFieldMapping>,
    mapping_tables: HashMap<(TenantId, EntityTable), Vec<(String, Uuid)>>,
    vector_bridges: HashMap<(TenantId, EntityTable, Uuid), VectorBridgeRecord>,
    last_sync_dates: HashMap<(TenantId, IntegrationId), DateTime<Utc>>,
    integration_settings: HashMap<(TenantId, IntegrationId), IntegrationSettings>,
}

/// Find an existing row sharing `row`'s `(tenant, table, identity_key)`,
/// if any. Shared by `upsert_entities` and `upsert_sprint` so a
/// re-transform of the same logical entity reuses its row id instead of
/// minting a new one.
fn resolve_existing_id(state: &State, row: &EntityRow) -> Option<Uuid> {
    let natural_key = row.identity_key()?;
    state
        .entities
        .values()
        .find(|existing| existing.tenant_id == row.tenant_id && existing.table == row.table && existing.identity_key() == Some(natural_key))
        .map(|existing| existing.id)
}

/// In-memory store. Cheap to clone (shares the underlying state) so tests
/// can hold a handle alongside the worker under test.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_raw(&self, record: RawExtractionRecord) {
        self.state.lock().raw.insert(record.raw_id, record);
    }

    pub fn seed_mapping(&self, mapping: CustomFieldMapping) {
        self.state.lock().mappings.insert(mapping.tenant_id, mapping);
    }

    pub fn seed_mapping_table_entry(&self, tenant: TenantId, table: EntityTable, name: &str, id: Uuid) {
        self.state
            .lock()
            .mapping_tables
            .entry((tenant, table))
            .or_default()
            .push((name.to_string(), id));
    }

    pub fn entity_count(&self, tenant: TenantId, table: EntityTable) -> usize {
        self.state
            .lock()
            .entities
            .keys()
            .filter(|(t, tb, _)| *t == tenant && *tb == table)
            .count()
    }

    pub fn sprint_membership_count(&self) -> usize {
        self.state.lock().sprint_membership.len()
    }

    pub fn last_sync_date(&self, tenant: TenantId, integration: IntegrationId) -> Option<DateTime<Utc>> {
        self.state.lock().last_sync_dates.get(&(tenant, integration)).copied()
    }

    /// Override the per-integration configuration `fetch_integration_settings`
    /// returns. Without a seed, the fetch falls back to a default that
    /// mirrors what extraction used to hardcode, so existing tests keep
    /// working unseeded.
    pub fn seed_integration_settings(&self, settings: IntegrationSettings) {
        self.state
            .lock()
            .integration_settings
            .insert((settings.tenant_id, settings.integration_id), settings);
    }
}

#[async_trait]
impl RelationalStore for InMemoryStore {
    async fn write_raw(&self, record: RawExtractionRecord) -> StoreResult<RawExtractionRecord> {
        let mut state = self.state.lock();
        if let Some(existing) = state.raw.values_mut().find(|r| {
            r.tenant_id == record.tenant_id
                && r.integration_id == record.integration_id
                && r.payload_type == record.payload_type
                && r.provider_id == record.provider_id
        }) {
            existing.payload_bytes = record.payload_bytes;
            existing.status = record.status;
            return Ok(existing.clone());
        }
        state.raw.insert(record.raw_id, record.clone());
        Ok(record)
    }

    async fn get_raw(&self, tenant: TenantId, raw_id: Uuid) -> StoreResult<RawExtractionRecord> {
        self.state
            .lock()
            .raw
            .get(&raw_id)
            .filter(|r| r.tenant_id == tenant)
            .cloned()
            .ok_or(StoreError::RawNotFound(raw_id))
    }

    async fn begin_transform(&self) -> StoreResult<Box<dyn TransformTx>> {
        Ok(Box::new(InMemoryTx {
            state: self.state.clone(),
            staged: Vec::new(),
            committed: false,
        }))
    }

    async fn fetch_entity(
        &self,
        tenant: TenantId,
        table: EntityTable,
        lookup: EntityLookup,
    ) -> StoreResult<Option<EntityRow>> {
        let state = self.state.lock();
        let row = state.entities.values().find(|row| {
            if row.tenant_id != tenant || row.table != table {
                return false;
            }
            match &lookup {
                EntityLookup::ByKey(k) => row.key.as_deref() == Some(k.as_str()),
                EntityLookup::ByExternalId(e) => row.external_id.as_deref() == Some(e.as_str()),
                EntityLookup::ById(id) => row.id == *id,
            }
        });
        Ok(row.cloned())
    }

    async fn fetch_custom_field_mapping(
        &self,
        tenant: TenantId,
        integration: IntegrationId,
    ) -> StoreResult<CustomFieldMapping> {
        Ok(self
            .state
            .lock()
            .mappings
            .get(&tenant)
            .cloned()
            .unwrap_or_else(|| CustomFieldMapping::empty(tenant, integration)))
    }

    async fn resolve_mapping_id(
        &self,
        tenant: TenantId,
        _integration: IntegrationId,
        table: EntityTable,
        name: &str,
    ) -> StoreResult<Option<Uuid>> {
        Ok(self
            .state
            .lock()
            .mapping_tables
            .get(&(tenant, table))
            .and_then(|entries| entries.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)))
            .map(|(_, id)| *id))
    }

    async fn fetch_vector_bridge(
        &self,
        tenant: TenantId,
        table: EntityTable,
        record_id: Uuid,
    ) -> StoreResult<Option<VectorBridgeRecord>> {
        Ok(self.state.lock().vector_bridges.get(&(tenant, table, record_id)).cloned())
    }

    async fn upsert_vector_bridge(&self, record: VectorBridgeRecord) -> StoreResult<VectorBridgeRecord> {
        let mut state = self.state.lock();
        state
            .vector_bridges
            .insert((record.tenant_id, record.table_name, record.record_id), record.clone());
        Ok(record)
    }

    async fn write_last_sync_date(
        &self,
        tenant: TenantId,
        integration: IntegrationId,
        new_last_sync_date: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.state.lock().last_sync_dates.insert((tenant, integration), new_last_sync_date);
        Ok(())
    }

    async fn fetch_integration_settings(
        &self,
        tenant: TenantId,
        integration: IntegrationId,
        provider: Provider,
    ) -> StoreResult<IntegrationSettings> {
        Ok(self
            .state
            .lock()
            .integration_settings
            .get(&(tenant, integration))
            .cloned()
            .unwrap_or_else(|| IntegrationSettings {
                tenant_id: tenant,
                integration_id: integration,
                provider,
                projects: Vec::new(),
                base_search_filter: None,
                batch_size: 100,
                rate_limit_per_window: 100,
                rate_limit_window_secs: 60,
                board_ids: Vec::new(),
                last_sync_date: Utc::now(),
            }))
    }
}

/// A staged transaction: writes are buffered in `staged` and only applied
/// to `state` on `commit`, so a test can assert nothing is visible to
/// readers until commit. The buffering is what makes that assertion
/// meaningful at this layer, mirroring the commit-ordering guarantee a
/// real transactional store would give.
struct InMemoryTx {
    state: Arc<Mutex<State>>,
    staged: Vec<StagedWrite>,
    committed: bool,
}

enum StagedWrite {
    Entities(Vec<EntityRow>),
    SprintMembership(TenantId, Uuid, Uuid),
    RawCompleted(TenantId, Uuid),
}

#[async_trait]
impl TransformTx for InMemoryTx {
    async fn upsert_entities(&mut self, rows: Vec<EntityRow>) -> StoreResult<Vec<EntityRow>> {
        let state = self.state.lock();
        let rows: Vec<EntityRow> = rows
            .into_iter()
            .map(|mut row| {
                if let Some(existing_id) = resolve_existing_id(&state, &row) {
                    row.id = existing_id;
                }
                row
            })
            .collect();
        drop(state);
        self.staged.push(StagedWrite::Entities(rows.clone()));
        Ok(rows)
    }

    async fn upsert_sprint(&mut self, mut sprint_row: EntityRow) -> StoreResult<EntityRow> {
        if let Some(existing_id) = resolve_existing_id(&self.state.lock(), &sprint_row) {
            sprint_row.id = existing_id;
        }
        self.staged.push(StagedWrite::Entities(vec![sprint_row.clone()]));
        Ok(sprint_row)
    }

    async fn upsert_sprint_membership(&mut self, tenant: TenantId, work_item_id: Uuid, sprint_id: Uuid) -> StoreResult<()> {
        self.staged.push(StagedWrite::SprintMembership(tenant, work_item_id, sprint_id));
        Ok(())
    }

    async fn mark_raw_completed(&mut self, tenant: TenantId, raw_id: Uuid) -> StoreResult<()> {
        self.staged.push(StagedWrite::RawCompleted(tenant, raw_id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let mut state = self.state.lock();
        for write in self.staged.drain(..) {
            match write {
                StagedWrite::Entities(rows) => {
                    for row in rows {
                        state.entities.insert((row.tenant_id, row.table, row.id), row);
                    }
                }
                StagedWrite::SprintMembership(tenant, work_item_id, sprint_id) => {
                    state.sprint_membership.insert((tenant, work_item_id, sprint_id));
                }
                StagedWrite::RawCompleted(tenant, raw_id) => {
                    if let Some(record) = state.raw.get_mut(&raw_id) {
                        if record.tenant_id == tenant {
                            record.status = RawStatus::Completed;
                        }
                    }
                }
            }
        }
        self.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work_item(tenant: TenantId, integration: IntegrationId, external_id: &str) -> EntityRow {
        EntityRow::new(EntityTable::WorkItems, tenant, integration, Some(external_id.to_string()))
    }

    #[tokio::test]
    async fn upserting_the_same_external_id_twice_reuses_the_same_row_id() {
        let store = InMemoryStore::new();
        let tenant = TenantId(1);
        let integration = IntegrationId(1);

        let mut tx = store.begin_transform().await.unwrap();
        let first = tx.upsert_entities(vec![work_item(tenant, integration, "ISSUE-1")]).await.unwrap();
        tx.commit().await.unwrap();
        let first_id = first[0].id;

        let mut second_row = work_item(tenant, integration, "ISSUE-1");
        second_row.fields.insert("title".to_string(), serde_json::json!("updated title"));
        let mut tx = store.begin_transform().await.unwrap();
        let second = tx.upsert_entities(vec![second_row]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(second[0].id, first_id, "re-transforming the same external_id must reuse the existing row id");
        assert_eq!(store.entity_count(tenant, EntityTable::WorkItems), 1, "no duplicate row should be created");
    }

    #[tokio::test]
    async fn upserting_a_new_external_id_inserts_a_distinct_row() {
        let store = InMemoryStore::new();
        let tenant = TenantId(1);
        let integration = IntegrationId(1);

        let mut tx = store.begin_transform().await.unwrap();
        tx.upsert_entities(vec![work_item(tenant, integration, "ISSUE-1")]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_transform().await.unwrap();
        tx.upsert_entities(vec![work_item(tenant, integration, "ISSUE-2")]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.entity_count(tenant, EntityTable::WorkItems), 2);
    }

    #[tokio::test]
    async fn fetch_integration_settings_returns_seeded_value() {
        let store = InMemoryStore::new();
        let tenant = TenantId(7);
        let integration = IntegrationId(3);
        store.seed_integration_settings(IntegrationSettings {
            tenant_id: tenant,
            integration_id: integration,
            provider: Provider::Jira,
            projects: vec!["PROJ".to_string()],
            base_search_filter: Some("project = PROJ".to_string()),
            batch_size: 50,
            rate_limit_per_window: 10,
            rate_limit_window_secs: 30,
            board_ids: vec!["board-1".to_string()],
            last_sync_date: Utc::now(),
        });

        let fetched = store.fetch_integration_settings(tenant, integration, Provider::Jira).await.unwrap();
        assert_eq!(fetched.projects, vec!["PROJ".to_string()]);
        assert_eq!(fetched.batch_size, 50);
    }

    #[tokio::test]
    async fn fetch_integration_settings_falls_back_to_defaults_when_unseeded() {
        let store = InMemoryStore::new();
        let fetched = store.fetch_integration_settings(TenantId(1), IntegrationId(1), Provider::Github).await.unwrap();
        assert_eq!(fetched.batch_size, 100);
        assert!(fetched.projects.is_empty());
    }
}
