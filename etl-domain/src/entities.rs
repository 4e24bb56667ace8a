//! Normalized entities. Declared as a closed, tagged set of tables rather
//! than inferred from payload shape; each row is represented generically
//! as an [`EntityRow`] with its provider-specific attributes folded into a
//! `fields` bag, since the number of concrete per-table structs would
//! dwarf the rest of this crate without changing any of the invariants
//! that actually matter.

use chrono::{DateTime, Utc};
use etl_core::{IntegrationId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;
use uuid::Uuid;

/// The closed set of normalized tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityTable {
    Projects,
    WorkItemTypes,
    Statuses,
    WorkItems,
    Changelogs,
    PullRequests,
    PrCommits,
    PrReviews,
    PrComments,
    Repositories,
    CrossLinks,
    Sprints,
    WorkItemsSprints,
    WorkItemsPrsLinks,
    WitsHierarchies,
    WitsMappings,
    StatusMappings,
    Workflows,
}

impl EntityTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityTable::Projects => "projects",
            EntityTable::WorkItemTypes => "work_item_types",
            EntityTable::Statuses => "statuses",
            EntityTable::WorkItems => "work_items",
            EntityTable::Changelogs => "changelogs",
            EntityTable::PullRequests => "pull_requests",
            EntityTable::PrCommits => "pr_commits",
            EntityTable::PrReviews => "pr_reviews",
            EntityTable::PrComments => "pr_comments",
            EntityTable::Repositories => "repositories",
            EntityTable::CrossLinks => "cross_links",
            EntityTable::Sprints => "sprints",
            EntityTable::WorkItemsSprints => "work_items_sprints",
            EntityTable::WorkItemsPrsLinks => "work_items_prs_links",
            EntityTable::WitsHierarchies => "wits_hierarchies",
            EntityTable::WitsMappings => "wits_mappings",
            EntityTable::StatusMappings => "status_mappings",
            EntityTable::Workflows => "workflows",
        }
    }

    /// The key field the embedding worker uses to look the row back up.
    /// Mismatches here cause silent "entity not found" dropouts.
    pub fn embedding_key(&self) -> EmbeddingKey {
        match self {
            EntityTable::Projects | EntityTable::WorkItems => EmbeddingKey::Key,
            EntityTable::WorkItemsPrsLinks
            | EntityTable::WitsHierarchies
            | EntityTable::WitsMappings
            | EntityTable::StatusMappings
            | EntityTable::Workflows => EmbeddingKey::Internal,
            _ => EmbeddingKey::External,
        }
    }

    /// Sprints and their membership are not enqueued for embedding in the
    /// transform worker; they are enqueued by the sprint-reports step
    /// after metrics are known.
    pub fn vectorized_inline(&self) -> bool {
        !matches!(self, EntityTable::Sprints | EntityTable::WorkItemsSprints)
    }

    pub fn all() -> [EntityTable; 18] {
        [
            EntityTable::Projects,
            EntityTable::WorkItemTypes,
            EntityTable::Statuses,
            EntityTable::WorkItems,
            EntityTable::Changelogs,
            EntityTable::PullRequests,
            EntityTable::PrCommits,
            EntityTable::PrReviews,
            EntityTable::PrComments,
            EntityTable::Repositories,
            EntityTable::CrossLinks,
            EntityTable::Sprints,
            EntityTable::WorkItemsSprints,
            EntityTable::WorkItemsPrsLinks,
            EntityTable::WitsHierarchies,
            EntityTable::WitsMappings,
            EntityTable::StatusMappings,
            EntityTable::Workflows,
        ]
    }
}

/// Which field the embedding worker queries by for a given table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKey {
    /// The provider-native `key` field (e.g. Jira project/issue key).
    Key,
    /// The row's internal `id`.
    Internal,
    /// The provider-native `external_id`.
    External,
}

/// A generic normalized row. Every row carries `(tenant_id, integration_id,
/// active)`; most carry `external_id` and `last_updated_at`. `fields`
/// holds the table-specific flattened attributes (titles, descriptions,
/// statuses, etc.) consumed by text composition in `etl-vector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    pub table: EntityTable,
    pub tenant_id: TenantId,
    pub integration_id: IntegrationId,
    pub id: Uuid,
    pub external_id: Option<String>,
    /// Provider-native `key` (projects, work items); `None` for tables with
    /// no such concept.
    pub key: Option<String>,
    pub active: bool,
    pub last_updated_at: DateTime<Utc>,
    pub fields: JsonMap<String, serde_json::Value>,
}

impl EntityRow {
    pub fn new(
        table: EntityTable,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        external_id: Option<String>,
    ) -> Self {
        Self {
            table,
            tenant_id,
            integration_id,
            id: Uuid::new_v4(),
            external_id,
            key: None,
            active: true,
            last_updated_at: Utc::now(),
            fields: JsonMap::new(),
        }
    }

    /// The dedup key used while flattening a single payload: prefer
    /// `external_id`.
    pub fn dedup_key(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    /// The value the embedding worker would fetch this row by, per
    /// [`EntityTable::embedding_key`]. `None` means the row's declared
    /// lookup field is absent — the caller must not fall back to `id`
    /// silently, since that would mask a mismatch between the declared
    /// key and the data actually present.
    pub fn embedding_lookup_value(&self) -> Option<String> {
        match self.table.embedding_key() {
            EmbeddingKey::Key => self.key.clone(),
            EmbeddingKey::Internal => Some(self.id.to_string()),
            EmbeddingKey::External => self.external_id.clone(),
        }
    }

    /// The natural identity used to detect whether a row already exists
    /// on re-transform: prefer `external_id`, fall back to `key`. Rows
    /// with neither (pure join/mapping tables) have no natural key and
    /// always insert as new.
    pub fn identity_key(&self) -> Option<&str> {
        self.external_id.as_deref().or(self.key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_key_selection_matches_expected_table() {
        assert_eq!(EntityTable::Projects.embedding_key(), EmbeddingKey::Key);
        assert_eq!(EntityTable::WorkItems.embedding_key(), EmbeddingKey::Key);
        assert_eq!(EntityTable::WorkItemsPrsLinks.embedding_key(), EmbeddingKey::Internal);
        assert_eq!(EntityTable::WitsHierarchies.embedding_key(), EmbeddingKey::Internal);
        assert_eq!(EntityTable::Repositories.embedding_key(), EmbeddingKey::External);
    }

    #[test]
    fn sprints_are_not_vectorized_inline() {
        assert!(!EntityTable::Sprints.vectorized_inline());
        assert!(!EntityTable::WorkItemsSprints.vectorized_inline());
        assert!(EntityTable::Projects.vectorized_inline());
    }

    #[test]
    fn embedding_lookup_value_is_none_when_the_declared_key_field_is_absent() {
        let row = EntityRow::new(EntityTable::Projects, TenantId(1), IntegrationId(1), Some("PROJ-1".into()));
        assert_eq!(row.embedding_lookup_value(), None); // key-keyed table, row.key never set
    }

    #[test]
    fn identity_key_prefers_external_id_over_key() {
        let mut row = EntityRow::new(EntityTable::WorkItems, TenantId(1), IntegrationId(1), Some("ISSUE-1".into()));
        row.key = Some("PROJ-1".into());
        assert_eq!(row.identity_key(), Some("ISSUE-1"));

        row.external_id = None;
        assert_eq!(row.identity_key(), Some("PROJ-1"));
    }
}
