//! Text composition: turns a committed [`EntityRow`] into the string
//! handed to [`crate::embedding::EmbeddingProvider::generate`]. Each
//! table declares the fields most likely to carry embeddable prose;
//! composition joins whichever of those are actually present and falls
//! back to an identifier-based sentence so `generate` is never called
//! with an empty string.

use etl_domain::{EntityRow, EntityTable};

fn declared_fields(table: EntityTable) -> &'static [&'static str] {
    match table {
        EntityTable::Projects => &["name", "description"],
        EntityTable::WorkItemTypes => &["name", "description"],
        EntityTable::Statuses => &["name", "category"],
        EntityTable::WorkItems => &["title", "description", "status", "priority"],
        EntityTable::Changelogs => &["field", "from_value", "to_value"],
        EntityTable::PullRequests => &["title", "description", "state"],
        EntityTable::PrCommits => &["message"],
        EntityTable::PrReviews => &["body", "state"],
        EntityTable::PrComments => &["body"],
        EntityTable::Repositories => &["name", "description"],
        EntityTable::CrossLinks => &["link_type"],
        EntityTable::Sprints => &["name", "goal"],
        EntityTable::WorkItemsSprints => &[],
        EntityTable::WorkItemsPrsLinks => &["link_type"],
        EntityTable::WitsHierarchies => &["name"],
        EntityTable::WitsMappings => &["name"],
        EntityTable::StatusMappings => &["name"],
        EntityTable::Workflows => &["name", "description"],
    }
}

/// The identifier used in the fallback sentence when no declared field
/// carries content: prefer `key`, then `external_id`, then the row id.
fn fallback_identifier(row: &EntityRow) -> String {
    row.key.clone().or_else(|| row.external_id.clone()).unwrap_or_else(|| row.id.to_string())
}

pub fn compose_text(row: &EntityRow) -> String {
    let parts: Vec<String> = declared_fields(row.table)
        .iter()
        .filter_map(|field| row.fields.get(*field))
        .filter_map(|value| value.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if parts.is_empty() {
        format!("{}: {}", row.table.table_name(), fallback_identifier(row))
    } else {
        parts.join(". ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::{IntegrationId, TenantId};
    use serde_json::json;

    #[test]
    fn joins_present_declared_fields_and_skips_missing_ones() {
        let mut row = EntityRow::new(EntityTable::WorkItems, TenantId(1), IntegrationId(1), Some("JIRA-1".into()));
        row.fields.insert("title".into(), json!("Fix login bug"));
        row.fields.insert("status".into(), json!("In Progress"));

        assert_eq!(compose_text(&row), "Fix login bug. In Progress");
    }

    #[test]
    fn falls_back_to_identifier_sentence_when_all_fields_absent() {
        let mut row = EntityRow::new(EntityTable::Projects, TenantId(1), IntegrationId(1), Some("PROJ-1".into()));
        row.key = Some("PROJ".into());

        assert_eq!(compose_text(&row), "projects: PROJ");
    }

    #[test]
    fn blank_string_fields_are_treated_as_absent() {
        let mut row = EntityRow::new(EntityTable::Repositories, TenantId(1), IntegrationId(1), Some("repo-1".into()));
        row.fields.insert("name".into(), json!(" "));
        row.fields.insert("description".into(), json!("A widget service"));

        assert_eq!(compose_text(&row), "A widget service");
    }
}
