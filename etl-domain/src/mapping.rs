//! Custom-field slot mapping: reserved slots plus 20 generic slots,
//! consumed by the transform worker when flattening work items and by
//! extraction when deciding whether an issue is eligible for dev-status
//! extraction.

use etl_core::{IntegrationId, TenantId};
use serde::{Deserialize, Serialize};

const GENERIC_SLOT_COUNT: usize = 20;

const GENERIC_SLOT_NAMES: [&str; GENERIC_SLOT_COUNT] = [
    "custom_field_01",
    "custom_field_02",
    "custom_field_03",
    "custom_field_04",
    "custom_field_05",
    "custom_field_06",
    "custom_field_07",
    "custom_field_08",
    "custom_field_09",
    "custom_field_10",
    "custom_field_11",
    "custom_field_12",
    "custom_field_13",
    "custom_field_14",
    "custom_field_15",
    "custom_field_16",
    "custom_field_17",
    "custom_field_18",
    "custom_field_19",
    "custom_field_20",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomFieldMapping {
    pub tenant_id: TenantId,
    pub integration_id: IntegrationId,
    pub team_field: Option<String>,
    pub development_field: Option<String>,
    pub story_points_field: Option<String>,
    /// `custom_field_01`.. `custom_field_20`, indexed 0-based internally.
    pub generic_slots: [Option<String>; GENERIC_SLOT_COUNT],
}

impl CustomFieldMapping {
    pub fn empty(tenant_id: TenantId, integration_id: IntegrationId) -> Self {
        Self {
            tenant_id,
            integration_id,
            team_field: None,
            development_field: None,
            story_points_field: None,
            generic_slots: Default::default(),
        }
    }

    /// Look up a slot by its reserved or generic name
    /// (`custom_field_01`..`custom_field_20`). Unknown slot names resolve
    /// to `None` rather than an error: an unresolved lookup sets the
    /// foreign key to null, the row is still persisted.
    pub fn resolve(&self, slot_name: &str) -> Option<&str> {
        match slot_name {
            "team_field" => self.team_field.as_deref(),
            "development_field" => self.development_field.as_deref(),
            "story_points_field" => self.story_points_field.as_deref(),
            other => other
                .strip_prefix("custom_field_")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n >= 1 && *n <= GENERIC_SLOT_COUNT)
                .and_then(|n| self.generic_slots[n - 1].as_deref()),
        }
    }

    /// Reverse lookup: given a provider-native custom-field id as it
    /// appears in a raw payload, return the reserved or generic slot name
    /// it is configured to fill, if any. Used by transform when flattening
    /// a payload's custom fields into normalized column names.
    pub fn slot_for_field(&self, field_id: &str) -> Option<&'static str> {
        if self.team_field.as_deref() == Some(field_id) {
            return Some("team_field");
        }
        if self.development_field.as_deref() == Some(field_id) {
            return Some("development_field");
        }
        if self.story_points_field.as_deref() == Some(field_id) {
            return Some("story_points_field");
        }
        for (i, slot) in self.generic_slots.iter().enumerate() {
            if slot.as_deref() == Some(field_id) {
                return GENERIC_SLOT_NAMES.get(i).copied();
            }
        }
        None
    }

    /// Whether this integration has a development-field slot configured,
    /// used by extraction to decide which issues are eligible for
    /// dev-status extraction.
    pub fn has_development_field(&self) -> bool {
        self.development_field.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_reserved_and_generic_slots() {
        let mut m = CustomFieldMapping::empty(TenantId(1), IntegrationId(1));
        m.team_field = Some("customfield_10001".to_string());
        m.generic_slots[4] = Some("customfield_10099".to_string());

        assert_eq!(m.resolve("team_field"), Some("customfield_10001"));
        assert_eq!(m.resolve("custom_field_05"), Some("customfield_10099"));
        assert_eq!(m.resolve("custom_field_06"), None);
        assert_eq!(m.resolve("unknown_slot"), None);
    }

    #[test]
    fn slot_for_field_reverses_resolve() {
        let mut m = CustomFieldMapping::empty(TenantId(1), IntegrationId(1));
        m.story_points_field = Some("customfield_10099".to_string());

        assert_eq!(m.slot_for_field("customfield_10099"), Some("story_points_field"));
        assert_eq!(m.slot_for_field("customfield_unmapped"), None);
    }
}
