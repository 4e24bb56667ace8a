//! Transform worker: normalizes raw payloads via idempotent bulk
//! upserts, commits, and only then publishes embedding work. The
//! commit-before-publish ordering is the load-bearing invariant here
//! and is enforced structurally: `normalize_and_commit` returns the
//! committed rows, and nothing downstream of it can run before the
//! `commit().await?` inside it has resolved.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use etl_domain::{CustomFieldMapping, EntityLookup, EntityRow, EntityTable, RelationalStore};
use etl_queue::job::Stage;
use etl_queue::{Envelope, JobStore, QueueBackend, QueueKind};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::WorkerResult;

pub struct TransformWorker {
    pub queue: Arc<dyn QueueBackend>,
    pub store: Arc<dyn RelationalStore>,
    pub job_store: Arc<dyn JobStore>,
    pub dead_letter_threshold: u32,
}

impl TransformWorker {
    #[instrument(skip(self))]
    pub async fn run_once(&self, tenant: etl_core::TenantId) -> WorkerResult<()> {
        let (envelope, ack) = self.queue.consume(QueueKind::Transform, tenant).await?;
        match self.process(&envelope).await {
            Ok(()) => {
                self.queue.ack(ack).await?;
                Ok(())
            }
            Err(err) => {
                warn!(step = %envelope.step_name, error = %err, "transform failed, nacking for redelivery");
                let diverted = self.queue.nack(ack, envelope.clone(), self.dead_letter_threshold).await?;
                if diverted {
                    let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
                    job.apply_failure(&envelope.step_name, Stage::Transform);
                    self.job_store.upsert(job).await?;
                }
                Ok(())
            }
        }
    }

    async fn process(&self, envelope: &Envelope) -> WorkerResult<()> {
        let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
        job.apply_first_item(&envelope.step_name, Stage::Transform);
        self.job_store.upsert(job).await?;

        let committed = match envelope.raw_id {
            None => Vec::new(),
            Some(raw_id) => self.normalize_and_commit(envelope, raw_id).await?,
        };

        let is_sprint_step = envelope.payload_type == "sprint_report";
        let embed_envelopes: Vec<Envelope> = committed
            .iter()
            .filter(|row| row.table.vectorized_inline() || (is_sprint_step && row.table == EntityTable::Sprints))
            .filter_map(|row| {
                let Some(lookup_value) = row.embedding_lookup_value() else {
                    warn!(table = row.table.table_name(), id = %row.id, "skipping embedding enqueue: declared lookup field is absent on this row");
                    return None;
                };
                Some(
                    Envelope::new(
                        envelope.tenant_id,
                        envelope.integration_id,
                        envelope.job_id,
                        envelope.step_name.clone(),
                        envelope.payload_type.clone(),
                        envelope.token,
                        envelope.old_last_sync_date,
                        envelope.new_last_sync_date,
                    )
                    .with_entity_ref(row.table.table_name(), lookup_value),
                )
            })
            .collect();

        let outgoing = rethread_markers(embed_envelopes, envelope);
        if outgoing.is_empty() {
            let terminal = etl_queue::envelope::synthetic_terminal(
                Envelope::new(
                    envelope.tenant_id,
                    envelope.integration_id,
                    envelope.job_id,
                    envelope.step_name.clone(),
                    envelope.payload_type.clone(),
                    envelope.token,
                    envelope.old_last_sync_date,
                    envelope.new_last_sync_date,
                ),
                envelope.last_job_item,
            )
            .with_markers(envelope.first_item, envelope.last_item, envelope.last_job_item);
            self.queue.publish(QueueKind::Embedding, envelope.tenant_id, terminal).await?;
        } else {
            for message in outgoing {
                self.queue.publish(QueueKind::Embedding, envelope.tenant_id, message).await?;
            }
        }

        let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
        job.apply_last_item(&envelope.step_name, Stage::Transform);
        self.job_store.upsert(job).await?;

        info!(step = %envelope.step_name, rows = committed.len(), "transform complete");
        Ok(())
    }

    async fn normalize_and_commit(&self, envelope: &Envelope, raw_id: Uuid) -> WorkerResult<Vec<EntityRow>> {
        let raw = self.store.get_raw(envelope.tenant_id, raw_id).await?;
        let payload: Value = serde_json::from_slice(&raw.payload_bytes).unwrap_or(Value::Null);

        if envelope.payload_type == "sprint_report" {
            return self.normalize_sprint_report(envelope, raw_id, &payload).await;
        }

        let mapping = self.store.fetch_custom_field_mapping(envelope.tenant_id, envelope.integration_id).await?;
        let table = entity_table_for_payload_type(&envelope.payload_type);
        let rows = match table {
            Some(table) => flatten_payload(&payload, table, envelope, &mapping),
            None => Vec::new(),
        };

        let mut tx = self.store.begin_transform().await?;
        let committed = if rows.is_empty() { Vec::new() } else { tx.upsert_entities(rows).await? };

        tx.mark_raw_completed(envelope.tenant_id, raw_id).await?;
        tx.commit().await?;
        // Nothing below this line has executed until `commit` above has
        // resolved — the embedding envelopes built from `committed` are
        // only ever published by the caller after this function returns.
        Ok(committed)
    }

    /// A sprint report couples the sprint's own metrics with the work
    /// items it covers. The sprint row goes through `upsert_sprint`
    /// (`ON CONFLICT DO UPDATE`), not the generic `upsert_entities`
    /// path; membership rows resolve each referenced work item's
    /// *internal* id first, since the join table is keyed on internal
    /// ids rather than provider-native ones.
    async fn normalize_sprint_report(&self, envelope: &Envelope, raw_id: Uuid, payload: &Value) -> WorkerResult<Vec<EntityRow>> {
        let Some(obj) = payload.as_object() else {
            let mut tx = self.store.begin_transform().await?;
            tx.mark_raw_completed(envelope.tenant_id, raw_id).await?;
            tx.commit().await?;
            return Ok(Vec::new());
        };

        let external_id = obj.get("id").and_then(Value::as_str).map(str::to_string);
        let mut sprint_row = EntityRow::new(EntityTable::Sprints, envelope.tenant_id, envelope.integration_id, external_id);
        sprint_row.key = obj.get("name").and_then(Value::as_str).map(str::to_string);
        sprint_row.active = obj.get("active").and_then(Value::as_bool).unwrap_or(true);
        sprint_row.last_updated_at = Utc::now();
        for (field, value) in obj {
            if field == "id" || field == "name" || field == "active" || field == "work_item_ids" {
                continue;
            }
            sprint_row.fields.insert(field.clone(), value.clone());
        }

        let work_item_external_ids: Vec<String> = obj
            .get("work_item_ids")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let mut member_ids = Vec::with_capacity(work_item_external_ids.len());
        for external_id in &work_item_external_ids {
            let member = self
                .store
                .fetch_entity(envelope.tenant_id, EntityTable::WorkItems, EntityLookup::ByExternalId(external_id.clone()))
                .await?;
            if let Some(member) = member {
                member_ids.push(member.id);
            } else {
                warn!(work_item_external_id = %external_id, "sprint report references a work item that has not been transformed yet");
            }
        }

        let mut tx = self.store.begin_transform().await?;
        let committed_sprint = tx.upsert_sprint(sprint_row).await?;
        for work_item_id in member_ids {
            tx.upsert_sprint_membership(envelope.tenant_id, work_item_id, committed_sprint.id).await?;
        }
        tx.mark_raw_completed(envelope.tenant_id, raw_id).await?;
        tx.commit().await?;

        Ok(vec![committed_sprint])
    }
}

/// Map a provider-declared payload type to the normalized table it
/// feeds. Declared here rather than inferred.
fn entity_table_for_payload_type(payload_type: &str) -> Option<EntityTable> {
    match payload_type {
        "project" => Some(EntityTable::Projects),
        "work_item_type" => Some(EntityTable::WorkItemTypes),
        "status" => Some(EntityTable::Statuses),
        "issue" | "work_item" => Some(EntityTable::WorkItems),
        "changelog" => Some(EntityTable::Changelogs),
        "dev_status" | "work_item_pr_link" => Some(EntityTable::WorkItemsPrsLinks),
        "repository" => Some(EntityTable::Repositories),
        "pull_request" => Some(EntityTable::PullRequests),
        "pr_commit" => Some(EntityTable::PrCommits),
        "pr_review" => Some(EntityTable::PrReviews),
        "pr_comment" => Some(EntityTable::PrComments),
        "cross_link" => Some(EntityTable::CrossLinks),
        _ => None,
    }
}

/// Turn one raw payload (a single object, or an array of objects
/// repeated across messages) into deduplicated [`EntityRow`]s. A single
/// message's array can legitimately repeat the same `external_id` (e.g.
/// the same work-item type discovered via two different projects);
/// dedup is scoped to this one payload only.
fn flatten_payload(payload: &Value, table: EntityTable, envelope: &Envelope, mapping: &CustomFieldMapping) -> Vec<EntityRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    let records: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        single => vec![single],
    };

    for record in records {
        if let Some(row) = row_from_record(record, table, envelope, mapping) {
            let key = row.dedup_key().map(str::to_string).unwrap_or_else(|| row.id.to_string());
            if seen.insert(key) {
                rows.push(row);
            }
        }
    }

    // jira_issues_with_changelogs nests each issue's changelog entries
    // under a "changelog_entries" array on the issue record itself.
    if table == EntityTable::WorkItems {
        if let Value::Object(obj) = payload {
            if let Some(Value::Array(entries)) = obj.get("changelog_entries") {
                for entry in entries {
                    if let Some(row) = row_from_record(entry, EntityTable::Changelogs, envelope, mapping) {
                        rows.push(row);
                    }
                }
            }
        }
    }

    rows
}

fn row_from_record(record: &Value, table: EntityTable, envelope: &Envelope, mapping: &CustomFieldMapping) -> Option<EntityRow> {
    let obj = record.as_object()?;
    let external_id = obj.get("id").and_then(Value::as_str).map(str::to_string);
    let mut row = EntityRow::new(table, envelope.tenant_id, envelope.integration_id, external_id);
    row.key = obj.get("key").and_then(Value::as_str).map(str::to_string);
    row.active = obj.get("active").and_then(Value::as_bool).unwrap_or(true);
    row.last_updated_at = Utc::now();

    for (field, value) in obj {
        if field == "id" || field == "key" || field == "active" || field == "changelog_entries" {
            continue;
        }
        // A raw custom-field id that matches a configured mapping slot
        // is stored under the slot's normalized name; everything else
        // is stored under the provider's own field name verbatim.
        let resolved_name = mapping.slot_for_field(field).map(str::to_string).unwrap_or_else(|| field.clone());
        row.fields.insert(resolved_name, value.clone());
    }

    Some(row)
}

/// Rethread outgoing markers gated by the incoming message's own
/// markers: a message in the middle of a step's item sequence must
/// never introduce a spurious `first_item`/`last_item`/`last_job_item`
/// on its fan-out.
fn rethread_markers(mut outgoing: Vec<Envelope>, source: &Envelope) -> Vec<Envelope> {
    if outgoing.is_empty() {
        return outgoing;
    }
    let last = outgoing.len() - 1;
    for (i, env) in outgoing.iter_mut().enumerate() {
        env.first_item = source.first_item && i == 0;
        env.last_item = source.last_item && i == last;
        env.last_job_item = source.last_job_item && i == last;
    }
    outgoing
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::{IntegrationId, TenantId};

    fn base_envelope() -> Envelope {
        Envelope::new(
            TenantId(1),
            IntegrationId(1),
            Uuid::nil(),
            "jira_projects_and_issue_types",
            "work_item_type",
            Uuid::nil(),
            Utc::now(),
            Utc::now(),
        )
        .with_markers(true, true, false)
    }

    #[test]
    fn flatten_dedups_repeated_external_ids_within_one_payload() {
        let payload = serde_json::json!([
            {"id": "WIT-1", "name": "Bug"},
            {"id": "WIT-2", "name": "Story"},
            {"id": "WIT-1", "name": "Bug (duplicate)"},
        ]);
        let mapping = CustomFieldMapping::empty(TenantId(1), IntegrationId(1));
        let rows = flatten_payload(&payload, EntityTable::WorkItemTypes, &base_envelope(), &mapping);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn nested_changelog_entries_are_extracted_as_separate_rows() {
        let payload = serde_json::json!({
            "id": "ISSUE-1",
            "key": "PROJ-1",
            "title": "Fix bug",
            "changelog_entries": [
                {"id": "CL-1", "field": "status"},
                {"id": "CL-2", "field": "assignee"},
            ],
        });
        let mapping = CustomFieldMapping::empty(TenantId(1), IntegrationId(1));
        let rows = flatten_payload(&payload, EntityTable::WorkItems, &base_envelope(), &mapping);
        assert_eq!(rows.iter().filter(|r| r.table == EntityTable::WorkItems).count(), 1);
        assert_eq!(rows.iter().filter(|r| r.table == EntityTable::Changelogs).count(), 2);
    }

    #[test]
    fn mapped_custom_field_ids_are_renamed_to_their_slot() {
        let payload = serde_json::json!({"id": "ISSUE-1", "customfield_10099": 5});
        let mut mapping = CustomFieldMapping::empty(TenantId(1), IntegrationId(1));
        mapping.story_points_field = Some("customfield_10099".into());
        let rows = flatten_payload(&payload, EntityTable::WorkItems, &base_envelope(), &mapping);
        assert_eq!(rows[0].fields.get("story_points_field"), Some(&serde_json::json!(5)));
        assert!(!rows[0].fields.contains_key("customfield_10099"));
    }

    #[test]
    fn unmapped_custom_field_ids_are_kept_verbatim() {
        let payload = serde_json::json!({"id": "ISSUE-1", "customfield_99999": "x"});
        let mapping = CustomFieldMapping::empty(TenantId(1), IntegrationId(1));
        let rows = flatten_payload(&payload, EntityTable::WorkItems, &base_envelope(), &mapping);
        assert!(rows[0].fields.contains_key("customfield_99999"));
    }

    #[test]
    fn rethread_markers_only_flags_first_and_last_of_the_fanout() {
        let source = base_envelope();
        let envs = vec![base_envelope(), base_envelope(), base_envelope()];
        let out = rethread_markers(envs, &source);
        assert!(out[0].first_item);
        assert!(!out[1].first_item && !out[1].last_item);
        assert!(out[2].last_item);
    }

    #[test]
    fn rethread_markers_does_not_introduce_first_item_for_a_non_first_message() {
        let mut source = base_envelope();
        source.first_item = false;
        let envs = vec![base_envelope()];
        let out = rethread_markers(envs, &source);
        assert!(!out[0].first_item);
    }

    fn worker(store: etl_domain::InMemoryStore, queue: Arc<etl_queue::MemoryBackend>, job_store: Arc<etl_queue::MemoryJobStore>) -> TransformWorker {
        TransformWorker { queue, store: Arc::new(store), job_store, dead_letter_threshold: 5 }
    }

    async fn seed_job(job_store: &etl_queue::MemoryJobStore, tenant: TenantId, job_id: Uuid) {
        let doc = etl_queue::JobDocument::new(
            tenant,
            IntegrationId(1),
            job_id,
            "sync",
            Uuid::nil(),
            &["jira_sprint_reports"],
            Utc::now(),
        );
        job_store.upsert(doc).await.unwrap();
    }

    #[tokio::test]
    async fn sprint_report_upserts_the_sprint_and_links_known_work_items() {
        use etl_queue::{MemoryBackend, MemoryJobStore};

        let tenant = TenantId(1);
        let store = etl_domain::InMemoryStore::new();

        let mut tx = store.begin_transform().await.unwrap();
        let known = EntityRow::new(EntityTable::WorkItems, tenant, IntegrationId(1), Some("ISSUE-1".to_string()));
        tx.upsert_entities(vec![known]).await.unwrap();
        tx.commit().await.unwrap();

        let payload = serde_json::json!({
            "id": "SPRINT-1",
            "name": "Sprint 1",
            "state": "closed",
            "work_item_ids": ["ISSUE-1", "ISSUE-missing"],
        });
        let raw = etl_domain::RawExtractionRecord::new(tenant, IntegrationId(1), "sprint_report", serde_json::to_vec(&payload).unwrap(), "SPRINT-1");
        let raw_id = raw.raw_id;
        store.seed_raw(raw);

        let queue = Arc::new(MemoryBackend::new());
        let job_store = Arc::new(MemoryJobStore::new());
        let job_id = Uuid::new_v4();
        seed_job(&job_store, tenant, job_id).await;

        let worker = worker(store.clone(), queue.clone(), job_store.clone());
        let envelope = Envelope::new(tenant, IntegrationId(1), job_id, "jira_sprint_reports", "sprint_report", Uuid::nil(), Utc::now(), Utc::now())
            .with_raw_id(raw_id)
            .with_markers(true, true, true);
        queue.publish(QueueKind::Transform, tenant, envelope).await.unwrap();

        worker.run_once(tenant).await.unwrap();

        assert_eq!(store.entity_count(tenant, EntityTable::Sprints), 1);
        assert_eq!(store.sprint_membership_count(), 1);

        let (embedded, _ack) = queue.consume(QueueKind::Embedding, tenant).await.unwrap();
        assert_eq!(embedded.entity_ref.as_ref().map(|(table, _)| table.as_str()), Some("sprints"));
        assert!(embedded.last_job_item);

        let job = job_store.get(tenant, job_id).await.unwrap();
        assert_eq!(job.steps["jira_sprint_reports"].transform, etl_queue::StageStatus::Finished);
    }
}
