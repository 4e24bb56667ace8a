//! Embedding worker: composes text for a committed row, generates and
//! upserts its vector with deterministic identity, keeps the bridge
//! table in sync, and — on `last_job_item` — runs the completion
//! procedure's first steps.

use std::sync::Arc;

use chrono::Utc;
use etl_broadcast::{ProgressBroadcaster, ProgressEvent};
use etl_domain::{EmbeddingKey, EntityLookup, EntityTable, RelationalStore, VectorBridgeRecord};
use etl_queue::job::Stage;
use etl_queue::{Envelope, JobStore, QueueBackend, QueueKind};
use etl_vector::{collection_name, compose_text, point_id, DistanceMetric, EmbeddingProvider, EmbeddingScope, VectorIndex, VectorPoint};
use tracing::{info, instrument, warn};

use crate::error::WorkerResult;

pub struct EmbeddingWorker {
    pub queue: Arc<dyn QueueBackend>,
    pub store: Arc<dyn RelationalStore>,
    pub job_store: Arc<dyn JobStore>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub dead_letter_threshold: u32,
    /// Fixed initial settle deadline: `reset_deadline = now + 30s`,
    /// distinct from the backoff schedule the completion watcher uses
    /// afterward.
    pub reset_initial_deadline: std::time::Duration,
}

impl EmbeddingWorker {
    #[instrument(skip(self))]
    pub async fn run_once(&self, tenant: etl_core::TenantId) -> WorkerResult<()> {
        let (envelope, ack) = self.queue.consume(QueueKind::Embedding, tenant).await?;
        match self.process(&envelope).await {
            Ok(()) => {
                self.queue.ack(ack).await?;
                Ok(())
            }
            Err(err) => {
                warn!(step = %envelope.step_name, error = %err, "embedding failed, nacking for redelivery");
                let diverted = self.queue.nack(ack, envelope.clone(), self.dead_letter_threshold).await?;
                if diverted {
                    let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
                    job.apply_failure(&envelope.step_name, Stage::Embedding);
                    self.job_store.upsert(job).await?;
                }
                Ok(())
            }
        }
    }

    async fn process(&self, envelope: &Envelope) -> WorkerResult<()> {
        let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
        job.apply_first_item(&envelope.step_name, Stage::Embedding);
        self.job_store.upsert(job).await?;

        if let Some((table_name, lookup_value)) = &envelope.entity_ref {
            self.vectorize_one(envelope, table_name, lookup_value).await?;
        }

        let mut job = self.job_store.get(envelope.tenant_id, envelope.job_id).await?;
        job.apply_last_item(&envelope.step_name, Stage::Embedding);

        self.broadcaster.publish(ProgressEvent::StepStatusChanged {
            tenant_id: envelope.tenant_id,
            job_name: job.job_name.clone(),
            job_id: envelope.job_id,
            step_name: envelope.step_name.clone(),
            stage: "embedding".to_string(),
            status: format!("{:?}", job.steps[&envelope.step_name].embedding).to_lowercase(),
        });

        if envelope.last_job_item {
            self.store.write_last_sync_date(envelope.tenant_id, envelope.integration_id, envelope.new_last_sync_date).await?;
            let deadline = Utc::now() + chrono::Duration::from_std(self.reset_initial_deadline).unwrap_or(chrono::Duration::seconds(30));
            job.complete(envelope.new_last_sync_date, deadline);
            self.broadcaster.publish(ProgressEvent::JobFinished {
                tenant_id: envelope.tenant_id,
                job_name: job.job_name.clone(),
                job_id: envelope.job_id,
            });
            info!(job_id = %envelope.job_id, "job finished, deferred settle-and-reset scheduled");
        }

        self.job_store.upsert(job).await?;
        Ok(())
    }

    /// Fetch, compose, embed, and upsert one committed row plus its
    /// bridge record. A missing row is not an error: the common cause is
    /// a row deleted after the transform commit that produced this
    /// message.
    async fn vectorize_one(&self, envelope: &Envelope, table_name: &str, lookup_value: &str) -> WorkerResult<()> {
        let Some(table) = table_from_name(table_name) else {
            warn!(table = table_name, "embedding message references an unknown table, skipping");
            return Ok(());
        };

        let lookup = match table.embedding_key() {
            EmbeddingKey::Key => EntityLookup::ByKey(lookup_value.to_string()),
            EmbeddingKey::External => EntityLookup::ByExternalId(lookup_value.to_string()),
            EmbeddingKey::Internal => {
                let Ok(id) = uuid::Uuid::parse_str(lookup_value) else {
                    warn!(table = table_name, lookup_value, "embedding message carries a malformed internal id, skipping");
                    return Ok(());
                };
                EntityLookup::ById(id)
            }
        };

        let row = self.store.fetch_entity(envelope.tenant_id, table, lookup).await?;
        let Some(row) = row else {
            info!(table = table_name, lookup_value, "entity not found for embedding, acking without retry");
            return Ok(());
        };

        let text = compose_text(&row);
        let vectors = EmbeddingScope::run(self.embedding_provider.as_ref(), envelope.tenant_id, std::slice::from_ref(&text)).await?;
        let Some(vector) = vectors.into_iter().next() else {
            warn!(table = table_name, lookup_value, "embedding provider returned no vector for a single text");
            return Ok(());
        };

        let collection = collection_name(envelope.tenant_id, table);
        self.vector_index.ensure_collection(&collection, vector.len(), DistanceMetric::Cosine).await?;

        let point = point_id(envelope.tenant_id, table, row.id);
        let payload = serde_json::json!({
            "tenant_id": envelope.tenant_id,
            "table": table.table_name(),
            "record_id": row.id,
            "external_id": row.external_id,
            "key": row.key,
        });
        self.vector_index
            .upsert(&collection, vec![VectorPoint { id: point, vector, payload }])
            .await?;

        let existing = self.store.fetch_vector_bridge(envelope.tenant_id, table, row.id).await?;
        let mut bridge = existing.unwrap_or_else(|| VectorBridgeRecord::new(envelope.tenant_id, envelope.integration_id, table, row.id, collection.clone(), point));
        bridge.collection_name = collection;
        bridge.point_id = point;
        bridge.sync_active(row.active);
        self.store.upsert_vector_bridge(bridge).await?;

        Ok(())
    }
}

fn table_from_name(name: &str) -> Option<EntityTable> {
    EntityTable::all().into_iter().find(|t| t.table_name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use etl_core::{IntegrationId, TenantId};
    use etl_domain::EntityRow;
    use etl_queue::{JobDocument, MemoryBackend, MemoryJobStore};
    use etl_vector::{EmbeddingResult, VectorIndexResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FixedEmbeddingProvider;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddingProvider {
        async fn initialize(&self, _tenant: TenantId) -> EmbeddingResult<()> {
            Ok(())
        }
        async fn generate(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
        async fn cleanup(&self) -> EmbeddingResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn ensure_collection(&self, _name: &str, _dim: usize, _metric: DistanceMetric) -> VectorIndexResult<()> {
            Ok(())
        }
        async fn upsert(&self, _collection: &str, _points: Vec<VectorPoint>) -> VectorIndexResult<()> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn delete_points(&self, _collection: &str, _ids: Vec<Uuid>) -> VectorIndexResult<()> {
            Ok(())
        }
        async fn scroll(&self, _collection: &str, _filter: serde_json::Value) -> VectorIndexResult<Vec<VectorPoint>> {
            Ok(Vec::new())
        }
    }

    fn broadcaster() -> Arc<ProgressBroadcaster> {
        Arc::new(ProgressBroadcaster::new(16))
    }

    async fn seed_job(job_store: &MemoryJobStore, tenant: TenantId, job_id: Uuid) {
        let doc = JobDocument::new(tenant, IntegrationId(1), job_id, "sync", Uuid::nil(), &["jira_issues_with_changelogs"], Utc::now());
        job_store.upsert(doc).await.unwrap();
    }

    #[tokio::test]
    async fn vectorizes_a_known_row_and_upserts_the_bridge() {
        let tenant = TenantId(1);
        let store = etl_domain::InMemoryStore::new();
        let mut tx = store.begin_transform().await.unwrap();
        let mut row = EntityRow::new(EntityTable::WorkItems, tenant, IntegrationId(1), Some("ISSUE-1".into()));
        let row_id = row.id;
        row.key = Some("PROJ-1".into());
        row.fields.insert("title".into(), serde_json::json!("Fix login bug"));
        tx.upsert_entities(vec![row]).await.unwrap();
        tx.commit().await.unwrap();

        let queue = Arc::new(MemoryBackend::new());
        let job_store = Arc::new(MemoryJobStore::new());
        let job_id = Uuid::new_v4();
        seed_job(&job_store, tenant, job_id).await;

        let index = Arc::new(RecordingIndex::default());
        let worker = EmbeddingWorker {
            queue: queue.clone(),
            store: Arc::new(store.clone()),
            job_store: job_store.clone(),
            vector_index: index.clone(),
            embedding_provider: Arc::new(FixedEmbeddingProvider),
            broadcaster: broadcaster(),
            dead_letter_threshold: 5,
            reset_initial_deadline: std::time::Duration::from_secs(30),
        };

        let envelope = Envelope::new(tenant, IntegrationId(1), job_id, "jira_issues_with_changelogs", "issue", Uuid::nil(), Utc::now(), Utc::now())
            .with_entity_ref(EntityTable::WorkItems.table_name(), "PROJ-1")
            .with_markers(true, true, true);
        queue.publish(QueueKind::Embedding, tenant, envelope).await.unwrap();

        worker.run_once(tenant).await.unwrap();

        assert_eq!(index.upserts.load(Ordering::SeqCst), 1);
        let bridge = store.fetch_vector_bridge(tenant, EntityTable::WorkItems, row_id).await.unwrap();
        assert!(bridge.is_some());
        assert!(bridge.unwrap().active);

        let job = job_store.get(tenant, job_id).await.unwrap();
        assert_eq!(job.overall, etl_queue::OverallStatus::Finished);
        assert!(job.reset_deadline.is_some());
        assert_eq!(store.last_sync_date(tenant, IntegrationId(1)), Some(job.last_sync_date));
    }

    #[tokio::test]
    async fn missing_row_is_acked_without_retry() {
        let tenant = TenantId(1);
        let store = etl_domain::InMemoryStore::new();
        let queue = Arc::new(MemoryBackend::new());
        let job_store = Arc::new(MemoryJobStore::new());
        let job_id = Uuid::new_v4();
        seed_job(&job_store, tenant, job_id).await;

        let worker = EmbeddingWorker {
            queue: queue.clone(),
            store: Arc::new(store),
            job_store: job_store.clone(),
            vector_index: Arc::new(RecordingIndex::default()),
            embedding_provider: Arc::new(FixedEmbeddingProvider),
            broadcaster: broadcaster(),
            dead_letter_threshold: 5,
            reset_initial_deadline: std::time::Duration::from_secs(30),
        };

        let envelope = Envelope::new(tenant, IntegrationId(1), job_id, "jira_issues_with_changelogs", "issue", Uuid::nil(), Utc::now(), Utc::now())
            .with_entity_ref(EntityTable::WorkItems.table_name(), "MISSING-999")
            .with_markers(true, true, false);
        queue.publish(QueueKind::Embedding, tenant, envelope).await.unwrap();

        let result = worker.run_once(tenant).await;
        assert!(result.is_ok());
        assert_eq!(queue.dead_letter_depth(QueueKind::Embedding, tenant).await.unwrap(), 0);
    }
}
