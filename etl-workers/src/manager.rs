//! Pipeline manager. Owns every long-lived resource for one run — the
//! queue, the relational store, the vector index, the embedding
//! provider, one client per configured source provider, and the
//! progress broadcaster — and spawns `workers_per_stage` consumer tasks
//! per `(tenant, stage)` plus the completion watcher, all under one
//! shutdown signal.
//!
//! Grounded on `Arc`-shared resources handed to tasks, active-work
//! tracked in one place, and on [`etl_core::app::PipelineRegistry`]'s
//! acquisition-order bookkeeping for the reverse-order teardown this
//! requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use etl_core::app::PipelineRegistry;
use etl_core::tenant::TenantContext;
use etl_core::PipelineConfig;
use etl_domain::{Provider, RelationalStore};
use etl_providers::client::ProviderResult;
use etl_providers::{ProviderClient, ProviderPage, ProviderRequest, RateLimiterRegistry, RetryPolicy};
use etl_queue::{JobStore, QueueBackend};
use etl_vector::{EmbeddingProvider, VectorIndex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::completion::CompletionWatcher;
use crate::embedding::EmbeddingWorker;
use crate::error::WorkerResult;
use crate::extraction::ExtractionWorker;
use crate::transform::TransformWorker;
use etl_broadcast::ProgressBroadcaster;

/// One tenant's active integration, paired with the provider its
/// extraction worker pool should speak. A tenant with two integrations
/// on two different providers needs two entries.
#[derive(Debug, Clone)]
pub struct TenantIntegration {
    pub context: TenantContext,
    pub provider: Provider,
}

/// Wraps an `Arc<dyn ProviderClient>` so it can stand in for the generic
/// `P: ProviderClient` parameter [`ExtractionWorker`] takes — one worker
/// struct per provider, not per concrete client type.
struct DynProviderClient(Arc<dyn ProviderClient>);

#[async_trait]
impl ProviderClient for DynProviderClient {
    fn provider_name(&self) -> &'static str {
        self.0.provider_name()
    }

    async fn fetch_page(&self, request: &ProviderRequest) -> ProviderResult<ProviderPage> {
        self.0.fetch_page(request).await
    }
}

/// Everything [`PipelineManager::new`] needs, gathered in one place so
/// the `etl` binary's startup sequence has a single call site.
pub struct PipelineResources {
    pub queue: Arc<dyn QueueBackend>,
    pub store: Arc<dyn RelationalStore>,
    pub job_store: Arc<dyn JobStore>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub providers: HashMap<Provider, Arc<dyn ProviderClient>>,
    pub tenants: Vec<TenantIntegration>,
}

/// Owns one run's workers and resources. `spawn` hands back a
/// [`RunningPipeline`] holding the join handles; dropping that handle
/// without calling `shutdown` leaves the tasks running detached, so the
/// binary crate always calls `shutdown` on its exit path.
pub struct PipelineManager {
    config: PipelineConfig,
    registry: Arc<PipelineRegistry>,
    resources: PipelineResources,
    broadcaster: Arc<ProgressBroadcaster>,
    accepting: Arc<AtomicBool>,
}

impl PipelineManager {
    pub fn new(config: PipelineConfig, resources: PipelineResources, broadcaster: Arc<ProgressBroadcaster>) -> Self {
        let registry = Arc::new(PipelineRegistry::new());
        registry.set("queue", resources.queue.clone());
        registry.set("store", resources.store.clone());
        registry.set("job_store", resources.job_store.clone());
        registry.set("vector_index", resources.vector_index.clone());
        registry.set("embedding_provider", resources.embedding_provider.clone());

        Self { config, registry, resources, broadcaster, accepting: Arc::new(AtomicBool::new(true)) }
    }

    /// True while the manager is accepting new work. The admin surface
    /// checks this before enqueuing a new sync job; it flips to `false`
    /// as the very first step of shutdown.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Spawn every worker task and the completion watcher. Each
    /// `(tenant, stage)` gets `workers_per_stage` independent consumer
    /// loops, each owning exactly one queue consumer.
    pub fn spawn(&self) -> RunningPipeline {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let rate_limiter = Arc::new(RateLimiterRegistry::new());

        for tenant in &self.resources.tenants {
            let Some(client) = self.resources.providers.get(&tenant.provider).cloned() else {
                warn!(tenant_id = %tenant.context.tenant_id, provider = ?tenant.provider, "no client registered for this tenant's provider, skipping extraction workers");
                continue;
            };
            let extraction_worker = Arc::new(ExtractionWorker {
                queue: self.resources.queue.clone(),
                store: self.resources.store.clone(),
                job_store: self.resources.job_store.clone(),
                provider_client: Arc::new(DynProviderClient(client)),
                rate_limiter: rate_limiter.clone(),
                retry_policy: RetryPolicy::default(),
                dead_letter_threshold: self.config.dead_letter_threshold,
            });
            for _ in 0..self.config.workers_per_stage {
                handles.push(self.spawn_loop(shutdown_rx.clone(), tenant.context.tenant_id, extraction_worker.clone(), |w, t| async move { w.run_once(t).await }));
            }
        }

        let distinct_tenants: Vec<_> = {
            let mut seen = std::collections::HashSet::new();
            self.resources.tenants.iter().map(|t| t.context.tenant_id).filter(|t| seen.insert(*t)).collect()
        };

        for &tenant_id in &distinct_tenants {
            let transform_worker = Arc::new(TransformWorker {
                queue: self.resources.queue.clone(),
                store: self.resources.store.clone(),
                job_store: self.resources.job_store.clone(),
                dead_letter_threshold: self.config.dead_letter_threshold,
            });
            for _ in 0..self.config.workers_per_stage {
                handles.push(self.spawn_loop(shutdown_rx.clone(), tenant_id, transform_worker.clone(), |w, t| async move { w.run_once(t).await }));
            }

            let embedding_worker = Arc::new(EmbeddingWorker {
                queue: self.resources.queue.clone(),
                store: self.resources.store.clone(),
                job_store: self.resources.job_store.clone(),
                vector_index: self.resources.vector_index.clone(),
                embedding_provider: self.resources.embedding_provider.clone(),
                broadcaster: self.broadcaster.clone(),
                dead_letter_threshold: self.config.dead_letter_threshold,
                reset_initial_deadline: self.config.reset_initial_deadline,
            });
            for _ in 0..self.config.workers_per_stage {
                handles.push(self.spawn_loop(shutdown_rx.clone(), tenant_id, embedding_worker.clone(), |w, t| async move { w.run_once(t).await }));
            }
        }

        let watcher = Arc::new(CompletionWatcher {
            job_store: self.resources.job_store.clone(),
            queue: self.resources.queue.clone(),
            broadcaster: self.broadcaster.clone(),
            reset_backoff_schedule: self.config.reset_backoff_schedule.clone(),
            poll_interval: std::time::Duration::from_secs(1),
        });
        let mut watcher_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watcher_shutdown.changed() => break,
                    result = watcher.tick(chrono::Utc::now()) => {
                        if let Err(err) = result {
                            warn!(error = %err, "completion watcher tick failed");
                        }
                    }
                }
                if *watcher_shutdown.borrow() {
                    break;
                }
                tokio::time::sleep(watcher.poll_interval).await;
            }
        }));

        RunningPipeline {
            handles,
            shutdown_tx,
            registry: self.registry.clone(),
            embedding_provider: self.resources.embedding_provider.clone(),
            accepting: self.accepting.clone(),
            drain_timeout: self.config.drain_timeout,
        }
    }

    /// One consumer loop: repeat `run_once` until told to stop. A
    /// message already in flight when shutdown fires is not interrupted
    /// — the `select!` only races the *next* iteration's wait against
    /// the shutdown signal, never an in-progress call.
    fn spawn_loop<W, F, Fut>(&self, mut shutdown: watch::Receiver<bool>, tenant_id: etl_core::TenantId, worker: Arc<W>, step: F) -> JoinHandle<()>
    where
        W: Send + Sync + 'static,
        F: Fn(Arc<W>, etl_core::TenantId) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = WorkerResult<()>> + Send,
    {
        tokio::spawn(async move {
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    result = step(worker.clone(), tenant_id) => {
                        if let Err(err) = result {
                            warn!(tenant_id = %tenant_id, error = %err, "worker loop iteration failed");
                        }
                    }
                }
            }
        })
    }
}

/// A spawned pipeline. Call [`shutdown`](Self::shutdown) exactly once to
/// run the system-wide shutdown sequence.
pub struct RunningPipeline {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    registry: Arc<PipelineRegistry>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    accepting: Arc<AtomicBool>,
    drain_timeout: std::time::Duration,
}

impl RunningPipeline {
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) -> WorkerResult<()> {
        // 1. Switch to rejecting new requests — modeled here as the
        // accepting flag the admin surface consults before enqueuing a
        // new job.
        self.accepting.store(false, Ordering::SeqCst);
        info!("shutdown: no longer accepting new work");

        // 2. Stop accepting new queue deliveries (cancel consumers).
        let _ = self.shutdown_tx.send(true);

        // 3. Wait for in-flight processing up to the configured drain
        // window, then abort anything still running.
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        for handle in &mut self.handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut *handle).await.is_err() {
                warn!("drain window elapsed before a worker loop finished, aborting");
                handle.abort();
            }
        }
        info!("shutdown: all worker loops stopped");

        // 4. Run finalizers in order: cleanup embedding provider; close
        // HTTP clients; close DB pool; close vector-index client; close
        // broker channels. "Closing" a resource behind a trait object
        // with no explicit close method means dropping the registry's
        // last reference to it — the same cooperative scope that started
        // it is the one tearing it down.
        if let Err(err) = self.embedding_provider.cleanup().await {
            warn!(error = %err, "embedding provider cleanup failed during shutdown");
        }
        self.registry.remove("embedding_provider");
        self.registry.remove("store"); // HTTP-backed provider clients are not registry members; only the DB-facing store and index are
        self.registry.remove("vector_index");
        self.registry.remove("job_store");
        self.registry.remove("queue");
        info!("shutdown: finalizers complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_broadcast::ProgressBroadcaster;
    use etl_core::{IntegrationId, TenantId};
    use etl_queue::{MemoryBackend, MemoryJobStore};
    use etl_vector::{EmbeddingResult, VectorIndexResult};
    use std::sync::atomic::AtomicUsize;

    struct NoopEmbeddingProvider {
        cleanups: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for NoopEmbeddingProvider {
        async fn initialize(&self, _tenant: TenantId) -> EmbeddingResult<()> {
            Ok(())
        }
        async fn generate(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0]).collect())
        }
        async fn cleanup(&self) -> EmbeddingResult<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopVectorIndex;

    #[async_trait]
    impl VectorIndex for NoopVectorIndex {
        async fn ensure_collection(&self, _name: &str, _dim: usize, _metric: etl_vector::DistanceMetric) -> VectorIndexResult<()> {
            Ok(())
        }
        async fn upsert(&self, _collection: &str, _points: Vec<etl_vector::VectorPoint>) -> VectorIndexResult<()> {
            Ok(())
        }
        async fn delete_points(&self, _collection: &str, _ids: Vec<uuid::Uuid>) -> VectorIndexResult<()> {
            Ok(())
        }
        async fn scroll(&self, _collection: &str, _filter: serde_json::Value) -> VectorIndexResult<Vec<etl_vector::VectorPoint>> {
            Ok(Vec::new())
        }
    }

    struct NoopProviderClient;

    #[async_trait]
    impl ProviderClient for NoopProviderClient {
        fn provider_name(&self) -> &'static str {
            "jira"
        }
        async fn fetch_page(&self, _request: &ProviderRequest) -> ProviderResult<ProviderPage> {
            Ok(ProviderPage { records: Vec::new(), next_cursor: None })
        }
    }

    fn manager(tenants: Vec<TenantIntegration>) -> (PipelineManager, Arc<NoopEmbeddingProvider>) {
        let embedding_provider = Arc::new(NoopEmbeddingProvider { cleanups: AtomicUsize::new(0) });
        let mut providers: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(Provider::Jira, Arc::new(NoopProviderClient));

        let resources = PipelineResources {
            queue: Arc::new(MemoryBackend::new()),
            store: Arc::new(etl_domain::InMemoryStore::new()),
            job_store: Arc::new(MemoryJobStore::new()),
            vector_index: Arc::new(NoopVectorIndex),
            embedding_provider: embedding_provider.clone(),
            providers,
            tenants,
        };
        let mut config = PipelineConfig::default();
        config.workers_per_stage = 1;
        config.drain_timeout = std::time::Duration::from_millis(200);

        (PipelineManager::new(config, resources, Arc::new(ProgressBroadcaster::new(16))), embedding_provider)
    }

    #[tokio::test]
    async fn spawn_and_shutdown_runs_every_finalizer_without_hanging() {
        let tenants = vec![TenantIntegration { context: TenantContext::new(TenantId(1), IntegrationId(1)), provider: Provider::Jira }];
        let (manager, embedding_provider) = manager(tenants);

        assert!(manager.is_accepting());
        let running = manager.spawn();

        tokio::time::timeout(std::time::Duration::from_secs(2), running.shutdown()).await.unwrap().unwrap();

        assert_eq!(embedding_provider.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_tenant_whose_provider_has_no_registered_client_is_skipped_not_fatal() {
        let tenants = vec![TenantIntegration { context: TenantContext::new(TenantId(2), IntegrationId(2)), provider: Provider::Github }];
        let (manager, _embedding_provider) = manager(tenants);

        let running = manager.spawn();
        tokio::time::timeout(std::time::Duration::from_secs(2), running.shutdown()).await.unwrap().unwrap();
    }
}
