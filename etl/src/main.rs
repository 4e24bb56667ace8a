//! `etl`: the worker-manager CLI. Starts the extraction/transform/embedding pipeline for a set
//! of configured tenant integrations against the bundled in-memory
//! reference runtime in [`stack`], runs until interrupted, then drains.
//!
//! Exit codes: 0 on a clean shutdown, non-zero on an unrecoverable
//! initialization error (bad CLI arguments, a config value that doesn't
//! parse).

mod stack;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use etl_core::config::ConfigStore;
use etl_core::tenant::TenantContext;
use etl_core::{IntegrationId, PipelineConfig, TenantId};
use etl_domain::{InMemoryStore, Provider};
use etl_queue::{MemoryBackend, MemoryJobStore};
use etl_vector::EmbeddingProvider;
use etl_workers::{submit_sync_job, PipelineManager, PipelineResources, TenantIntegration};
use tracing_subscriber::EnvFilter;

/// One tenant integration to run workers for, as given on the command
/// line: `--integration <tenant>:<integration>:<provider>`.
#[derive(Debug, Clone)]
struct IntegrationArg {
    tenant_id: i64,
    integration_id: i64,
    provider: Provider,
}

impl std::str::FromStr for IntegrationArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [tenant, integration, provider] = parts.as_slice() else {
            return Err(format!("expected <tenant>:<integration>:<provider>, got '{s}'"));
        };
        let tenant_id = tenant.parse().map_err(|_| format!("invalid tenant id: '{tenant}'"))?;
        let integration_id = integration.parse().map_err(|_| format!("invalid integration id: '{integration}'"))?;
        let provider = match provider.to_lowercase().as_str() {
            "jira" => Provider::Jira,
            "github" => Provider::Github,
            other => return Err(format!("unknown provider '{other}', expected 'jira' or 'github'")),
        };
        Ok(IntegrationArg { tenant_id, integration_id, provider })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Start the worker manager for one or more tenant integrations.
#[derive(Parser, Debug)]
#[command(name = "etl", about = "Multi-tenant ETL worker manager")]
struct Cli {
    /// One entry per tenant integration to run, as
    /// `<tenant_id>:<integration_id>:<provider>` (provider is `jira` or
    /// `github`). Repeat the flag to run more than one.
    #[arg(long = "integration", required = true)]
    integrations: Vec<IntegrationArg>,

    /// Worker tasks spawned per (tenant, stage). Overrides
    /// `ETL__WORKERS_PER_STAGE` if both are set.
    #[arg(long)]
    workers_per_stage: Option<u32>,

    /// Seconds to wait for in-flight work to drain before aborting on
    /// shutdown.
    #[arg(long)]
    drain_timeout_secs: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let store = ConfigStore::load_env("ETL__");
    let mut config = PipelineConfig::from_store(&store);
    if let Some(n) = cli.workers_per_stage {
        config.workers_per_stage = n.clamp(1, 10);
    }
    if let Some(secs) = cli.drain_timeout_secs {
        config.drain_timeout = Duration::from_secs(secs);
    }

    let queue = Arc::new(MemoryBackend::new());
    let job_store = Arc::new(MemoryJobStore::new());
    let relational_store = Arc::new(InMemoryStore::new());
    let vector_index = Arc::new(stack::InProcessVectorIndex::new());
    let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::new(stack::HashEmbeddingProvider::new(32));
    let providers = stack::default_provider_clients();

    let tenants: Vec<TenantIntegration> = cli
        .integrations
        .iter()
        .map(|arg| TenantIntegration {
            context: TenantContext::new(TenantId(arg.tenant_id), IntegrationId(arg.integration_id)),
            provider: arg.provider,
        })
        .collect();

    let resources = PipelineResources {
        queue: queue.clone(),
        store: relational_store,
        job_store: job_store.clone(),
        vector_index,
        embedding_provider,
        providers,
        tenants,
    };

    let broadcaster = Arc::new(etl_broadcast::ProgressBroadcaster::new(256));
    let manager = PipelineManager::new(config, resources, broadcaster);

    for arg in &cli.integrations {
        let (job_id, _token) = submit_sync_job(
            job_store.as_ref(),
            queue.as_ref(),
            TenantId(arg.tenant_id),
            IntegrationId(arg.integration_id),
            arg.provider,
            "startup sync",
            chrono::Utc::now() - chrono::Duration::days(30),
        )
        .await?;
        tracing::info!(tenant_id = arg.tenant_id, integration_id = arg.integration_id, %job_id, "submitted startup sync job");
    }

    let running = manager.spawn();
    tracing::info!(tenants = cli.integrations.len(), "worker manager running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining");
    running.shutdown().await?;

    Ok(())
}
