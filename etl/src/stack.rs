//! The bundled reference runtime: in-process implementations of every
//! external interface the pipeline needs — relational store, queue
//! broker, vector index, embedding provider, provider clients. None of
//! these talk to a real Jira/GitHub/Qdrant/Postgres; a production
//! deployment swaps each one out for a real client behind the same
//! trait, at the exact construction points in `main`. What's here is
//! enough to run the full pipeline end to end against nothing but this
//! process's memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use etl_core::TenantId;
use etl_providers::client::{ProviderClient, ProviderPage, ProviderRequest, ProviderResult};
use etl_vector::{DistanceMetric, EmbeddingError, EmbeddingProvider, EmbeddingResult, VectorIndex, VectorIndexError, VectorIndexResult, VectorPoint};
use parking_lot::Mutex;
use uuid::Uuid;

/// Deterministic, dependency-free stand-in for a real embedding API.
/// Hashes each text into a small fixed-dimension vector so the same input
/// always produces the same output, which is all the downstream bridge
/// and vector-index logic actually relies on.
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            let slot = i % self.dimensions;
            vector[slot] += byte as f32 / 255.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn initialize(&self, _tenant: TenantId) -> EmbeddingResult<()> {
        Ok(())
    }

    async fn generate(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if self.dimensions == 0 {
            return Err(EmbeddingError::Config("embedding dimension must be non-zero".to_string()));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn cleanup(&self) -> EmbeddingResult<()> {
        Ok(())
    }
}

/// In-memory point store, keyed by collection name.
#[derive(Default)]
pub struct InProcessVectorIndex {
    collections: Mutex<HashMap<String, Vec<VectorPoint>>>,
}

impl InProcessVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InProcessVectorIndex {
    async fn ensure_collection(&self, name: &str, _dim: usize, _metric: DistanceMetric) -> VectorIndexResult<()> {
        self.collections.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> VectorIndexResult<()> {
        let mut collections = self.collections.lock();
        let existing = collections.entry(collection.to_string()).or_default();
        for point in points {
            if let Some(slot) = existing.iter_mut().find(|p| p.id == point.id) {
                *slot = point;
            } else {
                existing.push(point);
            }
        }
        Ok(())
    }

    async fn delete_points(&self, collection: &str, ids: Vec<Uuid>) -> VectorIndexResult<()> {
        if let Some(points) = self.collections.lock().get_mut(collection) {
            points.retain(|p| !ids.contains(&p.id));
        }
        Ok(())
    }

    async fn scroll(&self, collection: &str, _filter: serde_json::Value) -> VectorIndexResult<Vec<VectorPoint>> {
        self.collections.lock().get(collection).cloned().ok_or_else(|| VectorIndexError::NotFound(collection.to_string()))
    }
}

/// Returns zero records for every page. Stands in for a real Jira/GitHub
/// HTTP client so `etl` can exercise the full step-sequencing and
/// completion machinery without network access.
pub struct EmptyProviderClient {
    name: &'static str,
}

impl EmptyProviderClient {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl ProviderClient for EmptyProviderClient {
    fn provider_name(&self) -> &'static str {
        self.name
    }

    async fn fetch_page(&self, _request: &ProviderRequest) -> ProviderResult<ProviderPage> {
        Ok(ProviderPage { records: Vec::new(), next_cursor: None })
    }
}

pub fn default_provider_clients() -> HashMap<etl_domain::Provider, Arc<dyn ProviderClient>> {
    let mut providers: HashMap<etl_domain::Provider, Arc<dyn ProviderClient>> = HashMap::new();
    providers.insert(etl_domain::Provider::Jira, Arc::new(EmptyProviderClient::new("jira")));
    providers.insert(etl_domain::Provider::Github, Arc::new(EmptyProviderClient::new("github")));
    providers
}
