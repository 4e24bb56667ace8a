//! The vector index contract. A concrete implementation targets Qdrant,
//! but only the shape below is prescribed here.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub type VectorIndexResult<T> = Result<T, VectorIndexError>;

#[derive(Error, Debug, Clone)]
pub enum VectorIndexError {
    #[error("collection unreachable: {0}")]
    Unreachable(String),
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("vector index error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Dot,
    Euclidean,
}

/// One point to upsert: deterministic `id` (see
/// [`crate::identity::point_id`]), the dense vector, and an opaque
/// payload for filtered `scroll` queries.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent; called lazily on first vectorization of a
    /// tenant/table pair.
    async fn ensure_collection(&self, name: &str, dim: usize, metric: DistanceMetric) -> VectorIndexResult<()>;

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> VectorIndexResult<()>;

    async fn delete_points(&self, collection: &str, ids: Vec<Uuid>) -> VectorIndexResult<()>;

    /// Administrative inspection only; not on the embedding worker's
    /// write path.
    async fn scroll(&self, collection: &str, filter: Value) -> VectorIndexResult<Vec<VectorPoint>>;
}
