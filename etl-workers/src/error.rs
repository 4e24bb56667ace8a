//! Worker-level error type. Each variant maps to the retry/DLQ/failure
//! policy the worker loops decide on — never on the underlying
//! provider/store/queue error's type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] etl_queue::QueueError),
    #[error("job store error: {0}")]
    JobStore(#[from] etl_queue::job_store::JobStoreError),
    #[error("store error: {0}")]
    Store(#[from] etl_domain::StoreError),
    #[error("provider error: {0}")]
    Provider(#[from] etl_providers::ProviderError),
    #[error("vector index error: {0}")]
    VectorIndex(#[from] etl_vector::VectorIndexError),
    #[error("embedding error: {0}")]
    Embedding(#[from] etl_vector::EmbeddingError),
}

impl WorkerError {
    /// Whether this failure is eligible for nack-and-redeliver rather
    /// than an immediate dead-letter diversion.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Provider(e) => e.kind.is_retryable(),
            WorkerError::Embedding(e) => e.is_retryable(),
            WorkerError::Queue(_) => true,
            WorkerError::JobStore(_) => true,
            WorkerError::Store(etl_domain::StoreError::CommitConflict(_)) => true,
            WorkerError::Store(_) => false,
            WorkerError::VectorIndex(_) => true,
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
