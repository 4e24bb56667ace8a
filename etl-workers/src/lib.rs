//! etl-workers: the extraction, transform, and embedding worker loops, the
//! job completion watcher, and the pipeline manager that owns their
//! resources for the lifetime of one run.

pub mod completion;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod manager;
pub mod submit;
pub mod transform;

pub use completion::CompletionWatcher;
pub use embedding::EmbeddingWorker;
pub use error::{WorkerError, WorkerResult};
pub use extraction::ExtractionWorker;
pub use manager::{PipelineManager, PipelineResources, RunningPipeline, TenantIntegration};
pub use submit::submit_sync_job;
pub use transform::TransformWorker;
