//! etl-queue: durable, tenant-partitioned message transport plus the
//! job-lifecycle state machine it carries markers for.

pub mod backend;
pub mod envelope;
pub mod error;
pub mod job;
pub mod job_store;

pub use backend::{memory::MemoryBackend, AckHandle, BoxStream, QueueBackend, QueueEvent};
pub use envelope::{Envelope, PayloadType, QueueKind};
pub use error::{JobError, QueueError, QueueResult};
pub use job::{JobDocument, JobToken, OverallStatus, Stage, StageStatus, StepState};
pub use job_store::{memory::MemoryJobStore, JobStore, JobStoreError, JobStoreResult};
