pub mod memory;

use async_trait::async_trait;
use etl_core::TenantId;
use futures::Stream;
use std::pin::Pin;

use crate::{envelope::QueueKind, Envelope, QueueResult};

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Opaque handle returned on consume, required to ack/nack. Carries just
/// enough to let the backend locate the in-flight message again.
#[derive(Debug, Clone)]
pub struct AckHandle {
    pub queue_name: String,
    pub delivery_id: uuid::Uuid,
}

/// Backend trait for queue storage primitives. Queue type names are the
/// closed set in [`QueueKind`]; missing queues are created on first use
/// so "queue not found" is structurally impossible.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// At-least-once, FIFO-per-queue publish.
    async fn publish(&self, kind: QueueKind, tenant: TenantId, envelope: Envelope) -> QueueResult<()>;

    /// Blocks (cooperatively) until a message is available, returning it
    /// together with an ack handle.
    async fn consume(&self, kind: QueueKind, tenant: TenantId) -> QueueResult<(Envelope, AckHandle)>;

    /// Acknowledge successful processing.
    async fn ack(&self, handle: AckHandle) -> QueueResult<()>;

    /// Acknowledge failure. Below the dead-letter threshold the message
    /// is redelivered; at or above it, it is diverted to the
    /// tenant-scoped dead-letter queue.
    async fn nack(&self, handle: AckHandle, envelope: Envelope, dead_letter_threshold: u32) -> QueueResult<bool>;

    /// True if any message tagged with `token` remains on this queue
    /// (used by the completion watcher's settle check). Does not consume
    /// the message.
    async fn peek_token(&self, kind: QueueKind, tenant: TenantId, token: uuid::Uuid) -> QueueResult<bool>;

    /// Depth of the tenant-scoped dead-letter queue for `kind`.
    async fn dead_letter_depth(&self, kind: QueueKind, tenant: TenantId) -> QueueResult<usize>;

    fn event_stream(&self) -> BoxStream<QueueEvent>;
}

/// Minimal, stable event protocol for structured observability.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Published { kind: QueueKind, tenant: TenantId },
    DeadLettered { kind: QueueKind, tenant: TenantId, step_name: String },
}
