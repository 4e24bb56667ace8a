//! In-memory backend for testing and development: per-tenant/per-queue
//! `VecDeque`s guarded by `parking_lot::Mutex`, plus a broadcast channel
//! for observability.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use etl_core::TenantId;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::backend::{AckHandle, BoxStream, QueueBackend, QueueEvent};
use crate::envelope::QueueKind;
use crate::{Envelope, QueueError, QueueResult};

type QueueMap = HashMap<(TenantId, QueueKind), VecDeque<Envelope>>;

pub struct MemoryBackend {
    queues: Arc<Mutex<QueueMap>>,
    dead_letters: Arc<Mutex<QueueMap>>,
    notify: Arc<Notify>,
    events: broadcast::Sender<QueueEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            dead_letters: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            events,
        }
    }

    pub fn dead_letter_len(&self, kind: QueueKind, tenant: TenantId) -> usize {
        self.dead_letters.lock().get(&(tenant, kind)).map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn publish(&self, kind: QueueKind, tenant: TenantId, envelope: Envelope) -> QueueResult<()> {
        self.queues.lock().entry((tenant, kind)).or_default().push_back(envelope);
        self.notify.notify_waiters();
        let _ = self.events.send(QueueEvent::Published { kind, tenant });
        Ok(())
    }

    async fn consume(&self, kind: QueueKind, tenant: TenantId) -> QueueResult<(Envelope, AckHandle)> {
        loop {
            if let Some(envelope) = self.queues.lock().get_mut(&(tenant, kind)).and_then(VecDeque::pop_front) {
                let handle = AckHandle {
                    queue_name: kind.queue_name(tenant),
                    delivery_id: Uuid::new_v4(),
                };
                return Ok((envelope, handle));
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, _handle: AckHandle) -> QueueResult<()> {
        // The in-memory backend removes a message from its queue at
        // consume time, so a successful ack has nothing left to do.
        Ok(())
    }

    async fn nack(&self, handle: AckHandle, mut envelope: Envelope, dead_letter_threshold: u32) -> QueueResult<bool> {
        envelope.attempt += 1;
        if envelope.attempt >= dead_letter_threshold {
            let kind = kind_from_queue_name(&handle.queue_name)?;
            let tenant = envelope.tenant_id;
            let step_name = envelope.step_name.clone();
            self.dead_letters.lock().entry((tenant, kind)).or_default().push_back(envelope);
            let _ = self.events.send(QueueEvent::DeadLettered { kind, tenant, step_name });
            Ok(false)
        } else {
            let kind = kind_from_queue_name(&handle.queue_name)?;
            let tenant = envelope.tenant_id;
            self.queues.lock().entry((tenant, kind)).or_default().push_back(envelope);
            self.notify.notify_waiters();
            Ok(true)
        }
    }

    async fn peek_token(&self, kind: QueueKind, tenant: TenantId, token: Uuid) -> QueueResult<bool> {
        Ok(self
            .queues
            .lock()
            .get(&(tenant, kind))
            .map(|q| q.iter().any(|e| e.token == token))
            .unwrap_or(false))
    }

    async fn dead_letter_depth(&self, kind: QueueKind, tenant: TenantId) -> QueueResult<usize> {
        Ok(self.dead_letter_len(kind, tenant))
    }

    fn event_stream(&self) -> BoxStream<QueueEvent> {
        let receiver = self.events.subscribe();
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        Box::pin(BroadcastStream::new(receiver).filter_map(|r| r.ok()))
    }
}

fn kind_from_queue_name(queue_name: &str) -> QueueResult<QueueKind> {
    for kind in QueueKind::all() {
        if queue_name.starts_with(kind.as_str()) {
            return Ok(kind);
        }
    }
    Err(QueueError::QueueNotFound(queue_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use etl_core::IntegrationId;

    fn test_envelope(token: Uuid) -> Envelope {
        Envelope::new(
            TenantId(1),
            IntegrationId(1),
            Uuid::new_v4(),
            "jira_projects_and_issue_types",
            "project",
            token,
            Utc::now(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn publish_then_consume_fifo() {
        let backend = MemoryBackend::new();
        let token = Uuid::new_v4();
        backend.publish(QueueKind::Extraction, TenantId(1), test_envelope(token)).await.unwrap();

        let (envelope, _handle) = backend.consume(QueueKind::Extraction, TenantId(1)).await.unwrap();
        assert_eq!(envelope.token, token);
    }

    #[tokio::test]
    async fn nack_below_threshold_requeues() {
        let backend = MemoryBackend::new();
        let token = Uuid::new_v4();
        backend.publish(QueueKind::Transform, TenantId(1), test_envelope(token)).await.unwrap();
        let (envelope, handle) = backend.consume(QueueKind::Transform, TenantId(1)).await.unwrap();

        let requeued = backend.nack(handle, envelope, 5).await.unwrap();
        assert!(requeued);

        let (envelope, _) = backend.consume(QueueKind::Transform, TenantId(1)).await.unwrap();
        assert_eq!(envelope.attempt, 1);
    }

    #[tokio::test]
    async fn nack_at_threshold_dead_letters() {
        let backend = MemoryBackend::new();
        let mut envelope = test_envelope(Uuid::new_v4());
        envelope.attempt = 4;
        backend.publish(QueueKind::Transform, TenantId(1), envelope).await.unwrap();
        let (envelope, handle) = backend.consume(QueueKind::Transform, TenantId(1)).await.unwrap();

        let requeued = backend.nack(handle, envelope, 5).await.unwrap();
        assert!(!requeued);
        assert_eq!(backend.dead_letter_depth(QueueKind::Transform, TenantId(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn peek_token_sees_unconsumed_message() {
        let backend = MemoryBackend::new();
        let token = Uuid::new_v4();
        backend.publish(QueueKind::Embedding, TenantId(1), test_envelope(token)).await.unwrap();

        assert!(backend.peek_token(QueueKind::Embedding, TenantId(1), token).await.unwrap());
        assert!(!backend.peek_token(QueueKind::Embedding, TenantId(1), Uuid::new_v4()).await.unwrap());
    }
}
