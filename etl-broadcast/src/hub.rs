//! The broadcaster itself: tenant-filtered fan-out over a
//! `tokio::sync::broadcast` channel, plus per-subject disconnect tracking
//! so logout or credential rotation can tear down every session belonging
//! to a subject.

use std::sync::Arc;

use dashmap::DashMap;
use etl_core::TenantId;
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::auth::Subject;
use crate::event::ProgressEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// Owns the broadcast channel and the registry of live subject sessions.
/// One instance lives on the scoped process manager alongside worker
/// registries and rate-limit buckets.
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressEvent>,
    subject_sessions: DashMap<String, Vec<Arc<Notify>>>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, subject_sessions: DashMap::new() }
    }

    pub fn publish(&self, event: ProgressEvent) {
        // No subscribers is not an error — sending is fire-and-forget.
        let _ = self.sender.send(event);
    }

    /// Register a subscriber under `(tenant, job_name)`. Only reachable
    /// after the caller has authenticated the presenting credential —
    /// callers pass the already-validated [`Subject`], this method never
    /// re-verifies it.
    pub fn subscribe(&self, subject: &Subject, job_name: Option<String>) -> Subscription {
        let disconnect = Arc::new(Notify::new());
        self.subject_sessions.entry(subject.subject_id.clone()).or_default().push(disconnect.clone());

        debug!(tenant_id = %subject.tenant_id, subject_id = %subject.subject_id, "subscriber registered");

        Subscription {
            id: Uuid::new_v4(),
            receiver: self.sender.subscribe(),
            tenant_id: subject.tenant_id,
            job_name,
            disconnect,
        }
    }

    /// Disconnect every live session for a subject.
    pub fn disconnect_subject(&self, subject_id: &str) {
        if let Some((_, sessions)) = self.subject_sessions.remove(subject_id) {
            for session in sessions {
                session.notify_waiters();
            }
        }
    }

    pub fn active_subject_count(&self) -> usize {
        self.subject_sessions.len()
    }
}

/// A live subscription. `recv` filters to this session's tenant (and, if
/// set, job name), and resolves to `None` once the session is torn down
/// or the channel is closed.
pub struct Subscription {
    pub id: Uuid,
    receiver: broadcast::Receiver<ProgressEvent>,
    tenant_id: TenantId,
    job_name: Option<String>,
    disconnect: Arc<Notify>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            tokio::select! {
                _ = self.disconnect.notified() => return None,
                received = self.receiver.recv() => match received {
                    Ok(event) if self.matches(&event) => return Some(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    fn matches(&self, event: &ProgressEvent) -> bool {
        event.tenant_id() == self.tenant_id && self.job_name.as_deref().map_or(true, |name| name == event.job_name())
    }
}
