//! Token-bucket rate limiting, one bucket per `(tenant, integration_id,
//! provider)` shared across all extraction workers of that tenant. Buckets
//! are in-memory only — they survive worker restarts within a process but
//! are not shared across processes.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use etl_core::{IntegrationId, TenantId};
use etl_domain::Provider;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    tenant_id: TenantId,
    integration_id: IntegrationId,
    provider: Provider,
}

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        let refill_per_sec = capacity / window.as_secs_f64().max(1.0);
        Self { capacity, tokens: capacity, refill_per_sec, last_refill: Instant::now() }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Returns `None` if a token was taken immediately, or `Some(wait)` if
    /// the caller should sleep `wait` before retrying.
    fn try_take(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Owns every tenant's buckets. One instance lives on the scoped manager
/// alongside worker registries and broadcaster subscribers.
#[derive(Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<BucketKey, Mutex<Bucket>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the caller until a token is available for this
    /// `(tenant, integration, provider)` triple, creating the bucket on
    /// first use from the integration's configured rate-limit window.
    pub async fn acquire(
        &self,
        tenant_id: TenantId,
        integration_id: IntegrationId,
        provider: Provider,
        rate_limit_per_window: u32,
        rate_limit_window: Duration,
    ) {
        let key = BucketKey { tenant_id, integration_id, provider };
        loop {
            let wait = {
                let bucket = self
                    .buckets
                    .entry(key)
                    .or_insert_with(|| Mutex::new(Bucket::new(rate_limit_per_window, rate_limit_window)));
                bucket.lock().try_take()
            };
            match wait {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause};

    #[tokio::test(start_paused = true)]
    async fn acquires_immediately_while_tokens_remain_then_waits() {
        let registry = RateLimiterRegistry::new();
        let tenant = TenantId(1);
        let integration = IntegrationId(1);

        for _ in 0..3 {
            registry.acquire(tenant, integration, Provider::Jira, 3, Duration::from_secs(60)).await;
        }

        let acquire = registry.acquire(tenant, integration, Provider::Jira, 3, Duration::from_secs(60));
        tokio::pin!(acquire);
        // The fourth token is not available yet; advancing time lets the
        // refill produce it without the test waiting in real time.
        tokio::select! {
            _ = &mut acquire => panic!("should not acquire before refill"),
            _ = tokio::time::sleep(Duration::from_millis(1)) => {}
        }
        advance(Duration::from_secs(25)).await;
        acquire.await;
    }

    #[tokio::test]
    async fn distinct_tenants_do_not_share_a_bucket() {
        pause();
        let registry = RateLimiterRegistry::new();
        registry
            .acquire(TenantId(1), IntegrationId(1), Provider::Jira, 1, Duration::from_secs(60))
            .await;
        // A different tenant's bucket starts full regardless of tenant 1's state.
        let other = registry.acquire(TenantId(2), IntegrationId(1), Provider::Jira, 1, Duration::from_secs(60));
        tokio::time::timeout(Duration::from_millis(10), other).await.expect("distinct bucket should not block");
    }
}
