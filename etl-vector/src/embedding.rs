//! The embedding provider contract and the cooperative scope the worker
//! runs it in: initialize, one `generate` call, and cleanup in a single
//! scope with cleanup guaranteed on every exit path.

use async_trait::async_trait;
use etl_core::TenantId;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    #[error("embedding provider auth error: {0}")]
    Auth(String),
    #[error("embedding provider config error: {0}")]
    Config(String),
    #[error("embedding provider transient error: {0}")]
    Transient(String),
    #[error("embedding provider permanent error: {0}")]
    Permanent(String),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn initialize(&self, tenant: TenantId) -> EmbeddingResult<()>;

    /// `texts` is ordered; the returned vectors correspond positionally.
    async fn generate(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Must be idempotent — the cooperative scope below calls it on every
    /// exit path, including ones where `initialize` itself failed.
    async fn cleanup(&self) -> EmbeddingResult<()>;
}

/// Runs `initialize` -> `generate` -> `cleanup` as one cooperative scope.
/// `cleanup` runs even if `initialize` or `generate` fails, finalizers
/// run inside the same scope that acquired the resource.
pub struct EmbeddingScope<'a> {
    provider: &'a dyn EmbeddingProvider,
    tenant: TenantId,
    cleaned_up: bool,
}

impl<'a> EmbeddingScope<'a> {
    pub async fn run(provider: &'a dyn EmbeddingProvider, tenant: TenantId, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut scope = EmbeddingScope { provider, tenant, cleaned_up: false };
        let result = scope.execute(texts).await;
        scope.cleanup_now().await;
        result
    }

    async fn execute(&mut self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        self.provider.initialize(self.tenant).await?;
        self.provider.generate(texts).await
    }

    async fn cleanup_now(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        if let Err(err) = self.provider.cleanup().await {
            warn!(tenant = %self.tenant, error = %err, "embedding provider cleanup failed");
        }
    }
}

impl<'a> Drop for EmbeddingScope<'a> {
    fn drop(&mut self) {
        if !self.cleaned_up {
            // The scope was abandoned (panicked or dropped) before
            // `run` reached its own cleanup call. We cannot `.await`
            // here, so this only logs — `run` is the only supported
            // entry point and always drives cleanup to completion.
            warn!(tenant = %self.tenant, "embedding scope dropped without explicit cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        initialized: AtomicBool,
        cleaned_up: AtomicU32,
        fail_generate: AtomicBool,
        seen_texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn initialize(&self, _tenant: TenantId) -> EmbeddingResult<()> {
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn generate(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
            *self.seen_texts.lock().unwrap() = texts.to_vec();
            if self.fail_generate.load(Ordering::SeqCst) {
                return Err(EmbeddingError::Transient("upstream timeout".into()));
            }
            Ok(texts.iter().map(|_| vec![0.0, 1.0]).collect())
        }

        async fn cleanup(&self) -> EmbeddingResult<()> {
            self.cleaned_up.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn cleanup_runs_on_success() {
        let provider = RecordingProvider::default();
        let texts = vec!["work item: fix login bug".to_string()];
        let result = EmbeddingScope::run(&provider, TenantId(1), &texts).await;
        assert!(result.is_ok());
        assert!(provider.initialized.load(Ordering::SeqCst));
        assert_eq!(provider.cleaned_up.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_runs_even_when_generate_fails() {
        let provider = RecordingProvider::default();
        provider.fail_generate.store(true, Ordering::SeqCst);
        let texts = vec!["pull request: add retry".to_string()];
        let result = EmbeddingScope::run(&provider, TenantId(1), &texts).await;
        assert!(result.is_err());
        assert_eq!(provider.cleaned_up.load(Ordering::SeqCst), 1);
    }
}
