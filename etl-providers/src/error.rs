//! The uniform error surface every provider client exposes:
//! `{transient, permanent, rate_limited, auth}`. Retry/DLQ/failure decisions
//! are made on this kind, never on the underlying exception or status code.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Timeout, 5xx, or a provider-specific transient code. Retried with
    /// backoff.
    Transient,
    /// 4xx other than auth/rate-limit; not eligible for retry.
    Permanent,
    /// A provider-reported rate-limit response. Retried with backoff, and
    /// also feeds back into the token bucket.
    RateLimited,
    /// Credentials rejected or expired. Not retried at this layer — the
    /// worker surfaces it as a step failure; token refresh is out of scope
    /// here.
    Auth,
}

impl ProviderErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderErrorKind::Transient | ProviderErrorKind::RateLimited)
    }
}

#[derive(Error, Debug, Clone)]
#[error("provider error ({kind:?}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// `Retry-After` equivalent, when the provider supplied one.
    pub retry_after: Option<std::time::Duration>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), retry_after: None }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Permanent, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<std::time::Duration>) -> Self {
        Self { kind: ProviderErrorKind::RateLimited, message: message.into(), retry_after }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, message)
    }
}
