//! etl-providers: the contract extraction workers consume from source
//! providers, the declared per-provider step sequences, the shared error
//! taxonomy, and the token-bucket rate limiter. The providers' own HTTP
//! plumbing is out of scope here — only the request/response shape and the
//! failure classification a worker needs to drive retries and step
//! scheduling.

pub mod client;
pub mod error;
pub mod http;
pub mod rate_limit;
pub mod retry;
pub mod steps;

pub use client::{ProviderClient, ProviderPage, ProviderRequest};
pub use error::{ProviderError, ProviderErrorKind};
pub use http::HttpProviderClient;
pub use rate_limit::RateLimiterRegistry;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use steps::{github_steps, jira_steps, steps_for, StepSpec};
