//! A thin `reqwest`-based skeleton for a real [`ProviderClient`] — the
//! concrete Jira/GitHub request shapes, pagination cursor encodings, and
//! endpoint paths are a production deployment's concern, not this crate's.
//! This client only standardizes the bearer-auth request plumbing and the
//! transient/permanent/rate-limited/auth error classification every
//! concrete provider client needs; `base_url` and the per-step path are
//! supplied by the caller rather than hardcoded here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::client::{ProviderClient, ProviderPage, ProviderRequest, ProviderResult};
use crate::error::ProviderError;

/// Generic bearer-authenticated REST client. A step's path is resolved by
/// `step_path`, a caller-supplied mapping from [`crate::steps::StepSpec`]
/// name to an actual API path — this crate declares no such mapping
/// itself. The response is expected as `{"items": [...], "next_cursor":
/// string|null}`; a concrete provider that shapes responses differently
/// wraps or replaces this client rather than extending it.
pub struct HttpProviderClient<F> {
    name: &'static str,
    base_url: String,
    bearer_token: String,
    step_path: F,
    http: Client,
}

impl<F> HttpProviderClient<F>
where
    F: Fn(&'static str) -> String + Send + Sync,
{
    pub fn new(name: &'static str, base_url: impl Into<String>, bearer_token: impl Into<String>, step_path: F) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(30)).build().expect("reqwest client builds with a fixed default config");
        Self { name, base_url: base_url.into(), bearer_token: bearer_token.into(), step_path, http }
    }
}

#[derive(serde::Deserialize)]
struct PagedResponse {
    items: Vec<serde_json::Value>,
    next_cursor: Option<String>,
}

#[async_trait]
impl<F> ProviderClient for HttpProviderClient<F>
where
    F: Fn(&'static str) -> String + Send + Sync,
{
    fn provider_name(&self) -> &'static str {
        self.name
    }

    async fn fetch_page(&self, request: &ProviderRequest) -> ProviderResult<ProviderPage> {
        let path = (self.step_path)(request.step.name);
        let mut req = self.http.get(format!("{}{}", self.base_url, path)).bearer_auth(&self.bearer_token).query(&[("watermark", request.watermark.to_rfc3339())]);
        if let Some(cursor) = &request.cursor {
            req = req.query(&[("cursor", cursor.as_str())]);
        }

        let response = req.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                ProviderError::transient(format!("{}: {err}", self.name))
            } else {
                ProviderError::permanent(format!("{}: {err}", self.name))
            }
        })?;

        match response.status() {
            StatusCode::OK => {
                let body: PagedResponse = response.json().await.map_err(|err| ProviderError::permanent(format!("{}: unparseable response body: {err}", self.name)))?;
                Ok(ProviderPage { records: body.items, next_cursor: body.next_cursor })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::auth(format!("{}: status {}", self.name, response.status()))),
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::rate_limited(format!("{}: status 429", self.name), None)),
            status if status.is_server_error() => Err(ProviderError::transient(format!("{}: status {status}", self.name))),
            status => Err(ProviderError::permanent(format!("{}: status {status}", self.name))),
        }
    }
}
