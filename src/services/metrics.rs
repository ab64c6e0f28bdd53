// src/services/metrics.rs

//! Popularity metric lookup.
//!
//! A reference such as `https://github.com/owner/repo` is turned into
//! `{base_url}/owner/repo` and the star count is read from the JSON body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::MetricsConfig;
use crate::utils::http;

/// Source of a popularity count for a reference URL.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Look up the count for one reference.
    ///
    /// Errors are per-reference and never poison other lookups.
    async fn fetch(&self, reference: &str) -> Result<u64>;
}

/// Repository metadata returned by the metric service.
#[derive(Debug, Deserialize)]
struct RepoDetails {
    stargazers_count: u64,
}

/// Build the lookup URL from the last two path segments of a reference.
pub fn metric_target(base: &Url, reference: &str) -> Result<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(AppError::metric(reference, "empty reference"));
    }

    let parsed = Url::parse(reference).map_err(|e| AppError::metric(reference, e))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let [.., owner, repo] = segments.as_slice() else {
        return Err(AppError::metric(
            reference,
            "reference has no owner/repository path",
        ));
    };
    let (owner, repo) = (*owner, *repo);
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    let mut target = base.clone();
    target
        .path_segments_mut()
        .map_err(|_| AppError::metric(reference, "metric base URL cannot take a path"))?
        .pop_if_empty()
        .push(owner)
        .push(repo);
    Ok(target)
}

/// Reset time announced by an exhausted primary rate limit.
///
/// GitHub answers 403 (or 429) with `x-ratelimit-remaining: 0` and the
/// reset instant in `x-ratelimit-reset`.
fn rate_limit_reset(status: StatusCode, headers: &HeaderMap) -> Option<String> {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?;
    if remaining.trim() != "0" {
        return None;
    }
    Some(
        headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("an unknown time")
            .to_string(),
    )
}

/// HTTP-backed metric source with bearer auth and retry on transient failures.
pub struct HttpMetricFetcher {
    client: Client,
    base_url: Url,
    token: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
    /// Set once the exhausted rate limit has been reported
    rate_limit_logged: AtomicBool,
}

impl HttpMetricFetcher {
    /// Create a fetcher from the metric settings.
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        let client = http::create_async_client(&config.user_agent, config.timeout_secs)?;
        Self::with_client(client, config)
    }

    /// Create a fetcher sharing an existing client.
    pub fn with_client(client: Client, config: &MetricsConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        Ok(Self {
            client,
            base_url,
            token: config.token.clone().filter(|t| !t.trim().is_empty()),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            rate_limit_logged: AtomicBool::new(false),
        })
    }

    async fn fetch_once(&self, reference: &str, target: &Url) -> Result<u64> {
        let mut request = self
            .client
            .get(target.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::metric_transient(reference, e))?;

        let status = response.status();
        if !status.is_success() {
            if let Some(reset) = rate_limit_reset(status, response.headers()) {
                if !self.rate_limit_logged.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "Metric service rate limit exhausted; it resets at {} (unix time). \
                         Lookups until then record 0 stars",
                        reset
                    );
                }
                return Err(AppError::metric(
                    reference,
                    format!("{target} returned {status}: rate limit exhausted"),
                ));
            }
            let message = format!("{target} returned {status}");
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    AppError::metric_transient(reference, message)
                } else {
                    AppError::metric(reference, message)
                },
            );
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::metric_transient(reference, e))?;
        let details: RepoDetails = serde_json::from_slice(&body)
            .map_err(|e| AppError::metric(reference, format!("undecodable body: {e}")))?;

        Ok(details.stargazers_count)
    }
}

#[async_trait]
impl MetricSource for HttpMetricFetcher {
    async fn fetch(&self, reference: &str) -> Result<u64> {
        let target = metric_target(&self.base_url, reference)?;

        let mut attempt = 0;
        loop {
            match self.fetch_once(reference, &target).await {
                Ok(count) => {
                    log::debug!("Star count for {}: {}", target, count);
                    return Ok(count);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    log::warn!(
                        "Metric lookup for {} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        target,
                        attempt + 1,
                        self.max_retries + 1,
                        backoff.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
