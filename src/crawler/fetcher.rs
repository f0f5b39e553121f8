//! Plain HTTP fetcher
//!
//! This module handles the first-choice retrieval path of the crawl pipeline:
//! - Building HTTP clients with the fleet's user agent
//! - GET requests without script execution
//! - Bounded retry of transient failures with backoff
//! - Error classification into transient and permanent failures

use crate::backoff::Backoff;
use crate::config::{CrawlerConfig, UserAgentConfig};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a URL could not be retrieved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeout, connection failure, 429 or 5xx; worth retrying
    #[error("Transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    /// 4xx, non-HTML content or an undecodable body; retrying will not help
    #[error("Permanent failure fetching {url}: {reason}")]
    Permanent {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Rendering {url} timed out")]
    RenderTimeout { url: String },

    #[error("No usable content at {url}")]
    EmptyContent { url: String },

    #[error("Fetch of {url} cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Transient { url, .. }
            | Self::Permanent { url, .. }
            | Self::RenderTimeout { url }
            | Self::EmptyContent { url }
            | Self::Cancelled { url } => url,
        }
    }
}

/// A successfully retrieved HTML page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: String,
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
}

/// Formats the user agent: `CrawlerName/Version (+ContactURL)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{})",
        config.crawler_name, config.crawler_version, config.contact_url
    )
}

/// Builds an HTTP client with the fleet's user agent
///
/// # Example
///
/// ```no_run
/// use crawlfleet::config::UserAgentConfig;
/// use crawlfleet::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "FleetBot".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(config))
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

fn is_html(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.is_empty()
        || content_type.contains("text/html")
        || content_type.contains("application/xhtml")
}

/// Classifies a reqwest error for `url`
pub(crate) fn classify_reqwest_error(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Transient {
            url: url.to_string(),
            reason: "request timeout".to_string(),
        }
    } else if e.is_connect() {
        FetchError::Transient {
            url: url.to_string(),
            reason: format!("connection failed: {}", e),
        }
    } else if e.is_request() {
        FetchError::Transient {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        FetchError::Permanent {
            url: url.to_string(),
            status: e.status().map(|s| s.as_u16()),
            reason: e.to_string(),
        }
    }
}

/// Classifies a non-success HTTP status
pub(crate) fn classify_status(url: &str, status: StatusCode) -> FetchError {
    let transient = status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error();

    if transient {
        FetchError::Transient {
            url: url.to_string(),
            reason: format!("HTTP {}", status.as_u16()),
        }
    } else {
        FetchError::Permanent {
            url: url.to_string(),
            status: Some(status.as_u16()),
            reason: format!("HTTP {}", status.as_u16()),
        }
    }
}

/// Plain fetcher with bounded retry
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | HTTP 404, other 4xx | Permanent, no retry |
/// | HTTP 408, 429, 5xx | Retry up to `max-retries` with backoff |
/// | Timeout, connection failure | Retry up to `max-retries` with backoff |
/// | Non-HTML content type | Permanent, no retry |
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    backoff: Backoff,
    max_retries: u32,
}

impl PageFetcher {
    pub fn new(client: Client, config: &CrawlerConfig) -> Self {
        let base = Duration::from_millis(config.retry_base_ms);
        Self {
            client,
            backoff: Backoff::new(base, base.saturating_mul(16), 0.2),
            max_retries: config.max_retries,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// One GET attempt
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !is_html(&content_type) {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("not HTML: {}", content_type),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        })
    }

    /// Fetches with retries for transient failures, abandoning on cancellation
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
                result = self.fetch(url) => result,
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    debug!("Retrying {} in {:?} after: {}", url, delay, e);
                    attempt += 1;

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }
}
