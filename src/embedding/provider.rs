//! Embedding provider for OpenAI-compatible APIs
//!
//! Works against any endpoint speaking the `/v1/embeddings` request shape:
//! OpenAI, Azure OpenAI, and local servers such as vLLM or
//! text-embeddings-inference.

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingError, EmbeddingResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A remote model that turns text into vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a single chunk
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Permanent("no embedding returned".to_string()))
    }

    /// Embeds several chunks in one request, returning vectors in input order
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// HTTP provider for OpenAI-compatible embedding endpoints
#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
}

impl HttpEmbeddingProvider {
    /// Builds the provider from configuration, reading the API key from the
    /// environment variable named by `api-key-env`
    pub fn from_config(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| EmbeddingError::Config("embedding endpoint not set".to_string()))?;
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "No API key in ${} for embedding endpoint {}",
                config.api_key_env, endpoint
            );
        }

        Self::new(
            endpoint,
            config.model.clone(),
            api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> EmbeddingResult<Self> {
        let endpoint = endpoint.into();
        let model = model.into();

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| EmbeddingError::Config(format!("Invalid API key format: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "Embedding provider initialized: endpoint={}, model={}",
            endpoint, model
        );

        Ok(Self {
            client,
            endpoint,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        debug!(
            "Sending embedding request to {} for {} texts",
            self.endpoint,
            texts.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    EmbeddingError::Transient(format!("HTTP request failed: {}", e))
                } else {
                    EmbeddingError::Permanent(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|r| r.error.message)
                .unwrap_or(body);
            let reason = format!("API error ({}): {}", status, message);

            return Err(if is_transient_status(status) {
                EmbeddingError::Transient(reason)
            } else {
                EmbeddingError::Permanent(reason)
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Transient(format!("Response timed out: {}", e))
            } else {
                EmbeddingError::Permanent(format!("Failed to parse response: {}", e))
            }
        })?;

        let mut data = parsed.data;
        if data.len() != texts.len() {
            return Err(EmbeddingError::Permanent(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|d| d.index);

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Timeouts, throttling and server errors are worth retrying
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}
