//! Rendered fetcher
//!
//! Script-executing retrieval used only as a fallback when the plain fetch
//! yields a substantially empty page. Two backends:
//! - [`HttpRenderer`] posts the URL to a render service and receives HTML
//! - `ChromiumRenderer` (feature `chromium`) drives a local headless browser

use crate::crawler::fetcher::{classify_reqwest_error, classify_status, FetchError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A backend that returns HTML after script execution
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders `url` and returns the resulting document HTML
    async fn render(&self, url: &str) -> Result<String, FetchError>;

    /// Releases backend resources; called when an execution context is torn down
    async fn shutdown(&self) {}

    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    html: String,
}

/// Render service client: `POST {endpoint}` with `{"url", "timeout_ms"}`,
/// expecting `{"html": "..."}` back
pub struct HttpRenderer {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(client: Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let request = RenderRequest {
            url,
            timeout_ms: self.timeout.as_millis() as u64,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::RenderTimeout {
                        url: url.to_string(),
                    }
                } else {
                    classify_reqwest_error(url, &e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        let body: RenderResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::RenderTimeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Permanent {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    reason: format!("invalid render response: {}", e),
                }
            }
        })?;

        Ok(body.html)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(feature = "chromium")]
pub use chromium::ChromiumRenderer;

#[cfg(feature = "chromium")]
mod chromium {
    use super::PageRenderer;
    use crate::crawler::fetcher::FetchError;
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tracing::{debug, warn};

    /// One headless browser per execution context
    pub struct ChromiumRenderer {
        browser: Mutex<Option<Browser>>,
        handler: JoinHandle<()>,
        timeout: Duration,
    }

    impl ChromiumRenderer {
        pub async fn launch(timeout: Duration) -> Result<Self, FetchError> {
            let config = BrowserConfig::builder().build().map_err(|e| FetchError::Permanent {
                url: String::new(),
                status: None,
                reason: format!("browser config: {}", e),
            })?;

            let (browser, mut handler) =
                Browser::launch(config)
                    .await
                    .map_err(|e| FetchError::Permanent {
                        url: String::new(),
                        status: None,
                        reason: format!("browser launch: {}", e),
                    })?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!("Browser handler stopped: {}", e);
                        break;
                    }
                }
            });

            Ok(Self {
                browser: Mutex::new(Some(browser)),
                handler,
                timeout,
            })
        }

        async fn render_page(&self, url: &str) -> Result<String, FetchError> {
            let failed = |reason: String| FetchError::Permanent {
                url: url.to_string(),
                status: None,
                reason,
            };

            let guard = self.browser.lock().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| failed("browser already shut down".to_string()))?;

            let page = browser
                .new_page(url)
                .await
                .map_err(|e| failed(format!("open page: {}", e)))?;
            drop(guard);

            let result = async {
                page.wait_for_navigation()
                    .await
                    .map_err(|e| failed(format!("navigation: {}", e)))?;
                page.content()
                    .await
                    .map_err(|e| failed(format!("content: {}", e)))
            }
            .await;

            if let Err(e) = page.close().await {
                warn!("Failed to close page for {}: {}", url, e);
            }
            result
        }
    }

    #[async_trait]
    impl PageRenderer for ChromiumRenderer {
        async fn render(&self, url: &str) -> Result<String, FetchError> {
            match tokio::time::timeout(self.timeout, self.render_page(url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::RenderTimeout {
                    url: url.to_string(),
                }),
            }
        }

        async fn shutdown(&self) {
            if let Some(mut browser) = self.browser.lock().await.take() {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser: {}", e);
                }
            }
            self.handler.abort();
        }

        fn name(&self) -> &'static str {
            "chromium"
        }
    }
}
