//! Execution contexts
//!
//! A context is the heavyweight per-slot state a job runs with: the HTTP
//! client behind the fetcher and, when rendering is on, a renderer backend.
//! Contexts are built lazily by a [`ContextFactory`] and torn down when a slot
//! is recycled.

use crate::config::{Config, RenderBackend};
use crate::crawler::{build_http_client, HttpRenderer, PageFetcher, PageRenderer};
use crate::supervisor::SupervisorError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Resources a job runs with, owned by one slot
pub struct ExecutionContext {
    pub slot_id: usize,

    /// Incremented every time the slot's context is rebuilt
    pub generation: u64,

    pub fetcher: PageFetcher,

    pub renderer: Option<Arc<dyn PageRenderer>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("slot_id", &self.slot_id)
            .field("generation", &self.generation)
            .field("renderer", &self.renderer.as_ref().map(|r| r.name()))
            .finish()
    }
}

/// Builds and tears down execution contexts
#[async_trait]
pub trait ContextFactory: Send + Sync {
    async fn build(&self, slot_id: usize, generation: u64)
        -> Result<ExecutionContext, SupervisorError>;

    async fn teardown(&self, context: Arc<ExecutionContext>) {
        if let Some(renderer) = &context.renderer {
            renderer.shutdown().await;
        }
    }
}

/// Builds contexts from the worker configuration
pub struct ConfigContextFactory {
    config: Config,
}

impl ConfigContextFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn build_renderer(
        &self,
        client: &reqwest::Client,
    ) -> Result<Option<Arc<dyn PageRenderer>>, SupervisorError> {
        let render = &self.config.render;
        if !render.enabled {
            return Ok(None);
        }

        let timeout = Duration::from_secs(render.timeout_secs);
        match render.backend {
            RenderBackend::Http => {
                let endpoint = render.endpoint.clone().ok_or_else(|| {
                    SupervisorError::ContextBuild("render endpoint not set".to_string())
                })?;
                Ok(Some(Arc::new(HttpRenderer::new(
                    client.clone(),
                    endpoint,
                    timeout,
                ))))
            }
            #[cfg(feature = "chromium")]
            RenderBackend::Chromium => {
                let renderer = crate::crawler::ChromiumRenderer::launch(timeout)
                    .await
                    .map_err(|e| SupervisorError::ContextBuild(e.to_string()))?;
                Ok(Some(Arc::new(renderer)))
            }
            #[cfg(not(feature = "chromium"))]
            RenderBackend::Chromium => Err(SupervisorError::ContextBuild(
                "chromium backend requires the `chromium` feature".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ContextFactory for ConfigContextFactory {
    async fn build(
        &self,
        slot_id: usize,
        generation: u64,
    ) -> Result<ExecutionContext, SupervisorError> {
        let client = build_http_client(
            &self.config.user_agent,
            Duration::from_secs(self.config.crawler.request_timeout_secs),
        )
        .map_err(|e| SupervisorError::ContextBuild(e.to_string()))?;

        let renderer = self.build_renderer(&client).await?;
        debug!(
            slot = slot_id,
            generation,
            renderer = renderer.as_ref().map(|r| r.name()).unwrap_or("none"),
            "Built execution context"
        );

        Ok(ExecutionContext {
            slot_id,
            generation,
            fetcher: PageFetcher::new(client, &self.config.crawler),
            renderer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(render: &str) -> Config {
        crate::config::parse_config(&format!(
            r#"
[broker]
url = "memory://"

[store]
database-path = "fleet.db"

{}

[user-agent]
crawler-name = "FleetBot"
crawler-version = "1.0"
contact-url = "https://example.com/about"
"#,
            render
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_builds_without_renderer() {
        let factory = ConfigContextFactory::new(config(""));
        let context = factory.build(2, 0).await.unwrap();
        assert_eq!(context.slot_id, 2);
        assert!(context.renderer.is_none());
    }

    #[tokio::test]
    async fn test_builds_http_renderer() {
        let factory = ConfigContextFactory::new(config(
            "[render]\nenabled = true\nendpoint = \"http://127.0.0.1:9/render\"",
        ));
        let context = factory.build(0, 1).await.unwrap();
        assert_eq!(context.renderer.as_ref().map(|r| r.name()), Some("http"));
        assert_eq!(context.generation, 1);
    }
}
