//! Crawl pipeline
//!
//! Drives one crawl job through the per-page state machine:
//!
//! `Pending → Fetching → {Rendering | Extracting} → Linking → Done | Failed`
//!
//! Pages are fetched with bounded parallelism. Results come back to the
//! coordinator (the `run` loop), which alone mutates the session, persists
//! documents and discovers links, so that bookkeeping is totally ordered.

use crate::config::{CrawlerConfig, RenderConfig};
use crate::crawler::fetcher::{FetchError, PageFetcher};
use crate::crawler::parser::{parse_html, ParsedPage};
use crate::crawler::renderer::PageRenderer;
use crate::crawler::session::{CrawlSession, FrontierEntry};
use crate::job::{JobError, JobPayload, JobReport};
use crate::state::{PipelineState, StateTrail};
use crate::storage::Store;
use crate::url::{matches_any, normalize_url};
use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Extracted content of one page
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text: String,
    pub links: Vec<String>,
    /// SHA-256 hex of `text`
    pub content_hash: String,
    /// Produced by the rendered fetcher rather than the plain one
    pub rendered: bool,
}

impl Document {
    fn from_parsed(url: &Url, parsed: ParsedPage, rendered: bool) -> Self {
        Self {
            url: url.to_string(),
            title: parsed.title,
            description: parsed.description,
            content_hash: content_hash(&parsed.text),
            text: parsed.text,
            links: parsed.links,
            rendered,
        }
    }
}

/// Stable hash of extracted text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Parameters of one crawl, resolved from the job payload and defaults
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRequest {
    pub root: Url,
    pub max_pages: usize,
    pub max_depth: u32,
    pub force_render: bool,
}

impl CrawlRequest {
    pub fn from_payload(payload: &JobPayload, defaults: &CrawlerConfig) -> Result<Self, JobError> {
        let url = payload
            .url
            .as_deref()
            .ok_or_else(|| JobError::InvalidPayload("crawl job has no url".to_string()))?;

        Ok(Self {
            root: normalize_url(url)?,
            max_pages: payload.options.max_pages.unwrap_or(defaults.max_pages).max(1),
            max_depth: payload.options.max_depth.unwrap_or(defaults.max_depth),
            force_render: payload.options.force_render.unwrap_or(false),
        })
    }
}

/// What a finished crawl produced
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub report: JobReport,
    /// URLs of documents persisted by this crawl
    pub stored_urls: Vec<String>,
    /// Path the root page took; the session's state follows it
    pub root_trail: StateTrail,
}

/// A page that made it through fetch and extraction
struct ExtractedPage {
    final_url: Url,
    parsed: ParsedPage,
    rendered: bool,
}

/// Result of processing one frontier entry off the coordinator
struct PageResult {
    entry: FrontierEntry,
    trail: StateTrail,
    result: Result<ExtractedPage, FetchError>,
}

/// The crawl pipeline, built per job from the slot's execution context
pub struct CrawlPipeline {
    fetcher: PageFetcher,
    renderer: Option<Arc<dyn PageRenderer>>,
    store: Arc<dyn Store>,
    render: RenderConfig,
    parallelism: usize,
    time_budget: Duration,
    same_origin: bool,
}

impl CrawlPipeline {
    pub fn new(
        fetcher: PageFetcher,
        renderer: Option<Arc<dyn PageRenderer>>,
        store: Arc<dyn Store>,
        crawler: &CrawlerConfig,
        render: &RenderConfig,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            store,
            render: render.clone(),
            parallelism: crawler.parallelism.max(1),
            time_budget: Duration::from_secs(crawler.time_budget_secs),
            same_origin: crawler.same_origin,
        }
    }

    /// Overrides the wall-clock budget of a session
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    /// Extracted text too thin to trust without rendering
    fn substantially_empty(&self, parsed: &ParsedPage) -> bool {
        parsed.text_len() < self.render.min_text_chars
            || parsed.spa_indicators >= self.render.spa_indicator_threshold.max(1)
    }

    async fn render(&self, url: &Url, cancel: &CancellationToken) -> Result<String, FetchError> {
        let Some(renderer) = &self.renderer else {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                status: None,
                reason: "rendering not available".to_string(),
            });
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
            result = renderer.render(url.as_str()) => result,
        }
    }

    /// Fetches and extracts one page, falling back to rendering when needed
    async fn process_page(
        &self,
        entry: FrontierEntry,
        force_render: bool,
        cancel: CancellationToken,
    ) -> PageResult {
        let mut trail = StateTrail::new();
        let result = self
            .fetch_and_extract(&entry.url, force_render, &cancel, &mut trail)
            .await;
        if result.is_err() {
            trail.advance(PipelineState::Failed);
        }
        PageResult {
            entry,
            trail,
            result,
        }
    }

    async fn fetch_and_extract(
        &self,
        url: &Url,
        force_render: bool,
        cancel: &CancellationToken,
        trail: &mut StateTrail,
    ) -> Result<ExtractedPage, FetchError> {
        trail.advance(PipelineState::Fetching);

        let must_render = self.renderer.is_some()
            && (force_render || matches_any(&self.render.patterns, url.as_str()));

        if must_render {
            debug!("{} requires rendering", url);
            trail.advance(PipelineState::Rendering);
            let html = self.render(url, cancel).await?;
            trail.advance(PipelineState::Extracting);
            let parsed = parse_html(&html, url);
            if parsed.text.is_empty() {
                return Err(FetchError::EmptyContent {
                    url: url.to_string(),
                });
            }
            return Ok(ExtractedPage {
                final_url: url.clone(),
                parsed,
                rendered: true,
            });
        }

        let page = self.fetcher.fetch_with_retry(url.as_str(), cancel).await?;
        let final_url = Url::parse(&page.final_url).unwrap_or_else(|_| url.clone());
        let plain = parse_html(&page.body, &final_url);

        if !self.substantially_empty(&plain) {
            trail.advance(PipelineState::Extracting);
            return Ok(ExtractedPage {
                final_url,
                parsed: plain,
                rendered: false,
            });
        }

        if self.renderer.is_none() {
            trail.advance(PipelineState::Extracting);
            if plain.text.is_empty() {
                return Err(FetchError::EmptyContent {
                    url: url.to_string(),
                });
            }
            return Ok(ExtractedPage {
                final_url,
                parsed: plain,
                rendered: false,
            });
        }

        debug!(
            "{} looks substantially empty ({} chars, {} app markers), rendering",
            url,
            plain.text_len(),
            plain.spa_indicators
        );
        trail.advance(PipelineState::Rendering);

        match self.render(&final_url, cancel).await {
            Ok(html) => {
                trail.advance(PipelineState::Extracting);
                let rendered = parse_html(&html, &final_url);
                if !rendered.text.is_empty() {
                    Ok(ExtractedPage {
                        final_url,
                        parsed: rendered,
                        rendered: true,
                    })
                } else if !plain.text.is_empty() {
                    Ok(ExtractedPage {
                        final_url,
                        parsed: plain,
                        rendered: false,
                    })
                } else {
                    Err(FetchError::EmptyContent {
                        url: url.to_string(),
                    })
                }
            }
            Err(e @ FetchError::Cancelled { .. }) => Err(e),
            Err(e) if !plain.text.is_empty() => {
                warn!("Rendering {} failed, keeping plain content: {}", url, e);
                trail.advance(PipelineState::Extracting);
                Ok(ExtractedPage {
                    final_url,
                    parsed: plain,
                    rendered: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Runs a crawl session to completion, exhaustion or cancellation
    ///
    /// # Errors
    ///
    /// `JobError::RootFailed` if the root page cannot be turned into a
    /// document; `JobError::Storage` if persisting a document fails. Failures
    /// of other pages are recorded in the report and skipped.
    pub async fn run(
        &self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome, JobError> {
        let deadline = tokio::time::Instant::now() + self.time_budget;
        let mut session =
            CrawlSession::new(request.root.clone(), request.max_depth, self.same_origin);
        if request.force_render {
            session.set_render_required();
        }

        let mut report = JobReport::default();
        let mut stored_urls = Vec::new();
        let mut root_trail = StateTrail::new();
        let mut dispatched = 0usize;
        let mut in_flight = FuturesUnordered::new();

        info!(
            "Crawling {} (max {} pages, depth {})",
            request.root, request.max_pages, request.max_depth
        );

        loop {
            while in_flight.len() < self.parallelism
                && dispatched < request.max_pages
                && !cancel.is_cancelled()
            {
                let Some(entry) = session.next() else {
                    break;
                };
                dispatched += 1;
                let force_render = session.render_required();
                in_flight.push(self.process_page(entry, force_render, cancel.clone()));
            }

            if in_flight.is_empty() {
                break;
            }

            let page = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Crawl of {} interrupted, keeping partial results", request.root);
                    report.interrupted = true;
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    info!("Time budget exhausted for {}", request.root);
                    break;
                }
                Some(page) = in_flight.next() => page,
            };

            let PageResult {
                entry,
                mut trail,
                result,
            } = page;
            let is_root = entry.depth == 0;

            let extracted = match result {
                Ok(extracted) => extracted,
                Err(FetchError::Cancelled { .. }) => {
                    report.interrupted = true;
                    if is_root {
                        root_trail = trail;
                    }
                    continue;
                }
                Err(e) if is_root => {
                    warn!("Root {} failed: {}", entry.url, e);
                    return Err(JobError::RootFailed {
                        url: entry.url.to_string(),
                        source: e,
                    });
                }
                Err(e) => {
                    debug!("Skipping {}: {}", entry.url, e);
                    report.record_error(entry.url.as_str(), e.to_string());
                    continue;
                }
            };

            report.pages_crawled += 1;

            // Redirect onto a page this session already has
            let landed =
                normalize_url(extracted.final_url.as_str()).unwrap_or_else(|_| entry.url.clone());
            if landed != entry.url && !session.mark_visited(&landed) {
                debug!("{} redirected to already visited {}", entry.url, landed);
                trail.advance(PipelineState::Done);
                if is_root {
                    root_trail = trail;
                }
                continue;
            }

            let document = Document::from_parsed(&landed, extracted.parsed, extracted.rendered);

            if !session.record_content_hash(&document.content_hash) {
                debug!("{} duplicates content already stored", entry.url);
                trail.advance(PipelineState::Done);
                if is_root {
                    root_trail = trail;
                }
                continue;
            }

            self.store.upsert_document(&document)?;
            report.documents_stored += 1;
            stored_urls.push(document.url.clone());

            trail.advance(PipelineState::Linking);
            let added = session.discover(&document.links, entry.depth);
            if let Err(violation) = session.check_invariants() {
                tracing::error!("Crawl session invariant violated: {}", violation);
            }
            debug!("{}: {} new links queued", entry.url, added);
            trail.advance(PipelineState::Done);

            if is_root {
                root_trail = trail;
            }
        }

        if cancel.is_cancelled() {
            report.interrupted = true;
        }
        report.pages_found = session.discovered_len();
        info!(
            "Crawl of {} finished: {} pages, {} documents, {} errors",
            request.root,
            report.pages_crawled,
            report.documents_stored,
            report.errors.len()
        );

        Ok(CrawlOutcome {
            report,
            stored_urls,
            root_trail,
        })
    }
}
