//! Crawler module for page retrieval and content extraction
//!
//! This module contains the crawl pipeline and its stages:
//! - Plain HTTP fetching with retry
//! - Rendered fetching for script-driven pages
//! - HTML parsing into text, metadata and links
//! - Per-job session bookkeeping (frontier, visited set, depth)

mod fetcher;
mod parser;
mod pipeline;
mod renderer;
mod session;

pub use fetcher::{build_http_client, user_agent_string, FetchError, FetchedPage, PageFetcher};
pub use parser::{parse_html, ParsedPage};
pub use pipeline::{content_hash, CrawlOutcome, CrawlPipeline, CrawlRequest, Document};
#[cfg(feature = "chromium")]
pub use renderer::ChromiumRenderer;
pub use renderer::{HttpRenderer, PageRenderer};
pub use session::{CrawlSession, FrontierEntry};
