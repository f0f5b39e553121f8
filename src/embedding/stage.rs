use crate::backoff::Backoff;
use crate::config::EmbeddingConfig;
use crate::crawler::Document;
use crate::embedding::chunker::chunk_text;
use crate::embedding::provider::EmbeddingProvider;
use crate::embedding::{ChunkEmbedding, EmbeddingError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of embedding one document
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingOutcome {
    Embedded(Vec<ChunkEmbedding>),
    Failed(String),
}

impl EmbeddingOutcome {
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Embedded(_))
    }
}

/// Embedding outcome tagged with the document it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEmbedding {
    pub url: String,
    pub content_hash: String,
    pub outcome: EmbeddingOutcome,
}

/// Spaces provider requests at a fixed minimum interval
#[derive(Debug)]
struct RateLimiter {
    period: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(requests_per_second: f64) -> Self {
        let period = (requests_per_second.is_finite() && requests_per_second > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / requests_per_second));
        Self {
            period,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits until the next request may be sent
    async fn acquire(&self) {
        let Some(period) = self.period else {
            return;
        };

        let wait_until = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + period);
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

/// Chunks documents and embeds them through a provider
pub struct EmbeddingStage {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: RateLimiter,
    backoff: Backoff,
    batch_size: usize,
    max_chunk_chars: usize,
    chunk_overlap_chars: usize,
    max_retries: u32,
}

impl EmbeddingStage {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let base = Duration::from_millis(config.retry_base_ms);
        Self {
            provider,
            limiter: RateLimiter::new(config.requests_per_second),
            backoff: Backoff::new(base, base * 16, 0.2),
            batch_size: config.batch_size.max(1),
            max_chunk_chars: config.max_chunk_chars,
            chunk_overlap_chars: config.chunk_overlap_chars,
            max_retries: config.max_retries,
        }
    }

    /// Embeds every document, returning one outcome per document in input order
    pub async fn embed_documents(&self, documents: &[Document]) -> Vec<DocumentEmbedding> {
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(self.embed_document(document).await);
        }
        results
    }

    pub async fn embed_document(&self, document: &Document) -> DocumentEmbedding {
        let outcome = match self.embed_text(&document.text).await {
            Ok(chunks) => {
                debug!("Embedded {} ({} chunks)", document.url, chunks.len());
                EmbeddingOutcome::Embedded(chunks)
            }
            Err(e) => {
                warn!("Embedding failed for {}: {}", document.url, e);
                EmbeddingOutcome::Failed(e.to_string())
            }
        };

        DocumentEmbedding {
            url: document.url.clone(),
            content_hash: document.content_hash.clone(),
            outcome,
        }
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<ChunkEmbedding>, EmbeddingError> {
        let chunks = chunk_text(text, self.max_chunk_chars, self.chunk_overlap_chars);
        let mut embedded = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let vectors = self.embed_with_retry(batch).await?;
            for (text, vector) in batch.iter().zip(vectors) {
                embedded.push(ChunkEmbedding {
                    index: embedded.len(),
                    text: text.clone(),
                    vector,
                });
            }
        }

        Ok(embedded)
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            match self.provider.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    debug!(
                        "Transient embedding error (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
