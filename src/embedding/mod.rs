//! Embedding stage
//!
//! Turns stored documents into chunk vectors:
//! - Deterministic chunking with overlap
//! - Batched, rate-limited provider calls
//! - Bounded retries for transient provider errors
//!
//! Failures are per document; one bad document never aborts a batch.

mod chunker;
mod provider;
mod stage;

pub use chunker::chunk_text;
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider};
pub use stage::{DocumentEmbedding, EmbeddingOutcome, EmbeddingStage};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedding provider failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    /// Timeout, throttling or server error; the request may be retried
    #[error("Transient embedding error: {0}")]
    Transient(String),

    /// Invalid input or rejected request; retrying will not help
    #[error("Permanent embedding error: {0}")]
    Permanent(String),

    #[error("Embedding configuration error: {0}")]
    Config(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;

/// One embedded chunk of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    /// Position of the chunk within its document
    pub index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}
