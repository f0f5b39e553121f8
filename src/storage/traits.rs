//! Storage traits and error types
//!
//! The worker only needs idempotent upserts keyed by natural identity, so the
//! trait is small and takes `&self`; implementations serialize internally.

use crate::crawler::Document;
use crate::embedding::ChunkEmbedding;
use crate::job::{JobOutcome, JobStatus};
use crate::storage::{JobOutcomeRecord, ScheduleDefinition, StoredDocument};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent store used by the worker and the monitor
///
/// Every write is a single statement or a single transaction, so aborting
/// the calling task can never leave half a write behind.
pub trait Store: Send + Sync {
    // ===== Documents =====

    /// Inserts or replaces the document stored for `document.url`
    fn upsert_document(&self, document: &Document) -> StorageResult<()>;

    fn get_document(&self, url: &str) -> StorageResult<Option<StoredDocument>>;

    fn count_documents(&self) -> StorageResult<u64>;

    /// Replaces the chunk embeddings of one document version in one transaction
    ///
    /// Rows for other content hashes of the same URL are removed.
    fn upsert_embeddings(
        &self,
        url: &str,
        content_hash: &str,
        chunks: &[ChunkEmbedding],
    ) -> StorageResult<()>;

    fn count_embeddings(&self, url: &str) -> StorageResult<u64>;

    /// Deletes documents last stored before `cutoff`, with their embeddings
    ///
    /// Returns the number of documents removed.
    fn delete_documents_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;

    // ===== Job outcomes =====

    /// Records the latest outcome of a job, keyed by job id
    fn record_job_outcome(
        &self,
        job_id: &str,
        job_type: &str,
        attempt: u32,
        outcome: &JobOutcome,
    ) -> StorageResult<()>;

    fn get_job_outcome(&self, job_id: &str) -> StorageResult<Option<JobOutcomeRecord>>;

    fn count_outcomes_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>>;

    /// Deletes outcomes with `status` recorded before `cutoff`
    fn delete_job_outcomes_before(
        &self,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64>;

    // ===== Schedules =====

    fn get_schedules(&self) -> StorageResult<Vec<ScheduleDefinition>>;

    fn get_schedule(&self, id: &str) -> StorageResult<Option<ScheduleDefinition>>;

    fn upsert_schedule(&self, schedule: &ScheduleDefinition) -> StorageResult<()>;

    /// # Errors
    ///
    /// `StorageError::NotFound` if no schedule has this id
    fn mark_schedule_dispatched(&self, id: &str, at: DateTime<Utc>) -> StorageResult<()>;
}
