//! Crawlfleet: a background-job worker fleet for crawling and content processing
//!
//! This crate consumes crawl, process, schedule and monitor jobs from named broker
//! queues and executes them inside a bounded pool of execution slots with soft and
//! hard time limits, context recycling and broker reconnection.

pub mod backoff;
pub mod broker;
pub mod config;
pub mod crawler;
pub mod embedding;
pub mod job;
pub mod monitor;
pub mod routing;
pub mod state;
pub mod storage;
pub mod supervisor;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for worker operations
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Routing error: {0}")]
    Route(#[from] routing::RouteError),

    #[error("Broker error: {0}")]
    Broker(#[from] broker::BrokerError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] supervisor::SupervisorError),

    #[error("Job error: {0}")]
    Job(#[from] job::JobError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] embedding::EmbeddingError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Broker unreachable after {attempts} reconnect attempts")]
    BrokerUnavailable { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use job::{Job, JobOutcome, JobType};
pub use routing::{QueueName, QueueRouter};
pub use supervisor::Supervisor;
pub use url::normalize_url;
pub use worker::{JobExecutor, Worker, WorkerSettings};
