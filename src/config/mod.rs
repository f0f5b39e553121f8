//! Configuration module for the worker
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use crawlfleet::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("worker.toml")).unwrap();
//! println!("Worker will run {} slots", config.worker.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrokerConfig, Config, CrawlerConfig, EmbeddingConfig, MaintenanceConfig, MonitorConfig,
    QueueOverride,
    RenderBackend, RenderConfig, StoreConfig, UserAgentConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
