use crate::broker::BrokerUrl;
use crate::config::types::{
    BrokerConfig, Config, CrawlerConfig, EmbeddingConfig, MaintenanceConfig, QueueOverride,
    RenderBackend, RenderConfig, UserAgentConfig, WorkerConfig,
};
use crate::routing::QueueName;
use crate::ConfigError;
use std::collections::BTreeMap;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_worker_config(&config.worker)?;
    validate_queue_overrides(&config.queues, &config.worker)?;
    validate_broker_config(&config.broker)?;
    validate_crawler_config(&config.crawler)?;
    validate_render_config(&config.render)?;
    validate_embedding_config(&config.embedding)?;
    validate_maintenance_config(&config.maintenance)?;
    validate_user_agent_config(&config.user_agent)?;

    if config.store.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.monitor.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "monitor interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker pool configuration
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.max_tasks_per_child < 1 {
        return Err(ConfigError::Validation(
            "max_tasks_per_child must be >= 1".to_string(),
        ));
    }

    validate_limits(
        "worker",
        config.soft_time_limit_secs,
        config.hard_time_limit_secs,
    )?;

    if config.queues.is_empty() {
        return Err(ConfigError::Validation(
            "worker must consume from at least one queue".to_string(),
        ));
    }

    for name in &config.queues {
        parse_queue_name(name)?;
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "poll_interval_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates per-queue overrides against the worker defaults they replace
fn validate_queue_overrides(
    overrides: &BTreeMap<String, QueueOverride>,
    worker: &WorkerConfig,
) -> Result<(), ConfigError> {
    for (name, policy) in overrides {
        parse_queue_name(name)?;

        if policy.max_concurrency == Some(0) {
            return Err(ConfigError::Validation(format!(
                "max_concurrency for queue '{}' must be >= 1",
                name
            )));
        }

        let soft = policy
            .soft_time_limit_secs
            .unwrap_or(worker.soft_time_limit_secs);
        let hard = policy
            .hard_time_limit_secs
            .unwrap_or(worker.hard_time_limit_secs);
        validate_limits(name, soft, hard)?;
    }
    Ok(())
}

fn validate_limits(scope: &str, soft: u64, hard: u64) -> Result<(), ConfigError> {
    if soft == 0 {
        return Err(ConfigError::Validation(format!(
            "soft time limit for {} must be >= 1s",
            scope
        )));
    }

    if hard <= soft {
        return Err(ConfigError::Validation(format!(
            "hard time limit for {} ({}s) must exceed the soft limit ({}s)",
            scope, hard, soft
        )));
    }

    Ok(())
}

fn parse_queue_name(name: &str) -> Result<QueueName, ConfigError> {
    name.parse::<QueueName>()
        .map_err(|_| ConfigError::Validation(format!("Unknown queue name '{}'", name)))
}

/// Validates broker connection configuration
fn validate_broker_config(config: &BrokerConfig) -> Result<(), ConfigError> {
    BrokerUrl::parse(&config.url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid broker url: {}", e)))?;

    if config.visibility_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "visibility_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.reconnect_base_ms == 0 || config.reconnect_cap_ms < config.reconnect_base_ms {
        return Err(ConfigError::Validation(format!(
            "reconnect backoff must satisfy 0 < base ({}ms) <= cap ({}ms)",
            config.reconnect_base_ms, config.reconnect_cap_ms
        )));
    }

    if !(0.0..1.0).contains(&config.reconnect_jitter) {
        return Err(ConfigError::Validation(format!(
            "reconnect_jitter must be in [0, 1), got {}",
            config.reconnect_jitter
        )));
    }

    if config.max_reconnect_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_reconnect_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.parallelism < 1 || config.parallelism > 32 {
        return Err(ConfigError::Validation(format!(
            "parallelism must be between 1 and 32, got {}",
            config.parallelism
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.time_budget_secs == 0 || config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "crawler time budget and request timeout must be >= 1s".to_string(),
        ));
    }

    Ok(())
}

fn validate_maintenance_config(config: &MaintenanceConfig) -> Result<(), ConfigError> {
    if config.document_retention_days == 0 || config.failed_job_retention_hours == 0 {
        return Err(ConfigError::Validation(
            "retention periods must be >= 1".to_string(),
        ));
    }
    if config.site_check_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "site_check_timeout_secs must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates rendered-fetch configuration
fn validate_render_config(config: &RenderConfig) -> Result<(), ConfigError> {
    for pattern in &config.patterns {
        if pattern.trim().is_empty() {
            return Err(ConfigError::InvalidPattern(
                "render pattern cannot be empty".to_string(),
            ));
        }
    }

    if !config.enabled {
        return Ok(());
    }

    match config.backend {
        RenderBackend::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ConfigError::Validation(
                    "render endpoint is required for the http backend".to_string(),
                )
            })?;
            Url::parse(endpoint)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid render endpoint: {}", e)))?;
        }
        RenderBackend::Chromium => {
            if !cfg!(feature = "chromium") {
                return Err(ConfigError::Validation(
                    "chromium render backend requires the `chromium` feature".to_string(),
                ));
            }
        }
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "render timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates embedding stage configuration
fn validate_embedding_config(config: &EmbeddingConfig) -> Result<(), ConfigError> {
    if config.max_chunk_chars < 1 {
        return Err(ConfigError::Validation(
            "max_chunk_chars must be >= 1".to_string(),
        ));
    }

    if config.chunk_overlap_chars >= config.max_chunk_chars {
        return Err(ConfigError::Validation(format!(
            "chunk_overlap_chars ({}) must be smaller than max_chunk_chars ({})",
            config.chunk_overlap_chars, config.max_chunk_chars
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "embedding batch_size must be >= 1".to_string(),
        ));
    }

    if config.requests_per_second <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be positive, got {}",
            config.requests_per_second
        )));
    }

    if config.enabled {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            ConfigError::Validation("embedding endpoint is required when enabled".to_string())
        })?;
        Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid embedding endpoint: {}", e)))?;
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    Ok(())
}
