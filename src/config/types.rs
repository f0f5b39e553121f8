use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for a worker process
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Per-queue overrides keyed by queue name
    #[serde(default)]
    pub queues: BTreeMap<String, QueueOverride>,

    pub broker: BrokerConfig,

    pub store: StoreConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of execution slots
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Jobs served by a slot before its execution context is rebuilt
    #[serde(rename = "max-tasks-per-child", default = "default_max_tasks_per_child")]
    pub max_tasks_per_child: u32,

    #[serde(rename = "soft-time-limit-secs", default = "default_soft_limit")]
    pub soft_time_limit_secs: u64,

    #[serde(rename = "hard-time-limit-secs", default = "default_hard_limit")]
    pub hard_time_limit_secs: u64,

    /// Redeliveries allowed before a job is recorded as failed
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Queues this worker consumes from
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,

    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(rename = "shutdown-grace-secs", default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_tasks_per_child: default_max_tasks_per_child(),
            soft_time_limit_secs: default_soft_limit(),
            hard_time_limit_secs: default_hard_limit(),
            max_retries: default_max_retries(),
            queues: default_queues(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Per-queue policy override
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueOverride {
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: Option<usize>,

    #[serde(rename = "soft-time-limit-secs")]
    pub soft_time_limit_secs: Option<u64>,

    #[serde(rename = "hard-time-limit-secs")]
    pub hard_time_limit_secs: Option<u64>,
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// `sqlite://<path>` or `memory://`
    pub url: String,

    /// How long a received job stays invisible before it is redelivered
    #[serde(rename = "visibility-timeout-secs", default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    #[serde(rename = "reconnect-base-ms", default = "default_reconnect_base")]
    pub reconnect_base_ms: u64,

    #[serde(rename = "reconnect-cap-ms", default = "default_reconnect_cap")]
    pub reconnect_cap_ms: u64,

    /// Fractional jitter applied to each reconnect delay
    #[serde(rename = "reconnect-jitter", default = "default_reconnect_jitter")]
    pub reconnect_jitter: f64,

    #[serde(rename = "max-reconnect-attempts", default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

/// Persistent store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Crawl pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Default page budget when the job payload omits one
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: usize,

    /// Default depth limit when the job payload omits one
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Pages fetched concurrently within one session
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Wall-clock budget for one session
    #[serde(rename = "time-budget-secs", default = "default_time_budget")]
    pub time_budget_secs: u64,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries for transient fetch errors on a single URL
    #[serde(rename = "max-retries", default = "default_fetch_retries")]
    pub max_retries: u32,

    #[serde(rename = "retry-base-ms", default = "default_retry_base")]
    pub retry_base_ms: u64,

    #[serde(rename = "same-origin", default = "default_true")]
    pub same_origin: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            parallelism: default_parallelism(),
            time_budget_secs: default_time_budget(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_fetch_retries(),
            retry_base_ms: default_retry_base(),
            same_origin: true,
        }
    }
}

/// Which rendering backend produces script-executed HTML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderBackend {
    /// POST to an HTTP render service
    Http,
    /// Local headless Chromium (requires the `chromium` feature)
    Chromium,
}

/// Rendered-fetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_render_backend")]
    pub backend: RenderBackend,

    /// Render service endpoint for the `http` backend
    pub endpoint: Option<String>,

    #[serde(rename = "timeout-secs", default = "default_render_timeout")]
    pub timeout_secs: u64,

    /// Extracted text shorter than this counts as substantially empty
    #[serde(rename = "min-text-chars", default = "default_min_text_chars")]
    pub min_text_chars: usize,

    /// Number of single-page-app markers that force rendering
    #[serde(rename = "spa-indicator-threshold", default = "default_spa_threshold")]
    pub spa_indicator_threshold: usize,

    /// Wildcard URL patterns that always require rendering
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: default_render_backend(),
            endpoint: None,
            timeout_secs: default_render_timeout(),
            min_text_chars: default_min_text_chars(),
            spa_indicator_threshold: default_spa_threshold(),
            patterns: Vec::new(),
        }
    }
}

/// Embedding stage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// OpenAI-compatible embeddings endpoint
    pub endpoint: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(rename = "api-key-env", default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(rename = "max-chunk-chars", default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    #[serde(rename = "chunk-overlap-chars", default = "default_chunk_overlap")]
    pub chunk_overlap_chars: usize,

    #[serde(rename = "requests-per-second", default = "default_requests_per_second")]
    pub requests_per_second: f64,

    #[serde(rename = "max-retries", default = "default_embedding_retries")]
    pub max_retries: u32,

    #[serde(rename = "retry-base-ms", default = "default_retry_base")]
    pub retry_base_ms: u64,

    #[serde(rename = "timeout-secs", default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_chunk_chars: default_max_chunk_chars(),
            chunk_overlap_chars: default_chunk_overlap(),
            requests_per_second: default_requests_per_second(),
            max_retries: default_embedding_retries(),
            retry_base_ms: default_retry_base(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(rename = "interval-secs", default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Where to write the latest health record as JSON
    #[serde(rename = "health-file")]
    pub health_file: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            health_file: None,
        }
    }
}

/// Defaults for maintenance jobs; a job payload may override the ages
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Documents not re-crawled for this long are purged
    #[serde(rename = "document-retention-days", default = "default_document_retention")]
    pub document_retention_days: u32,

    /// Failed job outcomes older than this are deleted
    #[serde(rename = "failed-job-retention-hours", default = "default_failed_job_retention")]
    pub failed_job_retention_hours: u32,

    #[serde(rename = "site-check-timeout-secs", default = "default_site_check_timeout")]
    pub site_check_timeout_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            document_retention_days: default_document_retention(),
            failed_job_retention_hours: default_failed_job_retention(),
            site_check_timeout_secs: default_site_check_timeout(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_tasks_per_child() -> u32 {
    100
}

fn default_soft_limit() -> u64 {
    300
}

fn default_hard_limit() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_queues() -> Vec<String> {
    ["celery", "crawl_queue", "process_queue", "schedule_queue", "monitor_queue"]
        .iter()
        .map(|q| q.to_string())
        .collect()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_visibility_timeout() -> u64 {
    900
}

fn default_reconnect_base() -> u64 {
    1_000
}

fn default_reconnect_cap() -> u64 {
    60_000
}

fn default_reconnect_jitter() -> f64 {
    0.2
}

fn default_max_reconnect_attempts() -> u32 {
    20
}

fn default_max_pages() -> usize {
    100
}

fn default_max_depth() -> u32 {
    3
}

fn default_parallelism() -> usize {
    3
}

fn default_time_budget() -> u64 {
    240
}

fn default_request_timeout() -> u64 {
    30
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_retry_base() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_render_backend() -> RenderBackend {
    RenderBackend::Http
}

fn default_render_timeout() -> u64 {
    30
}

fn default_min_text_chars() -> usize {
    100
}

fn default_spa_threshold() -> usize {
    2
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_max_chunk_chars() -> usize {
    2_000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_embedding_retries() -> u32 {
    3
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_document_retention() -> u32 {
    30
}

fn default_failed_job_retention() -> u32 {
    24
}

fn default_site_check_timeout() -> u64 {
    10
}
