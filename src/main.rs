//! Crawlfleet main entry point
//!
//! Command-line interface for running a worker and for the operator tasks
//! around it: validating config, enqueueing jobs, defining schedules and
//! reading store statistics.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crawlfleet::broker::{open_broker, Broker, BrokerConnection};
use crawlfleet::config::{load_config_with_hash, Config};
use crawlfleet::embedding::{EmbeddingStage, HttpEmbeddingProvider};
use crawlfleet::job::{CrawlOptions, JobEnvelope, JobPayload, JobStatus};
use crawlfleet::monitor::{Monitor, QueueDepths};
use crawlfleet::storage::{open_store, Frequency, ScheduleDefinition, Store};
use crawlfleet::supervisor::ConfigContextFactory;
use crawlfleet::{normalize_url, JobExecutor, QueueName, QueueRouter, Supervisor, Worker, WorkerSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Crawlfleet: a background-job worker for crawling and content processing
///
/// Consumes crawl, process, schedule and monitor jobs from named broker
/// queues and runs them in a bounded pool of slots with per-queue time
/// limits.
#[derive(Parser, Debug)]
#[command(name = "crawlfleet")]
#[command(version)]
#[command(about = "A background-job worker for crawling and content processing", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the worker and its monitor; Ctrl-C drains gracefully
    Run,

    /// Validate the config and print the resolved queue routes
    Check,

    /// Publish a job envelope
    Enqueue {
        /// Job type or dotted task name
        #[arg(long = "type", value_name = "TYPE")]
        job_type: String,

        /// Root URL for crawl and schedule jobs
        #[arg(long)]
        url: Option<String>,

        /// Publish on this queue instead of the routed one
        #[arg(long)]
        queue: Option<String>,

        #[arg(long)]
        max_pages: Option<usize>,

        #[arg(long)]
        max_depth: Option<u32>,

        /// Stored document URLs for process jobs
        #[arg(long = "document", value_name = "URL")]
        documents: Vec<String>,
    },

    /// Create or update a recurring crawl
    Schedule {
        #[arg(long)]
        id: String,

        #[arg(long)]
        url: String,

        /// hourly, daily, weekly or monthly
        #[arg(long)]
        frequency: Frequency,

        #[arg(long)]
        website_id: Option<String>,
    },

    /// Show document and job-outcome counts from the store
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Run => handle_run(config).await,
        Command::Check => handle_check(&config),
        Command::Enqueue {
            job_type,
            url,
            queue,
            max_pages,
            max_depth,
            documents,
        } => {
            let options = CrawlOptions {
                max_pages,
                max_depth,
                force_render: None,
            };
            handle_enqueue(&config, &job_type, url, queue, options, documents).await
        }
        Command::Schedule {
            id,
            url,
            frequency,
            website_id,
        } => handle_schedule(&config, id, &url, frequency, website_id),
        Command::Stats => handle_stats(&config),
    }
}

/// Sets up the tracing subscriber; `RUST_LOG` overrides the verbosity flags
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("crawlfleet=info,warn"),
                1 => EnvFilter::new("crawlfleet=debug,info"),
                2 => EnvFilter::new("crawlfleet=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Wires the store, broker, supervisor, monitor and worker together and runs until Ctrl-C
async fn handle_run(config: Config) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(
        open_store(Path::new(&config.store.database_path))
            .with_context(|| format!("opening store {}", config.store.database_path))?,
    );
    let broker = open_broker(&config.broker)?;
    let connection = Arc::new(BrokerConnection::from_config(broker, &config.broker));

    let router = Arc::new(QueueRouter::from_config(&config)?);
    let factory = Arc::new(ConfigContextFactory::new(config.clone()));
    let supervisor = Arc::new(Supervisor::from_config(&config, router.clone(), factory));

    let mut monitor = Monitor::new(
        supervisor.clone(),
        connection.clone() as Arc<dyn QueueDepths>,
        connection.clone(),
        store.clone(),
        QueueName::ALL.to_vec(),
        Duration::from_secs(config.monitor.interval_secs),
    );
    if let Some(path) = &config.monitor.health_file {
        monitor = monitor.with_health_file(path);
    }
    let monitor = Arc::new(monitor);

    let mut executor = JobExecutor::new(store.clone(), connection.clone(), &config)
        .with_monitor(monitor.clone());
    if config.embedding.enabled {
        let provider = HttpEmbeddingProvider::from_config(&config.embedding)?;
        tracing::info!(
            "Embedding enabled: model {} in batches of {}",
            config.embedding.model,
            config.embedding.batch_size
        );
        executor = executor.with_embedding(Arc::new(EmbeddingStage::new(
            Arc::new(provider),
            &config.embedding,
        )));
    }

    let worker = Arc::new(Worker::new(
        connection,
        supervisor,
        router,
        Arc::new(executor),
        store,
        WorkerSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, draining");
            ctrl_c.cancel();
        }
    });

    let monitor_shutdown = shutdown.child_token();
    let monitor_task = tokio::spawn({
        let monitor = monitor.clone();
        let token = monitor_shutdown.clone();
        async move { monitor.run(token).await }
    });

    let result = worker.run(shutdown).await;

    monitor_shutdown.cancel();
    if let Err(e) = monitor_task.await {
        tracing::warn!("Monitor task ended abnormally: {}", e);
    }

    match result {
        Ok(()) => {
            tracing::info!("Worker shut down cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Worker failed: {}", e);
            Err(e.into())
        }
    }
}

/// Validates config and shows the routes a worker would run with
fn handle_check(config: &Config) -> anyhow::Result<()> {
    let router = QueueRouter::from_config(config)?;

    println!("=== Crawlfleet Configuration ===\n");

    println!("Worker:");
    println!("  Slots: {}", config.worker.concurrency);
    println!("  Max tasks per context: {}", config.worker.max_tasks_per_child);
    println!("  Max retries: {}", config.worker.max_retries);

    println!("\nQueues:");
    for route in router.routes() {
        let bound = if router.bound_queues().contains(&route.queue) {
            "consumed"
        } else {
            "not consumed"
        };
        println!(
            "  - {:<16} cap {:<3} soft {:>5}s  hard {:>5}s  ({})",
            route.queue.as_str(),
            route.max_concurrency,
            route.soft_time_limit.as_secs(),
            route.hard_time_limit.as_secs(),
            bound
        );
    }

    println!("\nBroker: {}", config.broker.url);
    println!("Store: {}", config.store.database_path);
    println!(
        "Rendering: {}",
        if config.render.enabled {
            format!("{:?}", config.render.backend)
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "Embedding: {}",
        match (&config.embedding.enabled, &config.embedding.endpoint) {
            (true, Some(endpoint)) => format!("{} via {}", config.embedding.model, endpoint),
            _ => "disabled".to_string(),
        }
    );

    println!("\n✓ Configuration is valid");
    Ok(())
}

async fn handle_enqueue(
    config: &Config,
    job_type: &str,
    url: Option<String>,
    queue: Option<String>,
    options: CrawlOptions,
    documents: Vec<String>,
) -> anyhow::Result<()> {
    let router = QueueRouter::from_config(config)?;
    let (job_type, _) = router.route(job_type)?;

    let url = match url {
        Some(url) => Some(normalize_url(&url)?.to_string()),
        None => None,
    };
    let payload = JobPayload {
        url,
        options,
        documents,
        ..JobPayload::default()
    };
    let mut envelope = JobEnvelope::new(job_type, payload);
    if let Some(queue) = queue {
        let queue: QueueName = queue.parse()?;
        if queue != job_type.queue() {
            tracing::warn!(
                "{} jobs are routed to {}; a worker will dead-letter this one",
                job_type,
                job_type.queue()
            );
        }
        envelope = envelope.on_queue(queue);
    }

    let broker = open_broker(&config.broker)?;
    if let Err(e) = broker.connect().await {
        bail!("Broker {} unreachable: {}", config.broker.url, e);
    }
    broker.publish(&envelope).await?;
    if let Err(e) = broker.disconnect().await {
        tracing::debug!("Broker disconnect: {}", e);
    }

    println!("{} {} on {}", envelope.job_type, envelope.id, envelope.queue);
    Ok(())
}

fn handle_schedule(
    config: &Config,
    id: String,
    url: &str,
    frequency: Frequency,
    website_id: Option<String>,
) -> anyhow::Result<()> {
    let root = normalize_url(url)?;
    let store = open_store(Path::new(&config.store.database_path))?;

    let existing = store.get_schedule(&id)?;
    let schedule = ScheduleDefinition {
        url: root.to_string(),
        website_id,
        frequency,
        last_dispatched_at: existing.and_then(|s| s.last_dispatched_at),
        ..ScheduleDefinition::new(id, root.as_str(), frequency)
    };
    store.upsert_schedule(&schedule)?;

    println!(
        "✓ Schedule {} crawls {} {}",
        schedule.id, schedule.url, schedule.frequency
    );
    Ok(())
}

/// Shows statistics from the store
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.store.database_path);

    let store = open_store(Path::new(&config.store.database_path))?;

    println!("Documents: {}", store.count_documents()?);

    let counts = store.count_outcomes_by_status()?;
    println!("\nJob outcomes:");
    for status in [
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::RedeliveryPending,
    ] {
        println!(
            "  {:<20} {}",
            status.to_db_string(),
            counts.get(&status).copied().unwrap_or(0)
        );
    }

    let schedules = store.get_schedules()?;
    println!("\nSchedules ({}):", schedules.len());
    for schedule in &schedules {
        let last = schedule
            .last_dispatched_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  - {} {} {} (last dispatched {})",
            schedule.id, schedule.url, schedule.frequency, last
        );
    }

    Ok(())
}
