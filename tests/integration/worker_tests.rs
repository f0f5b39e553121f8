//! End-to-end tests of the worker loop over the in-memory broker

use crate::common::{temp_store, test_config, wait_for};
use async_trait::async_trait;
use crawlfleet::broker::{Broker, BrokerConnection, MemoryBroker};
use crawlfleet::config::{Config, CrawlerConfig};
use crawlfleet::crawler::{Document, PageFetcher};
use crawlfleet::embedding::{EmbeddingProvider, EmbeddingResult, EmbeddingStage};
use crawlfleet::job::{JobEnvelope, JobPayload, JobStatus};
use crawlfleet::storage::{SqliteStore, Store};
use crawlfleet::supervisor::{ContextFactory, ExecutionContext, SupervisorError};
use crawlfleet::{JobExecutor, JobType, QueueName, QueueRouter, Supervisor, Worker, WorkerSettings};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds plain contexts and counts how many it built
#[derive(Default)]
struct CountingFactory {
    builds: AtomicU64,
}

#[async_trait]
impl ContextFactory for CountingFactory {
    async fn build(
        &self,
        slot_id: usize,
        generation: u64,
    ) -> Result<ExecutionContext, SupervisorError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionContext {
            slot_id,
            generation,
            fetcher: PageFetcher::new(reqwest::Client::new(), &CrawlerConfig::default()),
            renderer: None,
        })
    }
}

/// Never answers; ignores cancellation
struct StuckProvider;

#[async_trait]
impl EmbeddingProvider for StuckProvider {
    async fn embed_batch(&self, _texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "stuck"
    }
}

struct Fleet {
    _dir: TempDir,
    broker: Arc<MemoryBroker>,
    store: Arc<SqliteStore>,
    supervisor: Arc<Supervisor>,
    factory: Arc<CountingFactory>,
    shutdown: CancellationToken,
    handle: JoinHandle<crawlfleet::Result<()>>,
}

impl Fleet {
    async fn start(config: Config, embedding: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        let (dir, store) = temp_store();
        let store = Arc::new(store);
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        broker.connect().await.unwrap();

        let connection = Arc::new(BrokerConnection::from_config(broker.clone(), &config.broker));
        let router = Arc::new(QueueRouter::from_config(&config).unwrap());
        let factory = Arc::new(CountingFactory::default());
        let supervisor = Arc::new(Supervisor::from_config(
            &config,
            router.clone(),
            factory.clone(),
        ));

        let mut executor = JobExecutor::new(store.clone(), connection.clone(), &config);
        if let Some(provider) = embedding {
            executor = executor.with_embedding(Arc::new(EmbeddingStage::new(
                provider,
                &config.embedding,
            )));
        }

        let worker = Arc::new(Worker::new(
            connection,
            supervisor.clone(),
            router,
            Arc::new(executor),
            store.clone(),
            WorkerSettings::from_config(&config),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        Self {
            _dir: dir,
            broker,
            store,
            supervisor,
            factory,
            shutdown,
            handle,
        }
    }

    fn publish(&self, envelope: &JobEnvelope) {
        self.broker
            .publish_raw(&envelope.queue, envelope.to_json().unwrap())
            .unwrap();
    }

    async fn wait_acked(&self, n: usize) -> bool {
        wait_for(Duration::from_secs(10), || {
            self.broker.acked_count() >= n
        })
        .await
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn schedule_job(url: &str) -> JobEnvelope {
    JobEnvelope::new(JobType::Schedule, JobPayload::crawl(url))
}

fn schedule_only_config(extra: &str) -> Config {
    test_config(&format!(
        r#"
[worker]
queues = ["schedule_queue"]
poll-interval-ms = 50
shutdown-grace-secs = 2
{}
"#,
        extra
    ))
}

#[tokio::test]
async fn test_jobs_are_acked_and_recorded() {
    let fleet = Fleet::start(schedule_only_config("concurrency = 2"), None).await;

    let jobs: Vec<_> = (0..3)
        .map(|i| schedule_job(&format!("https://example.com/site{}", i)))
        .collect();
    for job in &jobs {
        fleet.publish(job);
    }

    assert!(fleet.wait_acked(3).await);
    for job in &jobs {
        let record = fleet.store.get_job_outcome(&job.id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.job_type, "schedule");
    }
    // each schedule job published one crawl
    assert_eq!(fleet.broker.queued_job_ids(QueueName::Crawl).len(), 3);

    fleet.stop().await;
}

#[tokio::test]
async fn test_context_rebuilt_after_max_tasks() {
    let fleet = Fleet::start(
        schedule_only_config("concurrency = 1\nmax-tasks-per-child = 2"),
        None,
    )
    .await;

    for i in 0..3 {
        fleet.publish(&schedule_job(&format!("https://example.com/{}", i)));
    }

    assert!(fleet.wait_acked(3).await);
    assert!(
        wait_for(Duration::from_secs(2), || {
            fleet.supervisor.active_slots() == 0
        })
        .await
    );
    assert_eq!(fleet.supervisor.assignments(), 3);
    assert_eq!(fleet.supervisor.rebuilds(), 1);
    assert_eq!(fleet.factory.builds.load(Ordering::SeqCst), 2);

    fleet.stop().await;
}

#[tokio::test]
async fn test_rejected_deliveries_are_dead_lettered() {
    let fleet = Fleet::start(test_config(""), None).await;

    let misrouted = JobEnvelope::new(
        JobType::Process,
        JobPayload::process(vec!["https://example.com/".to_string()]),
    )
    .on_queue(QueueName::Crawl);
    let mut unknown = JobEnvelope::new(JobType::Crawl, JobPayload::crawl("https://example.com/"));
    unknown.job_type = "reports.generate".to_string();

    fleet.publish(&misrouted);
    fleet.publish(&unknown);
    fleet.broker.publish_raw("crawl_queue", "{not json").unwrap();

    assert!(
        wait_for(Duration::from_secs(10), || {
            fleet.broker.dead_letters().len() == 3
        })
        .await
    );

    for id in [&misrouted.id, &unknown.id] {
        let record = fleet.store.get_job_outcome(id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
    }
    assert_eq!(
        fleet.store.get_job_outcome(&unknown.id).unwrap().unwrap().job_type,
        "reports.generate"
    );
    assert_eq!(fleet.supervisor.assignments(), 0);

    fleet.stop().await;
}

#[tokio::test]
async fn test_reconnect_after_broker_outage() {
    let fleet = Fleet::start(schedule_only_config(""), None).await;

    let first = schedule_job("https://example.com/before");
    fleet.publish(&first);
    assert!(fleet.wait_acked(1).await);

    fleet.broker.refuse_connections(2);
    fleet.broker.drop_connection();

    // publishing succeeds again once the worker has reconnected
    let second = schedule_job("https://example.com/after");
    assert!(
        wait_for(Duration::from_secs(10), || {
            fleet
                .broker
                .publish_raw(&second.queue, second.to_json().unwrap())
                .is_ok()
        })
        .await
    );
    assert!(fleet.wait_acked(2).await);
    // one assignment per job: nothing was started twice across the outage
    assert_eq!(fleet.supervisor.assignments(), 2);
    let acked = fleet.broker.acked_job_ids();
    assert!(acked.contains(&first.id));
    assert!(acked.contains(&second.id));
    assert!(fleet.broker.dead_letters().is_empty());
    assert!(fleet.supervisor.is_connected());

    fleet.stop().await;
}

#[tokio::test]
async fn test_unavailable_root_is_requeued_until_retries_run_out() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&site)
        .await;

    let fleet = Fleet::start(
        test_config(
            r#"
[worker]
queues = ["crawl_queue"]
max-retries = 1
poll-interval-ms = 50
shutdown-grace-secs = 2
"#,
        ),
        None,
    )
    .await;

    let job = JobEnvelope::new(JobType::Crawl, JobPayload::crawl(format!("{}/", site.uri())));
    fleet.publish(&job);

    // first two deliveries are requeued, the third is over the limit
    assert!(
        wait_for(Duration::from_secs(20), || {
            fleet.broker.dead_letters().len() == 1
        })
        .await
    );
    let record = fleet.store.get_job_outcome(&job.id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(fleet.supervisor.assignments(), 2);
    assert_eq!(fleet.broker.acked_count(), 0);

    fleet.stop().await;
}

#[tokio::test]
async fn test_hard_limit_withholds_the_delivery_and_frees_the_slot() {
    let config = test_config(
        r#"
[worker]
concurrency = 1
queues = ["process_queue"]
poll-interval-ms = 50
shutdown-grace-secs = 1

[queues.process_queue]
soft-time-limit-secs = 1
hard-time-limit-secs = 2
"#,
    );
    let fleet = Fleet::start(config, Some(Arc::new(StuckProvider))).await;

    fleet
        .store
        .upsert_document(&Document {
            url: "https://example.com/slow".to_string(),
            title: None,
            description: None,
            text: "a page the provider never answers for".to_string(),
            links: vec![],
            content_hash: "slow".to_string(),
            rendered: false,
        })
        .unwrap();
    let job = JobEnvelope::new(
        JobType::Process,
        JobPayload::process(vec!["https://example.com/slow".to_string()]),
    );
    fleet.publish(&job);

    assert!(
        wait_for(Duration::from_secs(10), || {
            fleet.store.get_job_outcome(&job.id).unwrap().is_some()
        })
        .await
    );
    let record = fleet.store.get_job_outcome(&job.id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::RedeliveryPending);

    assert!(
        wait_for(Duration::from_secs(2), || {
            fleet.supervisor.active_slots() == 0
        })
        .await
    );
    // withheld: neither acked nor requeued until the visibility timeout
    assert_eq!(fleet.broker.acked_count(), 0);
    assert_eq!(fleet.broker.in_flight_count(), 1);
    assert!(fleet.broker.queued_job_ids(QueueName::Process).is_empty());

    fleet.stop().await;
}
