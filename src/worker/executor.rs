//! Job execution
//!
//! Dispatch over the closed set of job types is a plain `match`. Every
//! handler returns a [`JobReport`] or a [`JobError`]; the mapping from error
//! to outcome lives in [`JobExecutor::execute`].

use crate::broker::BrokerConnection;
use crate::config::{Config, CrawlerConfig, MaintenanceConfig, RenderConfig};
use crate::crawler::{CrawlPipeline, CrawlRequest, Document};
use crate::embedding::{EmbeddingOutcome, EmbeddingStage};
use crate::job::{
    Job, JobEnvelope, JobError, JobOutcome, JobPayload, JobReport, JobStatus, JobType,
    MaintenanceTask,
};
use crate::monitor::Monitor;
use crate::storage::{StorageError, Store};
use crate::supervisor::ExecutionContext;
use crate::url::normalize_url;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs admitted jobs against the store, the broker and the embedding stage
pub struct JobExecutor {
    store: Arc<dyn Store>,
    broker: Arc<BrokerConnection>,
    crawler: CrawlerConfig,
    render: RenderConfig,
    maintenance: MaintenanceConfig,
    embedding: Option<Arc<EmbeddingStage>>,
    monitor: Option<Arc<Monitor>>,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn Store>, broker: Arc<BrokerConnection>, config: &Config) -> Self {
        Self {
            store,
            broker,
            crawler: config.crawler.clone(),
            render: config.render.clone(),
            maintenance: config.maintenance.clone(),
            embedding: None,
            monitor: None,
        }
    }

    /// Enables `process` jobs and follow-up processing after crawls
    pub fn with_embedding(mut self, stage: Arc<EmbeddingStage>) -> Self {
        self.embedding = Some(stage);
        self
    }

    /// Enables health and stats reports for `monitor` jobs
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Runs `job` to an outcome
    ///
    /// Retryable failures become `RedeliveryPending`; everything else that
    /// fails is `Failed` with the error as the reason.
    pub async fn execute(
        &self,
        job: Job,
        context: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let result = match (job.job_type, job.task) {
            (JobType::Crawl, _) => self.crawl(&job, &context, &cancel).await,
            (JobType::Process, _) => self.process(&job, &cancel).await,
            (JobType::Schedule, _) => self.schedule(&job).await,
            (JobType::Monitor | JobType::Unclassified, Some(task)) => {
                self.maintenance(&job, task, &context, &cancel).await
            }
            (JobType::Monitor | JobType::Unclassified, None) => {
                Err(JobError::Unsupported(job.task_name.clone()))
            }
        };

        match result {
            Ok(report) => JobOutcome::Succeeded(report),
            Err(e) if e.is_retryable() => {
                warn!(job_id = %job.id, attempt = job.attempt, "Job will be redelivered: {}", e);
                JobOutcome::RedeliveryPending {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, "Job failed: {}", e);
                JobOutcome::failed(e.to_string())
            }
        }
    }

    async fn crawl(
        &self,
        job: &Job,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<JobReport, JobError> {
        let request = CrawlRequest::from_payload(&job.payload, &self.crawler)?;
        let pipeline = CrawlPipeline::new(
            context.fetcher.clone(),
            context.renderer.clone(),
            self.store.clone(),
            &self.crawler,
            &self.render,
        );

        let outcome = pipeline.run(&request, cancel).await?;
        let mut report = outcome.report;
        info!(
            job_id = %job.id,
            pages = report.pages_crawled,
            stored = report.documents_stored,
            errors = report.errors.len(),
            "Crawl of {} finished",
            request.root
        );

        if self.embedding.is_some() && !outcome.stored_urls.is_empty() {
            let payload = JobPayload {
                website_id: job.payload.website_id.clone(),
                ..JobPayload::process(outcome.stored_urls)
            };
            let envelope = JobEnvelope::new(JobType::Process, payload);
            match self.broker.publish(&envelope).await {
                Ok(()) => report.follow_up_job = Some(envelope.id),
                Err(e) => {
                    warn!(job_id = %job.id, "Follow-up process job not published: {}", e);
                    report.record_error(
                        request.root.as_str(),
                        format!("follow-up process job not published: {}", e),
                    );
                }
            }
        }

        Ok(report)
    }

    async fn process(&self, job: &Job, cancel: &CancellationToken) -> Result<JobReport, JobError> {
        let Some(stage) = &self.embedding else {
            return Err(JobError::Unsupported(
                "process (embedding disabled)".to_string(),
            ));
        };
        if job.payload.documents.is_empty() {
            return Err(JobError::InvalidPayload(
                "process job lists no documents".to_string(),
            ));
        }

        let mut report = JobReport::default();
        for url in &job.payload.documents {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let Some(stored) = self.store.get_document(url)? else {
                report.record_error(url.as_str(), "document not found");
                continue;
            };
            let document = Document::from(stored);

            let embedded = stage.embed_document(&document).await;
            match embedded.outcome {
                EmbeddingOutcome::Embedded(chunks) => {
                    self.store
                        .upsert_embeddings(&embedded.url, &embedded.content_hash, &chunks)?;
                    report.documents_embedded += 1;
                }
                EmbeddingOutcome::Failed(reason) => report.record_error(url.as_str(), reason),
            }
        }

        Ok(report)
    }

    /// Publishes the concrete crawl for a schedule and marks it dispatched
    async fn schedule(&self, job: &Job) -> Result<JobReport, JobError> {
        let url = job
            .payload
            .url
            .as_deref()
            .ok_or_else(|| JobError::InvalidPayload("schedule job has no url".to_string()))?;
        let root = normalize_url(url)?;

        let payload = JobPayload {
            url: Some(root.to_string()),
            documents: Vec::new(),
            ..job.payload.clone()
        };
        let envelope = JobEnvelope::new(JobType::Crawl, payload);
        self.broker.publish(&envelope).await?;

        if let Some(schedule_id) = &job.payload.schedule_id {
            match self.store.mark_schedule_dispatched(schedule_id, Utc::now()) {
                Ok(()) => {}
                Err(StorageError::NotFound(_)) => {
                    warn!("Schedule {} no longer exists", schedule_id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(JobReport {
            follow_up_job: Some(envelope.id),
            ..JobReport::default()
        })
    }

    async fn maintenance(
        &self,
        job: &Job,
        task: MaintenanceTask,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<JobReport, JobError> {
        let now = Utc::now();
        let mut report = JobReport::default();

        let detail = match task {
            MaintenanceTask::HealthCheck => {
                to_detail(&self.monitor(task)?.health_record(now).await)
            }
            MaintenanceTask::WorkerStats => to_detail(&self.monitor(task)?.worker_stats(now)),
            MaintenanceTask::QueueStats => {
                to_detail(&self.monitor(task)?.queue_stats(now).await)
            }
            MaintenanceTask::CleanupFailedJobs => {
                let hours = job
                    .payload
                    .max_age_hours
                    .unwrap_or(self.maintenance.failed_job_retention_hours);
                let cutoff = now - chrono::Duration::hours(i64::from(hours));
                let deleted = self
                    .store
                    .delete_job_outcomes_before(JobStatus::Failed, cutoff)?;
                info!(
                    job_id = %job.id,
                    deleted,
                    max_age_hours = hours,
                    "Cleaned up failed job outcomes"
                );
                serde_json::json!({
                    "deleted": deleted,
                    "max_age_hours": hours,
                    "cutoff": cutoff,
                })
            }
            MaintenanceTask::PurgeDocuments => {
                let days = job
                    .payload
                    .days_to_keep
                    .unwrap_or(self.maintenance.document_retention_days);
                let cutoff = now - chrono::Duration::days(i64::from(days));
                let deleted = self.store.delete_documents_before(cutoff)?;
                info!(job_id = %job.id, deleted, days_to_keep = days, "Purged old documents");
                serde_json::json!({
                    "deleted": deleted,
                    "days_to_keep": days,
                    "cutoff": cutoff,
                })
            }
            MaintenanceTask::CheckSites => {
                let checks = self.check_sites(context, cancel, &mut report).await?;
                to_detail(&checks)
            }
        };

        report.detail = Some(detail);
        Ok(report)
    }

    fn monitor(&self, task: MaintenanceTask) -> Result<&Monitor, JobError> {
        self.monitor
            .as_deref()
            .ok_or_else(|| JobError::Unsupported(format!("{} (no monitor)", task.as_str())))
    }

    /// Sends a HEAD request to the root of every enabled schedule
    async fn check_sites(
        &self,
        context: &ExecutionContext,
        cancel: &CancellationToken,
        report: &mut JobReport,
    ) -> Result<Vec<SiteCheck>, JobError> {
        let timeout = Duration::from_secs(self.maintenance.site_check_timeout_secs);
        let client = context.fetcher.client();
        let mut checks = Vec::new();

        for schedule in self.store.get_schedules()?.into_iter().filter(|s| s.enabled) {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let check = match client.head(schedule.url.as_str()).timeout(timeout).send().await {
                Ok(response) => {
                    let status = response.status();
                    SiteCheck {
                        schedule_id: schedule.id,
                        url: schedule.url,
                        status_code: Some(status.as_u16()),
                        healthy: status.is_success() || status.is_redirection(),
                    }
                }
                Err(e) => {
                    report.record_error(schedule.url.as_str(), e.to_string());
                    SiteCheck {
                        schedule_id: schedule.id,
                        url: schedule.url,
                        status_code: None,
                        healthy: false,
                    }
                }
            };
            if !check.healthy {
                warn!(url = %check.url, status = ?check.status_code, "Site check failed");
            }
            checks.push(check);
        }

        Ok(checks)
    }
}

/// Result of one site check
#[derive(Debug, Clone, Serialize)]
struct SiteCheck {
    schedule_id: String,
    url: String,
    status_code: Option<u16>,
    healthy: bool,
}

fn to_detail<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::broker::MemoryBroker;
    use crate::config::parse_config;
    use crate::crawler::PageFetcher;
    use crate::embedding::{EmbeddingProvider, EmbeddingResult};
    use crate::routing::{QueueName, QueueRouter};
    use crate::storage::{Frequency, ScheduleDefinition, SqliteStore};
    use crate::supervisor::{ConfigContextFactory, Supervisor};
    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONFIG: &str = r#"
[broker]
url = "memory://"

[store]
database-path = "./unused.db"

[embedding]
enabled = true
endpoint = "http://localhost:1/v1/embeddings"
batch-size = 4
max-retries = 0
requests-per-second = 1000.0

[user-agent]
crawler-name = "FleetBot"
crawler-version = "1.0"
contact-url = "https://example.com/about"
"#;

    struct LengthProvider;

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    struct Fixture {
        config: Config,
        broker: Arc<MemoryBroker>,
        connection: Arc<BrokerConnection>,
        store: Arc<SqliteStore>,
    }

    async fn fixture() -> Fixture {
        let config = parse_config(CONFIG).unwrap();
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        let connection = Arc::new(BrokerConnection::new(
            broker.clone(),
            Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 0.0),
            1,
        ));
        connection
            .connect_with_backoff(&CancellationToken::new())
            .await
            .unwrap();

        Fixture {
            config,
            broker,
            connection,
            store: Arc::new(SqliteStore::new_in_memory().unwrap()),
        }
    }

    fn context(config: &Config) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext {
            slot_id: 0,
            generation: 1,
            fetcher: PageFetcher::new(reqwest::Client::new(), &config.crawler),
            renderer: None,
        })
    }

    fn job(job_type: JobType, payload: JobPayload) -> Job {
        named_job(job_type, job_type.as_str(), payload)
    }

    fn named_job(job_type: JobType, name: &str, payload: JobPayload) -> Job {
        Job {
            id: "job-1".to_string(),
            job_type,
            task_name: name.to_string(),
            task: MaintenanceTask::from_name(name),
            queue: job_type.queue(),
            payload,
            attempt: 1,
            enqueued_at: Utc::now(),
            soft_limit: Duration::from_secs(60),
            hard_limit: Duration::from_secs(120),
        }
    }

    fn document(url: &str, text: &str) -> Document {
        Document {
            url: url.to_string(),
            title: None,
            description: None,
            text: text.to_string(),
            links: vec![],
            content_hash: format!("hash-{}", text.len()),
            rendered: false,
        }
    }

    #[tokio::test]
    async fn test_schedule_publishes_crawl_and_marks_dispatched() {
        let f = fixture().await;
        f.store
            .upsert_schedule(&ScheduleDefinition::new(
                "nightly",
                "https://example.com/",
                Frequency::Daily,
            ))
            .unwrap();
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config);

        let payload = JobPayload {
            schedule_id: Some("nightly".to_string()),
            ..JobPayload::crawl("https://Example.com/docs/../")
        };
        let outcome = executor
            .execute(
                job(JobType::Schedule, payload),
                context(&f.config),
                CancellationToken::new(),
            )
            .await;

        let JobOutcome::Succeeded(report) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        let follow_up = report.follow_up_job.unwrap();
        assert_eq!(f.broker.queued_job_ids(QueueName::Crawl), vec![follow_up]);
        assert!(f
            .store
            .get_schedule("nightly")
            .unwrap()
            .unwrap()
            .last_dispatched_at
            .is_some());
    }

    #[tokio::test]
    async fn test_schedule_without_url_fails() {
        let f = fixture().await;
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config);

        let outcome = executor
            .execute(
                job(JobType::Schedule, JobPayload::default()),
                context(&f.config),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.status(), crate::job::JobStatus::Failed);
        assert!(f.broker.queued_job_ids(QueueName::Crawl).is_empty());
    }

    #[tokio::test]
    async fn test_process_embeds_stored_documents() {
        let f = fixture().await;
        f.store
            .upsert_document(&document("https://example.com/a", "alpha text"))
            .unwrap();
        let stage = EmbeddingStage::new(Arc::new(LengthProvider), &f.config.embedding);
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config)
            .with_embedding(Arc::new(stage));

        let payload = JobPayload::process(vec![
            "https://example.com/a".to_string(),
            "https://example.com/missing".to_string(),
        ]);
        let outcome = executor
            .execute(
                job(JobType::Process, payload),
                context(&f.config),
                CancellationToken::new(),
            )
            .await;

        let JobOutcome::Succeeded(report) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(report.documents_embedded, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].url, "https://example.com/missing");
        assert_eq!(f.store.count_embeddings("https://example.com/a").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_process_stops_when_cancelled() {
        let f = fixture().await;
        let stage = EmbeddingStage::new(Arc::new(LengthProvider), &f.config.embedding);
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config)
            .with_embedding(Arc::new(stage));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = executor
            .execute(
                job(
                    JobType::Process,
                    JobPayload::process(vec!["https://example.com/a".to_string()]),
                ),
                context(&f.config),
                cancel,
            )
            .await;

        let JobOutcome::Succeeded(report) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert!(report.interrupted);
        assert_eq!(report.documents_embedded, 0);
    }

    #[tokio::test]
    async fn test_disabled_job_types_fail_without_retry() {
        let f = fixture().await;
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config);

        for (job_type, payload) in [
            (
                JobType::Process,
                JobPayload::process(vec!["https://example.com/a".to_string()]),
            ),
            (JobType::Monitor, JobPayload::default()),
            (JobType::Unclassified, JobPayload::default()),
        ] {
            let outcome = executor
                .execute(
                    job(job_type, payload),
                    context(&f.config),
                    CancellationToken::new(),
                )
                .await;
            assert!(
                matches!(outcome, JobOutcome::Failed { .. }),
                "{} should fail, got {:?}",
                job_type,
                outcome
            );
        }
    }

    #[tokio::test]
    async fn test_broker_failure_is_retried() {
        let f = fixture().await;
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config);
        f.broker.drop_connection();

        let outcome = executor
            .execute(
                job(JobType::Schedule, JobPayload::crawl("https://example.com/")),
                context(&f.config),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(outcome, JobOutcome::RedeliveryPending { .. }));
    }

    fn with_monitor(f: &Fixture, executor: JobExecutor) -> JobExecutor {
        let router = Arc::new(QueueRouter::from_config(&f.config).unwrap());
        let factory = Arc::new(ConfigContextFactory::new(f.config.clone()));
        let supervisor = Arc::new(Supervisor::from_config(&f.config, router, factory));
        supervisor.set_connected(true);
        let monitor = Monitor::new(
            supervisor,
            f.connection.clone(),
            f.connection.clone(),
            f.store.clone(),
            vec![QueueName::Crawl, QueueName::Process],
            Duration::from_secs(60),
        );
        executor.with_monitor(Arc::new(monitor))
    }

    async fn run_named(
        executor: &JobExecutor,
        f: &Fixture,
        name: &str,
        payload: JobPayload,
    ) -> JobOutcome {
        let job_type: JobType = name.parse().unwrap();
        executor
            .execute(
                named_job(job_type, name, payload),
                context(&f.config),
                CancellationToken::new(),
            )
            .await
    }

    fn detail(outcome: JobOutcome) -> serde_json::Value {
        match outcome {
            JobOutcome::Succeeded(report) => report.detail.unwrap(),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_monitor_tasks_report_different_things() {
        let f = fixture().await;
        let executor = with_monitor(
            &f,
            JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config),
        );
        f.broker
            .publish_raw("crawl_queue", r#"{"id":"a","queue":"crawl_queue","type":"crawl"}"#)
            .unwrap();

        let none = JobPayload::default;

        let health = detail(run_named(&executor, &f, "monitor.tasks.health_check", none()).await);
        assert_eq!(health["status"], "healthy");

        let workers = detail(run_named(&executor, &f, "monitor.tasks.worker_stats", none()).await);
        assert_eq!(workers["total_slots"], 4);
        assert_eq!(workers["slots"].as_array().unwrap().len(), 4);

        let queues = detail(run_named(&executor, &f, "monitor.tasks.queue_stats", none()).await);
        assert_eq!(queues["queue_depths"]["crawl_queue"], 1);
        assert_eq!(queues["total_ready"], 1);
        assert!(queues.get("slots").is_none());
    }

    #[tokio::test]
    async fn test_unknown_monitor_task_fails() {
        let f = fixture().await;
        let executor = with_monitor(
            &f,
            JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config),
        );

        let outcome = run_named(&executor, &f, "monitor.tasks.reboot", JobPayload::default()).await;
        assert_eq!(outcome.status(), JobStatus::Failed);
        assert!(outcome.reason().unwrap().contains("monitor.tasks.reboot"));
    }

    #[tokio::test]
    async fn test_cleanup_failed_jobs_keeps_recent_and_succeeded() {
        let f = fixture().await;
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config);
        f.store
            .record_job_outcome("failed-1", "crawl", 1, &JobOutcome::failed("boom"))
            .unwrap();
        f.store
            .record_job_outcome(
                "ok-1",
                "crawl",
                1,
                &JobOutcome::Succeeded(JobReport::default()),
            )
            .unwrap();

        // default retention of 24 hours keeps both
        let task = "monitor.tasks.cleanup_failed_tasks";
        let kept = detail(run_named(&executor, &f, task, JobPayload::default()).await);
        assert_eq!(kept["deleted"], 0);
        assert_eq!(kept["max_age_hours"], 24);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let payload = JobPayload {
            max_age_hours: Some(0),
            ..JobPayload::default()
        };
        let cleaned = detail(run_named(&executor, &f, task, payload).await);
        assert_eq!(cleaned["deleted"], 1);
        assert!(f.store.get_job_outcome("failed-1").unwrap().is_none());
        assert!(f.store.get_job_outcome("ok-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_documents_by_age() {
        let f = fixture().await;
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config);
        f.store
            .upsert_document(&document("https://example.com/a", "alpha text"))
            .unwrap();

        let task = "crawler.tasks.cleanup_old_crawl_data";
        let kept = detail(run_named(&executor, &f, task, JobPayload::default()).await);
        assert_eq!(kept["deleted"], 0);
        assert_eq!(kept["days_to_keep"], 30);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let payload = JobPayload {
            days_to_keep: Some(0),
            ..JobPayload::default()
        };
        let purged = detail(run_named(&executor, &f, task, payload).await);
        assert_eq!(purged["deleted"], 1);
        assert_eq!(f.store.count_documents().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_sites_reports_unhealthy_ones() {
        let site = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/up"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&site)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&site)
            .await;

        let f = fixture().await;
        for (id, route) in [("up", "/up"), ("down", "/down")] {
            f.store
                .upsert_schedule(&ScheduleDefinition::new(
                    id,
                    format!("{}{}", site.uri(), route),
                    Frequency::Daily,
                ))
                .unwrap();
        }
        let executor = JobExecutor::new(f.store.clone(), f.connection.clone(), &f.config);

        let task = "crawler.tasks.health_check_websites";
        let checks = detail(run_named(&executor, &f, task, JobPayload::default()).await);
        let checks = checks.as_array().unwrap();
        assert_eq!(checks.len(), 2);
        let down = checks.iter().find(|c| c["schedule_id"] == "down").unwrap();
        assert_eq!(down["status_code"], 503);
        assert_eq!(down["healthy"], false);
        let up = checks.iter().find(|c| c["schedule_id"] == "up").unwrap();
        assert_eq!(up["healthy"], true);
    }
}
