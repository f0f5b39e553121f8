//! Worker loop
//!
//! Pulls deliveries from the bound queues one at a time, and only when the
//! supervisor has a free slot (prefetch of one). Each admitted job runs on
//! its own task:
//!
//! ```text
//! receive ─► parse ─► admit ─► acquire slot ─► run with deadlines
//!                                                  │
//!                         settle ◄─ record outcome ◄─ release slot
//! ```
//!
//! Malformed and misrouted deliveries are dead-lettered. A broker disconnect
//! pauses assignment until the connection is re-established.

mod executor;

pub use executor::JobExecutor;

use crate::broker::{BrokerConnection, Delivery, Settlement};
use crate::job::{Job, JobEnvelope, JobOutcome};
use crate::routing::QueueRouter;
use crate::storage::Store;
use crate::supervisor::{Completion, Execution, SlotLease, Supervisor};
use crate::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker loop settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Redeliveries allowed before a job is recorded as failed
    pub max_retries: u32,
    /// How long one receive call waits for a message
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_grace: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.worker.max_retries,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            shutdown_grace: Duration::from_secs(config.worker.shutdown_grace_secs),
        }
    }
}

/// Decides what the broker is told about a finished job
pub fn settlement_for(execution: &Execution) -> Settlement {
    match (&execution.outcome, execution.completion) {
        (JobOutcome::RedeliveryPending { .. }, Completion::Forced) => Settlement::Withhold,
        (JobOutcome::RedeliveryPending { .. }, Completion::Finished) => Settlement::Requeue,
        _ => Settlement::Ack,
    }
}

/// Consumes jobs from the broker and runs them on the supervisor's slots
pub struct Worker {
    broker: Arc<BrokerConnection>,
    supervisor: Arc<Supervisor>,
    router: Arc<QueueRouter>,
    executor: Arc<JobExecutor>,
    store: Arc<dyn Store>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        broker: Arc<BrokerConnection>,
        supervisor: Arc<Supervisor>,
        router: Arc<QueueRouter>,
        executor: Arc<JobExecutor>,
        store: Arc<dyn Store>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            broker,
            supervisor,
            router,
            executor,
            store,
            settings,
        }
    }

    /// Runs until `shutdown` fires, then drains
    ///
    /// # Errors
    ///
    /// `WorkerError::BrokerUnavailable` if the broker cannot be reached within
    /// the configured reconnect attempts. In-flight jobs are still drained.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> crate::Result<()> {
        info!(
            queues = ?self.router.bound_queues(),
            slots = self.supervisor.total_slots(),
            "Worker starting"
        );

        let mut result = self.connect(&shutdown).await;
        let mut tasks = JoinSet::new();

        while result.is_ok() {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Job task ended abnormally: {}", e);
                    }
                    continue;
                }
                ready = self.supervisor.wait_for_capacity() => {
                    if ready.is_err() {
                        break;
                    }
                }
            }

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self
                    .broker
                    .receive(self.router.bound_queues(), self.settings.poll_interval) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let Some(job) = self.admit(&delivery).await else {
                        continue;
                    };
                    let worker = self.clone();
                    let lease = tokio::select! {
                        _ = shutdown.cancelled() => {
                            self.settle(&delivery, Settlement::Requeue).await;
                            break;
                        }
                        lease = self.supervisor.acquire_slot(&job) => lease,
                    };
                    match lease {
                        Ok(lease) => {
                            tasks.spawn(async move { worker.execute(job, delivery, lease).await });
                        }
                        Err(e) => {
                            warn!(job_id = %job.id, "No slot for job: {}", e);
                            self.settle(&delivery, Settlement::Requeue).await;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_disconnect() => {
                    warn!("Lost broker connection: {}", e);
                    result = self.reconnect(&shutdown).await;
                }
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }

        if let Err(e) = &result {
            if shutdown.is_cancelled() {
                result = Ok(());
            } else {
                error!("Worker stopping: {}", e);
            }
        }

        self.drain(tasks).await;
        result
    }

    async fn connect(&self, shutdown: &CancellationToken) -> crate::Result<()> {
        self.broker.connect_with_backoff(shutdown).await?;
        self.supervisor.set_connected(true);
        Ok(())
    }

    /// Pauses assignment, reconnects and flushes acks held during the outage
    async fn reconnect(&self, shutdown: &CancellationToken) -> crate::Result<()> {
        self.supervisor.set_connected(false);
        self.broker.connect_with_backoff(shutdown).await?;

        match self.broker.flush_pending_acks().await {
            Ok(0) => {}
            Ok(n) => info!("Flushed {} acks held during the outage", n),
            Err(e) => warn!("Failed to flush pending acks: {}", e),
        }
        self.supervisor.set_connected(true);
        Ok(())
    }

    /// Parses and routes a delivery; dead-letters it when it cannot run here
    async fn admit(&self, delivery: &Delivery) -> Option<Job> {
        let envelope = match JobEnvelope::from_json(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(queue = %delivery.queue, "Malformed job body: {}", e);
                self.settle(delivery, Settlement::DeadLetter).await;
                return None;
            }
        };

        let (job_type, route) = match self.router.admit(&delivery.queue, &envelope.job_type) {
            Ok(admitted) => admitted,
            Err(e) => {
                error!(job_id = %envelope.id, queue = %delivery.queue, "Job rejected: {}", e);
                self.record(
                    &envelope.id,
                    &envelope.job_type,
                    delivery.delivery_count,
                    &JobOutcome::failed(e.to_string()),
                );
                self.settle(delivery, Settlement::DeadLetter).await;
                return None;
            }
        };

        let max_deliveries = self.settings.max_retries + 1;
        if delivery.delivery_count > max_deliveries {
            let reason = format!(
                "delivered {} times, more than the {} allowed",
                delivery.delivery_count, max_deliveries
            );
            error!(job_id = %envelope.id, "Giving up on job: {}", reason);
            self.record(
                &envelope.id,
                envelope.job_type.trim(),
                delivery.delivery_count,
                &JobOutcome::failed(reason),
            );
            self.settle(delivery, Settlement::DeadLetter).await;
            return None;
        }

        Some(Job::from_envelope(
            envelope,
            job_type,
            route,
            delivery.delivery_count,
        ))
    }

    async fn execute(
        self: Arc<Self>,
        job: Job,
        delivery: Delivery,
        lease: SlotLease,
    ) {
        let route = self.router.policy(job.queue).clone();
        let executor = self.executor.clone();
        let task_job = job.clone();

        info!(
            job_id = %job.id,
            task = %job.task_name,
            attempt = job.attempt,
            slot = lease.slot_id(),
            "Job started"
        );
        let execution = self
            .supervisor
            .run_with_deadlines(&lease, &route, move |context, cancel| async move {
                executor.execute(task_job, context, cancel).await
            })
            .await;
        self.supervisor.release(lease, execution.completion).await;

        self.record(&job.id, &job.task_name, job.attempt, &execution.outcome);
        let settlement = settlement_for(&execution);
        info!(
            job_id = %job.id,
            status = execution.outcome.status().to_db_string(),
            settlement = ?settlement,
            "Job finished"
        );
        self.settle(&delivery, settlement).await;
    }

    fn record(&self, job_id: &str, job_type: &str, attempt: u32, outcome: &JobOutcome) {
        if let Err(e) = self
            .store
            .record_job_outcome(job_id, job_type, attempt, outcome)
        {
            error!(job_id = %job_id, "Failed to record outcome: {}", e);
        }
    }

    async fn settle(&self, delivery: &Delivery, settlement: Settlement) {
        if let Err(e) = self.broker.settle(&delivery.tag, settlement).await {
            if e.is_disconnect() {
                debug!("Settlement of {} deferred: {}", delivery.tag, e);
            } else {
                warn!("Failed to settle {}: {}", delivery.tag, e);
            }
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        self.supervisor.shutdown();
        if !self.supervisor.wait_idle(self.settings.shutdown_grace).await {
            warn!(
                "{} jobs still running after {:?}; abandoning them",
                self.supervisor.active_slots(),
                self.settings.shutdown_grace
            );
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    error!("Job task ended abnormally: {}", e);
                }
            }
        }

        self.supervisor.teardown_all().await;
        if let Err(e) = self.broker.broker().disconnect().await {
            debug!("Broker disconnect: {}", e);
        }
        info!("Worker stopped");
    }
}
