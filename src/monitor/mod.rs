//! Monitor
//!
//! Runs on a fixed interval alongside the worker loop. Each tick it:
//! - emits a [`HealthRecord`] (logged, and written to the health file if set)
//! - updates the supervisor's heartbeat
//! - enqueues `schedule` jobs for recurring crawls that are due
//!
//! The monitor only reads schedule definitions; the schedule job handler
//! marks them dispatched.

mod health;
mod stats;

pub use health::{write_health_file, HealthRecord, HealthSignal, HealthStatus};
pub use stats::{QueueStats, SlotStats, WorkerStats};

use crate::broker::{BrokerConnection, BrokerResult};
use crate::job::{JobEnvelope, JobPayload, JobType};
use crate::routing::QueueName;
use crate::storage::{ScheduleDefinition, Store};
use crate::supervisor::Supervisor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read-only access to queue depths
#[async_trait]
pub trait QueueDepths: Send + Sync {
    async fn queue_depth(&self, queue: QueueName) -> BrokerResult<u64>;
}

#[async_trait]
impl QueueDepths for BrokerConnection {
    async fn queue_depth(&self, queue: QueueName) -> BrokerResult<u64> {
        BrokerConnection::queue_depth(self, queue).await
    }
}

/// Periodic health reporting and schedule dispatch
pub struct Monitor {
    supervisor: Arc<Supervisor>,
    depths: Arc<dyn QueueDepths>,
    broker: Arc<BrokerConnection>,
    store: Arc<dyn Store>,
    queues: Vec<QueueName>,
    interval: Duration,
    health_file: Option<PathBuf>,
    /// Schedule id -> when this process last enqueued it
    ledger: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Monitor {
    pub fn new(
        supervisor: Arc<Supervisor>,
        depths: Arc<dyn QueueDepths>,
        broker: Arc<BrokerConnection>,
        store: Arc<dyn Store>,
        queues: Vec<QueueName>,
        interval: Duration,
    ) -> Self {
        Self {
            supervisor,
            depths,
            broker,
            store,
            queues,
            interval,
            health_file: None,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_health_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.health_file = Some(path.into());
        self
    }

    /// Ticks every interval until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
    }

    /// One monitor pass; returns the health record it emitted
    pub async fn tick(&self, now: DateTime<Utc>) -> HealthRecord {
        let record = self.health_record(now).await;
        info!(
            status = ?record.status,
            connected = record.connected,
            active = record.active_slots,
            total = record.total_slots,
            rebuilds = record.rebuilds,
            assignments = record.assignments,
            "Health check"
        );

        if let Some(path) = &self.health_file {
            if let Err(e) = write_health_file(path, &record) {
                warn!("Failed to write health file {}: {}", path.display(), e);
            }
        }

        self.supervisor.record_heartbeat(now);

        let dispatched = self.dispatch_due_schedules(now).await;
        if dispatched > 0 {
            info!("Dispatched {} scheduled crawls", dispatched);
        }

        record
    }

    /// Reads the depth of every monitored queue; unreadable ones are listed apart
    async fn read_depths(&self) -> (BTreeMap<String, u64>, Vec<String>) {
        let mut queue_depths = BTreeMap::new();
        let mut unavailable = Vec::new();
        for &queue in &self.queues {
            match self.depths.queue_depth(queue).await {
                Ok(depth) => {
                    queue_depths.insert(queue.as_str().to_string(), depth);
                }
                Err(e) => {
                    debug!("Queue depth unavailable for {}: {}", queue, e);
                    unavailable.push(queue.as_str().to_string());
                }
            }
        }
        (queue_depths, unavailable)
    }

    /// Builds a health record from the supervisor and the broker
    pub async fn health_record(&self, now: DateTime<Utc>) -> HealthRecord {
        let signal = self.supervisor.health_signal();
        let (queue_depths, unavailable) = self.read_depths().await;

        let status = if !signal.connected_to_broker {
            HealthStatus::Unhealthy
        } else if !unavailable.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthRecord {
            timestamp: now,
            status,
            connected: signal.connected_to_broker,
            active_slots: signal.active_slots,
            total_slots: self.supervisor.total_slots(),
            last_heartbeat: signal.last_heartbeat,
            queue_depths,
            rebuilds: self.supervisor.rebuilds(),
            assignments: self.supervisor.assignments(),
        }
    }

    pub fn worker_stats(&self, now: DateTime<Utc>) -> WorkerStats {
        let slots: Vec<SlotStats> = self.supervisor.slots().iter().map(SlotStats::from).collect();
        WorkerStats {
            timestamp: now,
            total_slots: slots.len(),
            active_slots: slots.iter().filter(|s| s.current_job.is_some()).count(),
            assignments: self.supervisor.assignments(),
            rebuilds: self.supervisor.rebuilds(),
            slots,
        }
    }

    pub async fn queue_stats(&self, now: DateTime<Utc>) -> QueueStats {
        let (queue_depths, unavailable) = self.read_depths().await;
        QueueStats {
            timestamp: now,
            total_ready: queue_depths.values().sum(),
            queue_depths,
            unavailable,
        }
    }

    /// Enqueues a `schedule` job for every enabled definition that is due
    ///
    /// A definition enqueued by this monitor is skipped until the store shows
    /// a dispatch at or after the enqueue time.
    pub async fn dispatch_due_schedules(&self, now: DateTime<Utc>) -> usize {
        let schedules = match self.store.get_schedules() {
            Ok(schedules) => schedules,
            Err(e) => {
                warn!("Failed to read schedules: {}", e);
                return 0;
            }
        };

        let mut dispatched = 0;
        for schedule in schedules.iter().filter(|s| s.is_due(now)) {
            if self.awaiting_store(schedule, now) {
                debug!("Schedule {} already enqueued, waiting for store", schedule.id);
                continue;
            }

            let envelope = JobEnvelope::new(JobType::Schedule, schedule_payload(schedule));
            match self.broker.publish(&envelope).await {
                Ok(()) => {
                    debug!(job_id = %envelope.id, "Enqueued schedule {}", schedule.id);
                    self.ledger
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(schedule.id.clone(), now);
                    dispatched += 1;
                }
                Err(e) => warn!("Failed to enqueue schedule {}: {}", schedule.id, e),
            }
        }

        self.prune_ledger(&schedules);
        dispatched
    }

    /// True if this monitor enqueued `schedule` within its last interval and
    /// the store does not show the dispatch yet
    fn awaiting_store(&self, schedule: &ScheduleDefinition, now: DateTime<Utc>) -> bool {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        match ledger.get(&schedule.id) {
            Some(&enqueued_at) => {
                enqueued_at + schedule.frequency.interval() > now
                    && schedule
                        .last_dispatched_at
                        .map_or(true, |last| last < enqueued_at)
            }
            None => false,
        }
    }

    /// Forgets ledger entries the store has caught up with
    fn prune_ledger(&self, schedules: &[ScheduleDefinition]) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.retain(|id, enqueued_at| {
            schedules
                .iter()
                .find(|s| &s.id == id)
                .is_some_and(|s| s.last_dispatched_at.map_or(true, |last| last < *enqueued_at))
        });
    }
}

fn schedule_payload(schedule: &ScheduleDefinition) -> JobPayload {
    JobPayload {
        url: Some(schedule.url.clone()),
        website_id: schedule.website_id.clone(),
        options: schedule.options.clone(),
        schedule_id: Some(schedule.id.clone()),
        ..JobPayload::default()
    }
}
