//! Job model
//!
//! - `JobType`: closed set of job kinds, resolved from type strings or dotted task names
//! - `MaintenanceTask`: the named monitor and housekeeping tasks within a job type
//! - `JobEnvelope`: the JSON body carried by the broker
//! - `Job`: an admitted job with its queue and time limits attached
//! - `JobOutcome`/`JobReport`: what the worker records after every delivery

mod envelope;
mod outcome;

pub use envelope::{CrawlOptions, JobEnvelope, JobPayload};
pub use outcome::{JobError, JobOutcome, JobReport, JobStatus, PageError};

use crate::routing::{QueueName, QueueRoute, RouteError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kinds of job the worker knows how to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    Crawl,
    Process,
    Schedule,
    Monitor,
    /// Jobs with no specific queue; routed to the default queue
    Unclassified,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Crawl,
        JobType::Process,
        JobType::Schedule,
        JobType::Monitor,
        JobType::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Process => "process",
            Self::Schedule => "schedule",
            Self::Monitor => "monitor",
            Self::Unclassified => "unclassified",
        }
    }

    /// The queue a job of this type must travel on
    pub fn queue(&self) -> QueueName {
        match self {
            Self::Crawl => QueueName::Crawl,
            Self::Process => QueueName::Process,
            Self::Schedule => QueueName::Schedule,
            Self::Monitor => QueueName::Monitor,
            Self::Unclassified => QueueName::Default,
        }
    }

    /// Resolves a dotted task name (`crawler.tasks.crawl_url`) to a job type
    fn from_task_name(name: &str) -> Option<Self> {
        match name {
            "crawler.tasks.crawl_url" => Some(Self::Crawl),
            "crawler.tasks.process_data"
            | "crawler.tasks.generate_embeddings"
            | "crawler.tasks.update_knowledge_base"
            | "crawler.tasks.process_crawled_content" => Some(Self::Process),
            "crawler.tasks.schedule_crawl" => Some(Self::Schedule),
            "crawler.tasks.cleanup_old_crawl_data" | "crawler.tasks.health_check_websites" => {
                Some(Self::Unclassified)
            }
            _ if name.starts_with("monitor.tasks.") && name.len() > "monitor.tasks.".len() => {
                Some(Self::Monitor)
            }
            _ => None,
        }
    }
}

impl FromStr for JobType {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed {
            "crawl" => Some(Self::Crawl),
            "process" => Some(Self::Process),
            "schedule" => Some(Self::Schedule),
            "monitor" => Some(Self::Monitor),
            "unclassified" | "default" => Some(Self::Unclassified),
            other => Self::from_task_name(other),
        };
        parsed.ok_or_else(|| RouteError::UnknownJobType(trimmed.to_string()))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Monitor and housekeeping tasks, which share a job type but do different work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    /// Health record on demand
    HealthCheck,
    /// Slot table and counters of this worker
    WorkerStats,
    /// Depth of every queue
    QueueStats,
    /// Delete old failed job outcomes
    CleanupFailedJobs,
    /// Delete documents not re-crawled within the retention period
    PurgeDocuments,
    /// HEAD request against every scheduled site
    CheckSites,
}

impl MaintenanceTask {
    /// Resolves a type string; `None` for names that carry no maintenance task
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "monitor" | "monitor.tasks.health_check" => Some(Self::HealthCheck),
            "monitor.tasks.worker_stats" => Some(Self::WorkerStats),
            "monitor.tasks.queue_stats" => Some(Self::QueueStats),
            "monitor.tasks.cleanup_failed_tasks" => Some(Self::CleanupFailedJobs),
            "crawler.tasks.cleanup_old_crawl_data" => Some(Self::PurgeDocuments),
            "crawler.tasks.health_check_websites" => Some(Self::CheckSites),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health_check",
            Self::WorkerStats => "worker_stats",
            Self::QueueStats => "queue_stats",
            Self::CleanupFailedJobs => "cleanup_failed_jobs",
            Self::PurgeDocuments => "purge_documents",
            Self::CheckSites => "check_sites",
        }
    }
}

/// A job admitted for execution on this worker
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    /// Type string as delivered
    pub task_name: String,
    pub task: Option<MaintenanceTask>,
    pub queue: QueueName,
    pub payload: JobPayload,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub soft_limit: Duration,
    pub hard_limit: Duration,
}

impl Job {
    /// Builds a job from a broker envelope and the route it was admitted on
    pub fn from_envelope(
        envelope: JobEnvelope,
        job_type: JobType,
        route: &QueueRoute,
        attempt: u32,
    ) -> Self {
        let task_name = envelope.job_type.trim().to_string();
        Self {
            id: envelope.id,
            job_type,
            task: MaintenanceTask::from_name(&task_name),
            task_name,
            queue: route.queue,
            payload: envelope.payload,
            attempt,
            enqueued_at: envelope.enqueued_at,
            soft_limit: route.soft_time_limit,
            hard_limit: route.hard_time_limit,
        }
    }
}
