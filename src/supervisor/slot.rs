use crate::routing::QueueName;
use crate::supervisor::context::ExecutionContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One execution slot in the supervisor's table
#[derive(Debug)]
pub(crate) struct Slot {
    pub id: usize,
    pub current_job: Option<String>,
    pub queue: Option<QueueName>,
    pub jobs_served: u32,
    pub started_at: Option<Instant>,
    pub context: Option<Arc<ExecutionContext>>,
    /// Set when the context was torn down; the next acquire rebuilds it
    pub needs_rebuild: bool,
    /// Contexts built for this slot so far
    pub generation: u64,
}

impl Slot {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            current_job: None,
            queue: None,
            jobs_served: 0,
            started_at: None,
            context: None,
            needs_rebuild: false,
            generation: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.current_job.is_none()
    }

    pub fn snapshot(&self, now: Instant) -> SlotSnapshot {
        SlotSnapshot {
            id: self.id,
            current_job: self.current_job.clone(),
            queue: self.queue,
            jobs_served: self.jobs_served,
            running_for: self.started_at.map(|s| now.saturating_duration_since(s)),
            generation: self.generation,
        }
    }
}

/// Read-only view of a slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSnapshot {
    pub id: usize,
    pub current_job: Option<String>,
    pub queue: Option<QueueName>,
    pub jobs_served: u32,
    pub running_for: Option<Duration>,
    pub generation: u64,
}

/// Exclusive right to run one job on one slot
///
/// Must be handed back through `Supervisor::release`.
#[derive(Debug)]
pub struct SlotLease {
    pub(crate) slot_id: usize,
    pub(crate) job_id: String,
    pub(crate) queue: QueueName,
    pub(crate) context: Arc<ExecutionContext>,
}

impl SlotLease {
    pub fn slot_id(&self) -> usize {
        self.slot_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn context(&self) -> Arc<ExecutionContext> {
        self.context.clone()
    }
}

/// How a job left its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The job returned an outcome on its own
    Finished,
    /// The job was aborted at its hard limit or panicked
    Forced,
}

/// What `run_with_deadlines` observed
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub outcome: crate::job::JobOutcome,
    pub completion: Completion,
    /// The soft limit fired before the job returned
    pub soft_limited: bool,
}
