use crate::supervisor::SlotSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-slot detail of a worker stats report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotStats {
    pub id: usize,
    pub current_job: Option<String>,
    pub queue: Option<String>,
    pub jobs_served: u32,
    pub running_secs: Option<f64>,
    pub generation: u64,
}

impl From<&SlotSnapshot> for SlotStats {
    fn from(snapshot: &SlotSnapshot) -> Self {
        Self {
            id: snapshot.id,
            current_job: snapshot.current_job.clone(),
            queue: snapshot.queue.map(|q| q.as_str().to_string()),
            jobs_served: snapshot.jobs_served,
            running_secs: snapshot.running_for.map(|d| d.as_secs_f64()),
            generation: snapshot.generation,
        }
    }
}

/// What this worker's slots are doing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub timestamp: DateTime<Utc>,
    pub total_slots: usize,
    pub active_slots: usize,
    pub assignments: u64,
    pub rebuilds: u64,
    pub slots: Vec<SlotStats>,
}

/// Ready jobs per queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub timestamp: DateTime<Utc>,
    pub queue_depths: BTreeMap<String, u64>,
    /// Queues whose depth could not be read
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
    pub total_ready: u64,
}
