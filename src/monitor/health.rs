use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Minimal liveness view of the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub connected_to_broker: bool,
    pub active_slots: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Connected, but some queue depths could not be read
    Degraded,
    /// Not connected to the broker
    Unhealthy,
}

/// Full health snapshot emitted on every monitor tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub connected: bool,
    pub active_slots: usize,
    pub total_slots: usize,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Ready jobs per queue, keyed by queue name
    pub queue_depths: BTreeMap<String, u64>,
    pub rebuilds: u64,
    pub assignments: u64,
}

impl HealthRecord {
    pub fn signal(&self) -> HealthSignal {
        HealthSignal {
            connected_to_broker: self.connected,
            active_slots: self.active_slots,
            last_heartbeat: self.last_heartbeat,
        }
    }
}

/// Writes `record` as JSON to `path`, replacing it atomically
pub fn write_health_file(path: &Path, record: &HealthRecord) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(record).map_err(std::io::Error::other)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> HealthRecord {
        HealthRecord {
            timestamp: Utc::now(),
            status: HealthStatus::Healthy,
            connected: true,
            active_slots: 1,
            total_slots: 4,
            last_heartbeat: None,
            queue_depths: BTreeMap::from([("crawl_queue".to_string(), 3)]),
            rebuilds: 0,
            assignments: 7,
        }
    }

    #[test]
    fn test_health_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("health.json");

        let record = record();
        write_health_file(&path, &record).unwrap();
        let read: HealthRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, record);
        assert!(!dir.path().join("health.tmp").exists());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["queue_depths"]["crawl_queue"], 3);
    }
}
