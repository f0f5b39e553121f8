use crate::job::JobType;
use crate::routing::QueueName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire format of a job on the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,

    /// Queue the submitter addressed
    pub queue: String,

    /// Job type or dotted task name
    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default)]
    pub payload: JobPayload,

    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Creates an envelope for a job type on its routed queue with a fresh id
    pub fn new(job_type: JobType, payload: JobPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: job_type.queue().as_str().to_string(),
            job_type: job_type.as_str().to_string(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    /// Overrides the addressed queue
    pub fn on_queue(mut self, queue: QueueName) -> Self {
        self.queue = queue.as_str().to_string();
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Job arguments; which fields are required depends on the job type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Root URL for crawl and schedule jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Caller's identifier for the site being crawled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_id: Option<String>,

    #[serde(default)]
    pub options: CrawlOptions,

    /// Document URLs for process jobs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<String>,

    /// Schedule definition that produced this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,

    /// Document retention for a purge, overriding the configured period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_to_keep: Option<u32>,

    /// Age past which failed outcomes are cleaned up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u32>,
}

impl JobPayload {
    pub fn crawl(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn process(documents: Vec<String>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }
}

/// Per-job overrides of crawler defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,

    /// Render every page, skipping the plain fetch heuristic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_render: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_envelope_targets_routed_queue() {
        let envelope = JobEnvelope::new(JobType::Crawl, JobPayload::crawl("https://example.com/"));
        assert_eq!(envelope.queue, "crawl_queue");
        assert_eq!(envelope.job_type, "crawl");
        assert!(!envelope.id.is_empty());
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let body = r#"{"id":"j-1","queue":"crawl_queue","type":"crawler.tasks.crawl_url",
                       "payload":{"url":"https://example.com/","options":{"max_pages":5}}}"#;
        let envelope = JobEnvelope::from_json(body).unwrap();
        assert_eq!(envelope.id, "j-1");
        assert_eq!(envelope.payload.url.as_deref(), Some("https://example.com/"));
        assert_eq!(envelope.payload.options.max_pages, Some(5));
        assert_eq!(envelope.payload.options.max_depth, None);
        assert!(envelope.payload.documents.is_empty());
    }

    #[test]
    fn test_on_queue_override() {
        let envelope = JobEnvelope::new(JobType::Process, JobPayload::default())
            .on_queue(QueueName::Crawl);
        assert_eq!(envelope.queue, "crawl_queue");
        assert_eq!(envelope.job_type, "process");
    }
}
