use crate::broker::BrokerError;
use crate::crawler::FetchError;
use crate::storage::StorageError;
use crate::UrlError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job-level failures
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Root URL {url} failed: {source}")]
    RootFailed { url: String, source: FetchError },

    #[error("Job {job_id} exceeded its hard time limit of {limit_secs}s")]
    DeadlineExceeded { job_id: String, limit_secs: u64 },

    #[error("No executor for {0} jobs")]
    Unsupported(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),
}

impl JobError {
    /// True if running the same job again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RootFailed { source, .. } => source.is_transient(),
            Self::DeadlineExceeded { .. } => true,
            Self::Storage(_) | Self::Broker(_) => true,
            Self::InvalidPayload(_) | Self::Unsupported(_) | Self::Url(_) => false,
        }
    }
}

/// Stored status of a job delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Succeeded,
    Failed,
    RedeliveryPending,
}

impl JobStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RedeliveryPending => "redelivery_pending",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "redelivery_pending" => Some(Self::RedeliveryPending),
            _ => None,
        }
    }
}

/// A URL that could not be turned into a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageError {
    pub url: String,
    pub reason: String,
}

/// Summary of what a job did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(default)]
    pub pages_crawled: usize,

    /// URLs discovered (queued or visited) during the session
    #[serde(default)]
    pub pages_found: usize,

    #[serde(default)]
    pub documents_stored: usize,

    #[serde(default)]
    pub documents_embedded: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PageError>,

    /// Stopped early by a soft time limit
    #[serde(default)]
    pub interrupted: bool,

    /// Job published as a consequence of this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_job: Option<String>,

    /// Job-specific detail such as a health record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl JobReport {
    pub fn record_error(&mut self, url: impl Into<String>, reason: impl Into<String>) {
        self.errors.push(PageError {
            url: url.into(),
            reason: reason.into(),
        });
    }
}

/// The result of one delivery of a job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(JobReport),
    Failed {
        reason: String,
        report: Option<JobReport>,
    },
    /// Not acknowledged; the broker will deliver the job again
    RedeliveryPending { reason: String },
}

impl JobOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            report: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded(_) => JobStatus::Succeeded,
            Self::Failed { .. } => JobStatus::Failed,
            Self::RedeliveryPending { .. } => JobStatus::RedeliveryPending,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed { reason, .. } | Self::RedeliveryPending { reason } => Some(reason),
        }
    }

    pub fn report(&self) -> Option<&JobReport> {
        match self {
            Self::Succeeded(report) => Some(report),
            Self::Failed { report, .. } => report.as_ref(),
            Self::RedeliveryPending { .. } => None,
        }
    }

    /// Whether the delivery should be acknowledged to the broker
    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::RedeliveryPending { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_strings() {
        for status in [
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::RedeliveryPending,
        ] {
            assert_eq!(JobStatus::from_db_string(status.to_db_string()), Some(status));
        }
        assert_eq!(JobStatus::from_db_string("running"), None);
    }

    #[test]
    fn test_redelivery_is_not_acked() {
        let outcome = JobOutcome::RedeliveryPending {
            reason: "deadline".to_string(),
        };
        assert!(!outcome.should_ack());
        assert!(JobOutcome::failed("bad payload").should_ack());
        assert!(JobOutcome::Succeeded(JobReport::default()).should_ack());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!JobError::InvalidPayload("x".into()).is_retryable());
        assert!(JobError::DeadlineExceeded {
            job_id: "j".into(),
            limit_secs: 1
        }
        .is_retryable());
        assert!(JobError::RootFailed {
            url: "https://example.test/".into(),
            source: FetchError::Transient {
                url: "https://example.test/".into(),
                reason: "timeout".into()
            }
        }
        .is_retryable());
        assert!(!JobError::RootFailed {
            url: "https://example.test/".into(),
            source: FetchError::Permanent {
                url: "https://example.test/".into(),
                status: Some(404),
                reason: "not found".into()
            }
        }
        .is_retryable());
    }

    #[test]
    fn test_report_serializes_compactly() {
        let mut report = JobReport {
            pages_crawled: 2,
            ..JobReport::default()
        };
        report.record_error("https://example.test/x", "HTTP 404");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pages_crawled"], 2);
        assert_eq!(json["errors"][0]["reason"], "HTTP 404");
        assert!(json.get("follow_up_job").is_none());
    }
}
