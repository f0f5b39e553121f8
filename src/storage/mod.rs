//! Storage module for persisting worker results
//!
//! This module handles all database operations for the fleet, including:
//! - Extracted documents and their chunk embeddings
//! - Job outcomes, one row per job id
//! - Recurring crawl schedules read by the monitor

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{StorageError, StorageResult, Store};

use crate::crawler::Document;
use crate::job::{CrawlOptions, JobReport, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Opens (or creates) the SQLite store at `path`
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}

/// A document as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text: String,
    pub links: Vec<String>,
    pub content_hash: String,
    pub rendered: bool,
    pub updated_at: String,
}

impl From<StoredDocument> for Document {
    fn from(stored: StoredDocument) -> Self {
        Self {
            url: stored.url,
            title: stored.title,
            description: stored.description,
            text: stored.text,
            links: stored.links,
            content_hash: stored.content_hash,
            rendered: stored.rendered,
        }
    }
}

/// The recorded outcome of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcomeRecord {
    pub job_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub reason: Option<String>,
    pub report: Option<JobReport>,
    pub attempts: u32,
    pub recorded_at: String,
}

/// How often a scheduled crawl recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn interval(&self) -> chrono::Duration {
        match self {
            Self::Hourly => chrono::Duration::hours(1),
            Self::Daily => chrono::Duration::days(1),
            Self::Weekly => chrono::Duration::weeks(1),
            Self::Monthly => chrono::Duration::days(30),
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_string(&s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown frequency '{}'", s))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A recurring crawl
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDefinition {
    pub id: String,
    pub url: String,
    pub website_id: Option<String>,
    pub frequency: Frequency,
    pub options: CrawlOptions,
    pub enabled: bool,
    pub last_dispatched_at: Option<DateTime<Utc>>,
}

impl ScheduleDefinition {
    pub fn new(id: impl Into<String>, url: impl Into<String>, frequency: Frequency) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            website_id: None,
            frequency,
            options: CrawlOptions::default(),
            enabled: true,
            last_dispatched_at: None,
        }
    }

    /// A never-dispatched definition is due immediately
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_dispatched_at {
            None => true,
            Some(last) => last + self.frequency.interval() <= now,
        }
    }
}
