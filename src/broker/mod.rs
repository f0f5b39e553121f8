//! Broker contract and implementations
//!
//! The worker only relies on at-least-once delivery, queue-level routing and
//! visibility/ack semantics:
//!
//! - a received delivery stays invisible to other consumers until it is acked,
//!   rejected, its visibility timeout lapses, or the connection drops
//! - `ack` removes it permanently; `reject(requeue = true)` makes it visible again;
//!   `reject(requeue = false)` moves it to dead-letter
//!
//! Two implementations ship with the crate: [`MemoryBroker`] for single-process
//! use and tests, and [`SqliteBroker`] for a durable queue shared through a file.

mod connection;
mod memory;
mod sqlite;

pub use connection::{BrokerConnection, Settlement};
pub use memory::{DeadLetter, MemoryBroker};
pub use sqlite::SqliteBroker;

use crate::config::BrokerConfig;
use crate::job::JobEnvelope;
use crate::routing::QueueName;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur talking to the broker
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker disconnected: {0}")]
    Disconnected(String),

    #[error("Delivery {0} is no longer held by this consumer")]
    StaleDelivery(String),

    #[error("Invalid broker url: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl BrokerError {
    /// True if the connection itself is gone and must be re-established
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Opaque handle identifying one delivery of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub String);

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to this consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    /// Queue the message was taken from
    pub queue: String,
    /// Raw JSON body; parsed by the worker so malformed bodies can be dead-lettered
    pub body: String,
    /// 1 on first delivery
    pub delivery_count: u32,
}

/// The worker's view of a message broker
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> BrokerResult<()>;

    async fn disconnect(&self) -> BrokerResult<()>;

    fn is_connected(&self) -> bool;

    /// Publishes an envelope on the queue it addresses
    async fn publish(&self, envelope: &JobEnvelope) -> BrokerResult<()>;

    /// Waits up to `wait` for a message on any of `queues`
    async fn receive(&self, queues: &[QueueName], wait: Duration)
        -> BrokerResult<Option<Delivery>>;

    async fn ack(&self, tag: &DeliveryTag) -> BrokerResult<()>;

    async fn reject(&self, tag: &DeliveryTag, requeue: bool) -> BrokerResult<()>;

    /// Messages waiting on a queue (not counting ones held by consumers)
    async fn queue_depth(&self, queue: QueueName) -> BrokerResult<u64>;
}

/// Parsed `[broker] url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerUrl {
    Memory,
    Sqlite(PathBuf),
}

impl BrokerUrl {
    /// Parses `memory://` or `sqlite://<path>`
    pub fn parse(url: &str) -> BrokerResult<Self> {
        if url == "memory://" {
            return Ok(Self::Memory);
        }

        match url.strip_prefix("sqlite://") {
            Some(path) if !path.trim().is_empty() => Ok(Self::Sqlite(PathBuf::from(path))),
            Some(_) => Err(BrokerError::InvalidUrl(format!(
                "{}: sqlite url needs a path",
                url
            ))),
            None => Err(BrokerError::InvalidUrl(format!(
                "{}: expected memory:// or sqlite://<path>",
                url
            ))),
        }
    }
}

/// Builds the broker named by the configuration (not yet connected)
pub fn open_broker(config: &BrokerConfig) -> BrokerResult<Arc<dyn Broker>> {
    let visibility = Duration::from_secs(config.visibility_timeout_secs);
    Ok(match BrokerUrl::parse(&config.url)? {
        BrokerUrl::Memory => Arc::new(MemoryBroker::new(visibility)),
        BrokerUrl::Sqlite(path) => Arc::new(SqliteBroker::new(path, visibility)),
    })
}
