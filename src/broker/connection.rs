//! Reconnecting broker handle
//!
//! Wraps a [`Broker`] with bounded exponential reconnect and remembers acks
//! that could not be delivered while the connection was down.

use crate::backoff::Backoff;
use crate::broker::{Broker, BrokerError, BrokerResult, Delivery, DeliveryTag};
use crate::config::BrokerConfig;
use crate::job::JobEnvelope;
use crate::routing::QueueName;
use crate::WorkerError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to tell the broker about a finished delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Reject and make visible again
    Requeue,
    /// Reject without requeue
    DeadLetter,
    /// Say nothing; the visibility timeout brings the job back
    Withhold,
}

/// Broker handle shared by the worker loop, executors and monitor
pub struct BrokerConnection {
    broker: Arc<dyn Broker>,
    backoff: Backoff,
    max_attempts: u32,
    pending_acks: Mutex<Vec<DeliveryTag>>,
}

impl BrokerConnection {
    pub fn new(broker: Arc<dyn Broker>, backoff: Backoff, max_attempts: u32) -> Self {
        Self {
            broker,
            backoff,
            max_attempts: max_attempts.max(1),
            pending_acks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(broker: Arc<dyn Broker>, config: &BrokerConfig) -> Self {
        Self::new(
            broker,
            Backoff::from_broker_config(config),
            config.max_reconnect_attempts,
        )
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Connects, retrying with backoff until `max_attempts` is exhausted
    ///
    /// # Errors
    ///
    /// `WorkerError::BrokerUnavailable` once every attempt failed, or the last
    /// broker error if `shutdown` fires while waiting between attempts.
    pub async fn connect_with_backoff(&self, shutdown: &CancellationToken) -> crate::Result<()> {
        for attempt in 0..self.max_attempts {
            match self.broker.connect().await {
                Ok(()) => {
                    if attempt > 0 {
                        info!("Broker connection re-established after {} attempts", attempt + 1);
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt + 1 == self.max_attempts {
                        warn!("Broker connection attempt {} failed: {}", attempt + 1, e);
                        break;
                    }

                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "Broker connection attempt {}/{} failed: {} (retrying in {:?})",
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => return Err(WorkerError::Broker(e)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(WorkerError::BrokerUnavailable {
            attempts: self.max_attempts,
        })
    }

    pub async fn publish(&self, envelope: &JobEnvelope) -> BrokerResult<()> {
        self.broker.publish(envelope).await
    }

    pub async fn receive(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> BrokerResult<Option<Delivery>> {
        self.broker.receive(queues, wait).await
    }

    pub async fn queue_depth(&self, queue: QueueName) -> BrokerResult<u64> {
        self.broker.queue_depth(queue).await
    }

    /// Acknowledges a delivery; if the connection is down the tag is kept for
    /// [`flush_pending_acks`](Self::flush_pending_acks) and the error returned
    pub async fn ack(&self, tag: &DeliveryTag) -> BrokerResult<()> {
        match self.broker.ack(tag).await {
            Err(e) if e.is_disconnect() => {
                self.pending_acks
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(tag.clone());
                Err(e)
            }
            other => other,
        }
    }

    pub async fn settle(&self, tag: &DeliveryTag, settlement: Settlement) -> BrokerResult<()> {
        match settlement {
            Settlement::Ack => self.ack(tag).await,
            Settlement::Requeue => self.broker.reject(tag, true).await,
            Settlement::DeadLetter => self.broker.reject(tag, false).await,
            Settlement::Withhold => Ok(()),
        }
    }

    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Retries acks queued while disconnected
    ///
    /// Tags the broker no longer recognizes are dropped: their jobs have been
    /// made visible again and will be redelivered. Returns how many were acked.
    pub async fn flush_pending_acks(&self) -> BrokerResult<usize> {
        let pending: Vec<DeliveryTag> = std::mem::take(
            &mut *self
                .pending_acks
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );

        let mut acked = 0;
        for (i, tag) in pending.iter().enumerate() {
            match self.broker.ack(tag).await {
                Ok(()) => acked += 1,
                Err(BrokerError::StaleDelivery(_)) => {
                    debug!("Pending ack {} is stale; job will be redelivered", tag);
                }
                Err(e) if e.is_disconnect() => {
                    self.pending_acks
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend(pending[i..].iter().cloned());
                    return Err(e);
                }
                Err(e) => warn!("Failed to flush ack {}: {}", tag, e),
            }
        }
        Ok(acked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::job::{JobPayload, JobType};

    fn connection(broker: Arc<MemoryBroker>, attempts: u32) -> BrokerConnection {
        BrokerConnection::new(
            broker,
            Backoff::new(Duration::from_millis(10), Duration::from_millis(100), 0.2),
            attempts,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        broker.refuse_connections(3);
        let conn = connection(broker.clone(), 5);

        conn.connect_with_backoff(&CancellationToken::new())
            .await
            .unwrap();
        assert!(conn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_max_attempts() {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        broker.refuse_connections(10);
        let conn = connection(broker, 3);

        let err = conn
            .connect_with_backoff(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::BrokerUnavailable { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_ack_while_disconnected_is_kept_pending() {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        let conn = connection(broker.clone(), 3);
        conn.connect_with_backoff(&CancellationToken::new())
            .await
            .unwrap();

        conn.publish(&JobEnvelope::new(JobType::Crawl, JobPayload::crawl("https://a.test/")))
            .await
            .unwrap();
        let delivery = conn
            .receive(&[QueueName::Crawl], Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        broker.drop_connection();
        assert!(conn.ack(&delivery.tag).await.is_err());
        assert_eq!(conn.pending_ack_count(), 1);

        conn.connect_with_backoff(&CancellationToken::new())
            .await
            .unwrap();
        // the drop returned the job to its queue, so the old tag is stale
        assert_eq!(conn.flush_pending_acks().await.unwrap(), 0);
        assert_eq!(conn.pending_ack_count(), 0);
        assert_eq!(conn.queue_depth(QueueName::Crawl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_withhold_leaves_delivery_in_flight() {
        let broker = Arc::new(MemoryBroker::new(Duration::from_secs(60)));
        let conn = connection(broker.clone(), 1);
        conn.connect_with_backoff(&CancellationToken::new())
            .await
            .unwrap();
        conn.publish(&JobEnvelope::new(JobType::Monitor, JobPayload::default()))
            .await
            .unwrap();
        let delivery = conn
            .receive(&[QueueName::Monitor], Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        conn.settle(&delivery.tag, Settlement::Withhold).await.unwrap();
        assert_eq!(broker.in_flight_count(), 1);
        assert_eq!(broker.acked_count(), 0);
    }
}
