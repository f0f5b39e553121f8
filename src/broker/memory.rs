//! In-process broker
//!
//! Holds queues in memory behind one mutex. Besides single-process runs it is the
//! broker used by tests, so it exposes fault injection (`drop_connection`,
//! `refuse_connections`) and inspection helpers.

use crate::broker::{Broker, BrokerError, BrokerResult, Delivery, DeliveryTag};
use crate::job::JobEnvelope;
use crate::routing::QueueName;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredMessage {
    body: String,
    delivery_count: u32,
}

#[derive(Debug)]
struct InFlight {
    queue: String,
    message: StoredMessage,
    visible_at: Instant,
}

/// A message rejected without requeue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    refuse_connects: u32,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<String, InFlight>,
    dead_letters: Vec<DeadLetter>,
    acked: Vec<String>,
}

impl MemoryState {
    /// Returns every in-flight message to the head of its queue
    fn requeue_all_in_flight(&mut self) {
        let in_flight: Vec<InFlight> = self.in_flight.drain().map(|(_, f)| f).collect();
        for flight in in_flight {
            self.queues
                .entry(flight.queue)
                .or_default()
                .push_front(flight.message);
        }
    }

    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(tag, _)| tag.clone())
            .collect();

        for tag in expired {
            if let Some(flight) = self.in_flight.remove(&tag) {
                tracing::debug!(queue = %flight.queue, "visibility timeout lapsed, requeueing");
                self.queues
                    .entry(flight.queue)
                    .or_default()
                    .push_front(flight.message);
            }
        }
    }

    fn take_next(&mut self, queues: &[QueueName], visibility: Duration) -> Option<Delivery> {
        for queue in queues {
            let name = queue.as_str();
            let Some(mut message) = self.queues.get_mut(name).and_then(|q| q.pop_front()) else {
                continue;
            };

            message.delivery_count += 1;
            let tag = uuid::Uuid::new_v4().to_string();
            let delivery = Delivery {
                tag: DeliveryTag(tag.clone()),
                queue: name.to_string(),
                body: message.body.clone(),
                delivery_count: message.delivery_count,
            };
            self.in_flight.insert(
                tag,
                InFlight {
                    queue: name.to_string(),
                    message,
                    visible_at: Instant::now() + visibility,
                },
            );
            return Some(delivery);
        }
        None
    }
}

/// In-memory broker with at-least-once semantics
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
    notify: Notify,
    visibility: Duration,
}

impl MemoryBroker {
    /// Creates a disconnected broker; call `connect` before use
    pub fn new(visibility: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            visibility,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulates a lost connection: in-flight messages return to their queues
    pub fn drop_connection(&self) {
        {
            let mut state = self.lock();
            state.connected = false;
            state.requeue_all_in_flight();
        }
        self.notify.notify_waiters();
    }

    /// Makes the next `n` connect attempts fail
    pub fn refuse_connections(&self, n: u32) {
        self.lock().refuse_connects = n;
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn acked_count(&self) -> usize {
        self.lock().acked.len()
    }

    /// Ids of acknowledged jobs, in ack order
    pub fn acked_job_ids(&self) -> Vec<String> {
        self.lock()
            .acked
            .iter()
            .filter_map(|body| JobEnvelope::from_json(body).ok())
            .map(|e| e.id)
            .collect()
    }

    /// Ids of jobs waiting on a queue, head first
    pub fn queued_job_ids(&self, queue: QueueName) -> Vec<String> {
        self.lock()
            .queues
            .get(queue.as_str())
            .map(|q| {
                q.iter()
                    .filter_map(|m| JobEnvelope::from_json(&m.body).ok())
                    .map(|e| e.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Publishes a raw body, bypassing envelope serialization
    pub fn publish_raw(&self, queue: &str, body: impl Into<String>) -> BrokerResult<()> {
        {
            let mut state = self.lock();
            if !state.connected {
                return Err(BrokerError::Disconnected("not connected".to_string()));
            }
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(StoredMessage {
                    body: body.into(),
                    delivery_count: 0,
                });
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> BrokerResult<()> {
        let mut state = self.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(BrokerError::Disconnected("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.drop_connection();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn publish(&self, envelope: &JobEnvelope) -> BrokerResult<()> {
        let body = envelope.to_json()?;
        self.publish_raw(&envelope.queue, body)
    }

    async fn receive(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> BrokerResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if !state.connected {
                    return Err(BrokerError::Disconnected("not connected".to_string()));
                }
                state.reclaim_expired(Instant::now());
                if let Some(delivery) = state.take_next(queues, self.visibility) {
                    return Ok(Some(delivery));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, tag: &DeliveryTag) -> BrokerResult<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(BrokerError::Disconnected("not connected".to_string()));
        }
        let flight = state
            .in_flight
            .remove(&tag.0)
            .ok_or_else(|| BrokerError::StaleDelivery(tag.0.clone()))?;
        state.acked.push(flight.message.body);
        Ok(())
    }

    async fn reject(&self, tag: &DeliveryTag, requeue: bool) -> BrokerResult<()> {
        {
            let mut state = self.lock();
            if !state.connected {
                return Err(BrokerError::Disconnected("not connected".to_string()));
            }
            let flight = state
                .in_flight
                .remove(&tag.0)
                .ok_or_else(|| BrokerError::StaleDelivery(tag.0.clone()))?;

            if requeue {
                state
                    .queues
                    .entry(flight.queue)
                    .or_default()
                    .push_back(flight.message);
            } else {
                state.dead_letters.push(DeadLetter {
                    queue: flight.queue,
                    body: flight.message.body,
                });
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn queue_depth(&self, queue: QueueName) -> BrokerResult<u64> {
        let state = self.lock();
        if !state.connected {
            return Err(BrokerError::Disconnected("not connected".to_string()));
        }
        Ok(state
            .queues
            .get(queue.as_str())
            .map(|q| q.len() as u64)
            .unwrap_or(0))
    }
}
