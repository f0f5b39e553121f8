//! SQLite-backed broker
//!
//! Several worker processes on one host can share a queue file. Reservations
//! carry a random token so an ack from a consumer whose reservation lapsed is
//! detected as stale instead of deleting a message someone else now holds.

use crate::broker::{Broker, BrokerError, BrokerResult, Delivery, DeliveryTag};
use crate::job::JobEnvelope;
use crate::routing::QueueName;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const BROKER_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS broker_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    body TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'ready' CHECK(state IN ('ready', 'reserved', 'dead')),
    delivery_count INTEGER NOT NULL DEFAULT 0,
    visible_at INTEGER NOT NULL,
    reservation TEXT,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_broker_messages_queue_state
    ON broker_messages(queue, state, visible_at);
"#;

/// Broker storing queues in a SQLite file
pub struct SqliteBroker {
    path: PathBuf,
    visibility: Duration,
    conn: Mutex<Option<Connection>>,
}

impl SqliteBroker {
    pub fn new(path: PathBuf, visibility: Duration) -> Self {
        Self {
            path,
            visibility,
            conn: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> BrokerResult<T>,
    ) -> BrokerResult<T> {
        let mut guard = self.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| BrokerError::Disconnected("not connected".to_string()))?;
        f(conn)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn try_reserve(&self, queues: &[QueueName]) -> BrokerResult<Option<Delivery>> {
        let visibility_ms = self.visibility.as_millis() as i64;

        self.with_conn(|conn| {
            // take the write lock before the SELECT so two consumers cannot pick the same row
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = Self::now_ms();

            let mut found = None;
            // queues are tried in the order given
            for queue in queues {
                let row = tx
                    .query_row(
                        "SELECT id, body, delivery_count FROM broker_messages
                         WHERE queue = ?1
                           AND (state = 'ready' OR (state = 'reserved' AND visible_at <= ?2))
                         ORDER BY id LIMIT 1",
                        params![queue.as_str(), now],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, u32>(2)?,
                            ))
                        },
                    )
                    .optional()?;

                if let Some((id, body, count)) = row {
                    found = Some((queue.as_str(), id, body, count + 1));
                    break;
                }
            }

            let Some((queue, id, body, delivery_count)) = found else {
                return Ok(None);
            };

            let token = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE broker_messages
                 SET state = 'reserved', reservation = ?1, delivery_count = ?2, visible_at = ?3
                 WHERE id = ?4",
                params![token, delivery_count, now + visibility_ms, id],
            )?;
            tx.commit()?;

            Ok(Some(Delivery {
                tag: DeliveryTag(format!("{}:{}", id, token)),
                queue: queue.to_string(),
                body,
                delivery_count,
            }))
        })
    }

    fn parse_tag(tag: &DeliveryTag) -> BrokerResult<(i64, &str)> {
        tag.0
            .split_once(':')
            .and_then(|(id, token)| id.parse::<i64>().ok().map(|id| (id, token)))
            .ok_or_else(|| BrokerError::StaleDelivery(tag.0.clone()))
    }

    /// Number of dead-lettered messages on a queue
    pub fn dead_letter_count(&self, queue: QueueName) -> BrokerResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM broker_messages WHERE queue = ?1 AND state = 'dead'",
                params![queue.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn connect(&self) -> BrokerResult<()> {
        let conn = Connection::open(&self.path)
            .map_err(|e| BrokerError::Disconnected(format!("{}: {}", self.path.display(), e)))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        conn.execute_batch(BROKER_SCHEMA_SQL)?;

        *self.lock() = Some(conn);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        // reservations are left to lapse through the visibility timeout
        self.lock().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    async fn publish(&self, envelope: &JobEnvelope) -> BrokerResult<()> {
        let body = envelope.to_json()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO broker_messages (queue, body, visible_at, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    envelope.queue,
                    body,
                    Self::now_ms(),
                    envelope.enqueued_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    async fn receive(
        &self,
        queues: &[QueueName],
        wait: Duration,
    ) -> BrokerResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_reserve(queues)? {
                return Ok(Some(delivery));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, tag: &DeliveryTag) -> BrokerResult<()> {
        let (id, token) = Self::parse_tag(tag)?;
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM broker_messages
                 WHERE id = ?1 AND reservation = ?2 AND state = 'reserved'",
                params![id, token],
            )?;
            if deleted == 0 {
                return Err(BrokerError::StaleDelivery(tag.0.clone()));
            }
            Ok(())
        })
    }

    async fn reject(&self, tag: &DeliveryTag, requeue: bool) -> BrokerResult<()> {
        let (id, token) = Self::parse_tag(tag)?;
        let next_state = if requeue { "ready" } else { "dead" };
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE broker_messages
                 SET state = ?1, reservation = NULL, visible_at = ?2
                 WHERE id = ?3 AND reservation = ?4 AND state = 'reserved'",
                params![next_state, Self::now_ms(), id, token],
            )?;
            if updated == 0 {
                return Err(BrokerError::StaleDelivery(tag.0.clone()));
            }
            Ok(())
        })
    }

    async fn queue_depth(&self, queue: QueueName) -> BrokerResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM broker_messages WHERE queue = ?1 AND state = 'ready'",
                params![queue.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}
