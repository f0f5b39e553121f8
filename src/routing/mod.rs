//! Queue routing
//!
//! Maps job types to named queues and carries the per-queue execution policy
//! (concurrency cap, soft and hard time limits). The mapping is fixed; only the
//! policy values come from configuration.

use crate::config::Config;
use crate::job::JobType;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Routing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Queue {0} is not consumed by this worker")]
    QueueNotBound(String),

    #[error("Job type {job_type} belongs on {expected}, delivered on {delivered}")]
    Misrouted {
        job_type: String,
        expected: String,
        delivered: String,
    },
}

/// Named queues known to the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueName {
    /// The default queue for unclassified jobs
    Default,
    Crawl,
    Process,
    Schedule,
    Monitor,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::Default,
        QueueName::Crawl,
        QueueName::Process,
        QueueName::Schedule,
        QueueName::Monitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "celery",
            Self::Crawl => "crawl_queue",
            Self::Process => "process_queue",
            Self::Schedule => "schedule_queue",
            Self::Monitor => "monitor_queue",
        }
    }
}

impl FromStr for QueueName {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| RouteError::UnknownQueue(s.to_string()))
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution policy for one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRoute {
    pub queue: QueueName,
    pub max_concurrency: usize,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
}

/// Resolves job types to queues and admits deliveries
#[derive(Debug, Clone)]
pub struct QueueRouter {
    routes: HashMap<QueueName, QueueRoute>,
    bound: Vec<QueueName>,
}

impl QueueRouter {
    /// Creates a router from explicit routes and the queues this worker consumes
    ///
    /// Queues without an explicit route get `fallback` with the queue name swapped in.
    pub fn new(
        routes: impl IntoIterator<Item = QueueRoute>,
        bound: Vec<QueueName>,
        fallback: QueueRoute,
    ) -> Self {
        let mut map: HashMap<QueueName, QueueRoute> = QueueName::ALL
            .iter()
            .map(|&queue| {
                (
                    queue,
                    QueueRoute {
                        queue,
                        ..fallback.clone()
                    },
                )
            })
            .collect();

        for route in routes {
            map.insert(route.queue, route);
        }

        Self { routes: map, bound }
    }

    /// Builds the router from validated configuration
    pub fn from_config(config: &Config) -> Result<Self, RouteError> {
        let worker = &config.worker;
        let fallback = QueueRoute {
            queue: QueueName::Default,
            max_concurrency: worker.concurrency,
            soft_time_limit: Duration::from_secs(worker.soft_time_limit_secs),
            hard_time_limit: Duration::from_secs(worker.hard_time_limit_secs),
        };

        let mut routes = Vec::new();
        for (name, policy) in &config.queues {
            let queue: QueueName = name.parse()?;
            routes.push(QueueRoute {
                queue,
                max_concurrency: policy
                    .max_concurrency
                    .unwrap_or(worker.concurrency)
                    .min(worker.concurrency),
                soft_time_limit: Duration::from_secs(
                    policy
                        .soft_time_limit_secs
                        .unwrap_or(worker.soft_time_limit_secs),
                ),
                hard_time_limit: Duration::from_secs(
                    policy
                        .hard_time_limit_secs
                        .unwrap_or(worker.hard_time_limit_secs),
                ),
            });
        }

        let mut bound = Vec::new();
        for name in &worker.queues {
            let queue: QueueName = name.parse()?;
            if !bound.contains(&queue) {
                bound.push(queue);
            }
        }

        Ok(Self::new(routes, bound, fallback))
    }

    /// Routes a job type string to its queue policy
    ///
    /// # Errors
    ///
    /// `RouteError::UnknownJobType` if the string names no known type; the
    /// caller must reject the job rather than guess a queue.
    pub fn route(&self, job_type: &str) -> Result<(JobType, &QueueRoute), RouteError> {
        let job_type: JobType = job_type.parse()?;
        Ok((job_type, self.route_for(job_type)))
    }

    /// Policy for an already-resolved job type
    pub fn route_for(&self, job_type: JobType) -> &QueueRoute {
        self.policy(job_type.queue())
    }

    pub fn policy(&self, queue: QueueName) -> &QueueRoute {
        // every QueueName is inserted in `new`
        &self.routes[&queue]
    }

    /// Checks that a delivery on `delivered_queue` of `job_type` may run here
    pub fn admit(
        &self,
        delivered_queue: &str,
        job_type: &str,
    ) -> Result<(JobType, &QueueRoute), RouteError> {
        let delivered: QueueName = delivered_queue.parse()?;
        if !self.bound.contains(&delivered) {
            return Err(RouteError::QueueNotBound(delivered_queue.to_string()));
        }

        let (job_type, route) = self.route(job_type)?;
        if route.queue != delivered {
            return Err(RouteError::Misrouted {
                job_type: job_type.to_string(),
                expected: route.queue.to_string(),
                delivered: delivered.to_string(),
            });
        }

        Ok((job_type, route))
    }

    pub fn bound_queues(&self) -> &[QueueName] {
        &self.bound
    }

    pub fn routes(&self) -> impl Iterator<Item = &QueueRoute> {
        QueueName::ALL.iter().map(move |q| self.policy(*q))
    }
}
