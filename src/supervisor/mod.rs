//! Worker pool supervisor
//!
//! Owns the fixed table of execution slots and every piece of process-wide
//! worker state: the broker connection flag, the drain flag, the assignment
//! and rebuild counters and the monitor heartbeat. All of it sits behind one
//! `std::sync::Mutex` that is never held across an `.await`; waiters park on
//! a `Notify` and re-check after every state change.

mod context;
mod slot;

pub use context::{ConfigContextFactory, ContextFactory, ExecutionContext};
pub use slot::{Completion, Execution, SlotLease, SlotSnapshot};

use crate::config::Config;
use crate::job::{Job, JobError, JobOutcome};
use crate::monitor::HealthSignal;
use crate::routing::{QueueName, QueueRoute, QueueRouter};
use chrono::{DateTime, Utc};
use slot::Slot;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supervisor failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("Worker is shutting down")]
    ShutdownInProgress,

    #[error("Failed to build execution context: {0}")]
    ContextBuild(String),
}

#[derive(Debug)]
struct SupervisorState {
    slots: Vec<Slot>,
    connected: bool,
    draining: bool,
    assignments: u64,
    rebuilds: u64,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl SupervisorState {
    fn active(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    fn running_on(&self, queue: QueueName) -> usize {
        self.slots.iter().filter(|s| s.queue == Some(queue)).count()
    }
}

/// A slot marked occupied by `acquire_slot` but not yet leased
struct SlotClaim<'a> {
    supervisor: &'a Supervisor,
    slot_id: usize,
    armed: bool,
}

impl SlotClaim<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.supervisor.lock();
            let slot = &mut state.slots[self.slot_id];
            slot.current_job = None;
            slot.queue = None;
            slot.started_at = None;
        }
        debug!(slot = self.slot_id, "Slot claim abandoned");
        self.supervisor.notify.notify_waiters();
    }
}

/// Bounded pool of execution slots with time limits and context recycling
pub struct Supervisor {
    state: Mutex<SupervisorState>,
    notify: Notify,
    router: Arc<QueueRouter>,
    factory: Arc<dyn ContextFactory>,
    max_tasks_per_child: u32,
}

impl Supervisor {
    /// Creates a supervisor with `concurrency` slots; no assignment happens
    /// until `set_connected(true)`
    pub fn new(
        concurrency: usize,
        max_tasks_per_child: u32,
        router: Arc<QueueRouter>,
        factory: Arc<dyn ContextFactory>,
    ) -> Self {
        Self {
            state: Mutex::new(SupervisorState {
                slots: (0..concurrency.max(1)).map(Slot::new).collect(),
                connected: false,
                draining: false,
                assignments: 0,
                rebuilds: 0,
                last_heartbeat: None,
            }),
            notify: Notify::new(),
            router,
            factory,
            max_tasks_per_child: max_tasks_per_child.max(1),
        }
    }

    pub fn from_config(
        config: &Config,
        router: Arc<QueueRouter>,
        factory: Arc<dyn ContextFactory>,
    ) -> Self {
        Self::new(
            config.worker.concurrency,
            config.worker.max_tasks_per_child,
            router,
            factory,
        )
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits for a slot to run `job` on
    ///
    /// Returns once a slot is free, the job's queue is below its concurrency
    /// cap and the broker is connected. A slot whose context was torn down gets
    /// a fresh one before the lease is returned.
    ///
    /// # Errors
    ///
    /// `ShutdownInProgress` once draining has started; `ContextBuild` if a
    /// fresh context could not be built (the slot stays flagged for rebuild).
    pub async fn acquire_slot(&self, job: &Job) -> Result<SlotLease, SupervisorError> {
        let cap = self.router.policy(job.queue).max_concurrency.max(1);

        let (slot_id, reusable, generation) = loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.draining {
                    return Err(SupervisorError::ShutdownInProgress);
                }
                if state.connected && state.running_on(job.queue) < cap {
                    if let Some(index) = state.slots.iter().position(Slot::is_free) {
                        let slot = &mut state.slots[index];
                        slot.current_job = Some(job.id.clone());
                        slot.queue = Some(job.queue);
                        slot.started_at = Some(Instant::now());
                        let reusable = if slot.needs_rebuild {
                            None
                        } else {
                            slot.context.clone()
                        };
                        break (slot.id, reusable, slot.generation);
                    }
                }
            }

            notified.await;
        };

        // the slot is marked occupied; give it back if this future is dropped
        let claim = SlotClaim {
            supervisor: self,
            slot_id,
            armed: true,
        };

        let context = match reusable {
            Some(context) => context,
            None => match self.factory.build(slot_id, generation + 1).await {
                Ok(context) => {
                    let context = Arc::new(context);
                    let mut state = self.lock();
                    let slot = &mut state.slots[slot_id];
                    slot.context = Some(context.clone());
                    slot.needs_rebuild = false;
                    slot.generation = generation + 1;
                    if generation > 0 {
                        state.rebuilds += 1;
                        info!(
                            slot = slot_id,
                            generation = generation + 1,
                            "Rebuilt execution context"
                        );
                    }
                    context
                }
                Err(e) => {
                    error!(slot = slot_id, error = %e, "Context build failed");
                    return Err(e);
                }
            },
        };

        claim.disarm();
        self.lock().assignments += 1;
        debug!(slot = slot_id, job_id = %job.id, queue = %job.queue, "Assigned job");

        Ok(SlotLease {
            slot_id,
            job_id: job.id.clone(),
            queue: job.queue,
            context,
        })
    }

    /// Returns a slot to the pool
    ///
    /// The slot's context is torn down right away when it has served
    /// `max_tasks_per_child` jobs or the job was forced off it.
    pub async fn release(&self, lease: SlotLease, completion: Completion) {
        let retired = {
            let mut state = self.lock();
            let slot = &mut state.slots[lease.slot_id];
            slot.current_job = None;
            slot.queue = None;
            slot.started_at = None;
            slot.jobs_served += 1;

            let forced = completion == Completion::Forced;
            if forced || slot.jobs_served >= self.max_tasks_per_child {
                info!(
                    slot = lease.slot_id,
                    jobs_served = slot.jobs_served,
                    forced,
                    "Recycling execution context"
                );
                slot.jobs_served = 0;
                slot.needs_rebuild = true;
                slot.context.take()
            } else {
                None
            }
        };
        drop(lease);

        if let Some(context) = retired {
            self.factory.teardown(context).await;
        }
        self.notify.notify_waiters();
    }

    /// Runs `work` on its own task under the route's soft and hard limits
    ///
    /// At the soft limit the job's cancellation token fires and the job is
    /// expected to wind down with partial progress. At the hard limit the task
    /// is aborted and the outcome is `RedeliveryPending`; the caller must then
    /// release the lease as [`Completion::Forced`].
    pub async fn run_with_deadlines<F, Fut>(
        &self,
        lease: &SlotLease,
        route: &QueueRoute,
        work: F,
    ) -> Execution
    where
        F: FnOnce(Arc<ExecutionContext>, CancellationToken) -> Fut,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let mut handle = tokio::spawn(work(lease.context(), cancel.clone()));

        let soft = tokio::time::sleep(route.soft_time_limit);
        let hard = tokio::time::sleep(route.hard_time_limit);
        tokio::pin!(soft);
        tokio::pin!(hard);
        let mut soft_limited = false;

        loop {
            tokio::select! {
                joined = &mut handle => {
                    return match joined {
                        Ok(outcome) => Execution {
                            outcome,
                            completion: Completion::Finished,
                            soft_limited,
                        },
                        Err(e) => {
                            error!(job_id = %lease.job_id, error = %e, "Job task failed");
                            Execution {
                                outcome: JobOutcome::failed(format!("job task failed: {}", e)),
                                completion: Completion::Forced,
                                soft_limited,
                            }
                        }
                    };
                }
                _ = &mut soft, if !soft_limited => {
                    warn!(
                        job_id = %lease.job_id,
                        limit_secs = route.soft_time_limit.as_secs(),
                        "Soft time limit reached, cancelling job"
                    );
                    cancel.cancel();
                    soft_limited = true;
                }
                _ = &mut hard => {
                    handle.abort();
                    let err = JobError::DeadlineExceeded {
                        job_id: lease.job_id.clone(),
                        limit_secs: route.hard_time_limit.as_secs(),
                    };
                    error!(job_id = %lease.job_id, slot = lease.slot_id, "{}", err);
                    return Execution {
                        outcome: JobOutcome::RedeliveryPending {
                            reason: err.to_string(),
                        },
                        completion: Completion::Forced,
                        soft_limited,
                    };
                }
            }
        }
    }

    /// Waits until a slot is free and the broker is connected
    ///
    /// Called before receiving so the worker never holds a delivery it has no
    /// capacity for.
    pub async fn wait_for_capacity(&self) -> Result<(), SupervisorError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if state.draining {
                    return Err(SupervisorError::ShutdownInProgress);
                }
                if state.connected && state.slots.iter().any(Slot::is_free) {
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Pauses (false) or resumes (true) new assignments
    pub fn set_connected(&self, connected: bool) {
        let changed = {
            let mut state = self.lock();
            let changed = state.connected != connected;
            state.connected = connected;
            changed
        };
        if changed {
            if connected {
                info!("Broker connected, resuming assignments");
            } else {
                warn!("Broker disconnected, pausing assignments");
            }
        }
        self.notify.notify_waiters();
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Starts draining: pending and future acquires fail with `ShutdownInProgress`
    pub fn shutdown(&self) {
        self.lock().draining = true;
        info!("Supervisor draining");
        self.notify.notify_waiters();
    }

    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    /// Waits for in-flight jobs to finish; false if `timeout` elapsed first
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.lock().active() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    /// Tears down the contexts of all idle slots
    pub async fn teardown_all(&self) {
        let contexts: Vec<_> = {
            let mut state = self.lock();
            state
                .slots
                .iter_mut()
                .filter(|s| s.is_free())
                .filter_map(|s| {
                    s.needs_rebuild = true;
                    s.context.take()
                })
                .collect()
        };
        for context in contexts {
            self.factory.teardown(context).await;
        }
    }

    pub fn active_slots(&self) -> usize {
        self.lock().active()
    }

    pub fn total_slots(&self) -> usize {
        self.lock().slots.len()
    }

    /// Leases handed out since startup
    pub fn assignments(&self) -> u64 {
        self.lock().assignments
    }

    /// Contexts rebuilt after a recycle since startup
    pub fn rebuilds(&self) -> u64 {
        self.lock().rebuilds
    }

    pub fn slots(&self) -> Vec<SlotSnapshot> {
        let now = Instant::now();
        self.lock().slots.iter().map(|s| s.snapshot(now)).collect()
    }

    pub fn record_heartbeat(&self, at: DateTime<Utc>) {
        self.lock().last_heartbeat = Some(at);
    }

    pub fn health_signal(&self) -> HealthSignal {
        let state = self.lock();
        HealthSignal {
            connected_to_broker: state.connected,
            active_slots: state.active(),
            last_heartbeat: state.last_heartbeat,
        }
    }
}
