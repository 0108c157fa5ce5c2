//! Per-entity job bookkeeping

use super::handler::JobHandle;
use super::job_queue::QueueInner;
use super::outcome::{JobOutcome, OutcomeSender};
use super::types::{ExecutionProps, JobError, JobStatus, JobValue, QueueEntity};
use chrono::{DateTime, Utc};
use std::sync::Weak;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Scheduler-owned record for one entity.
///
/// Created on the first enqueue for an id and dropped the moment its outcome
/// is settled.
pub(crate) struct JobState<E: QueueEntity, T> {
    pub job_id: Uuid,
    pub entity: E,
    pub props: ExecutionProps,
    pub status: JobStatus,
    pub requeue_count: u32,
    /// Bumped every time the executor or exception handler is invoked
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub outcome: JobOutcome<T>,
    sender: Option<OutcomeSender<T>>,
    /// Set once, on first promotion; never rearmed
    pub timeout_timer: Option<AbortHandle>,
    pub timeout_armed: bool,
    pub timed_out_at: Option<Instant>,
    pub sleep_timer: Option<AbortHandle>,
    /// Bumped on every sleep so a stale timer can tell it was superseded
    pub sleep_generation: u64,
}

impl<E, T> JobState<E, T>
where
    E: QueueEntity,
    T: JobValue,
{
    pub fn new(entity: E, props: ExecutionProps) -> Self {
        let job_id = Uuid::new_v4();
        let (sender, outcome) = JobOutcome::channel(job_id);
        Self {
            job_id,
            entity,
            props,
            status: JobStatus::Queued,
            requeue_count: 0,
            attempt: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            outcome,
            sender: Some(sender),
            timeout_timer: None,
            timeout_armed: false,
            timed_out_at: None,
            sleep_timer: None,
            sleep_generation: 0,
        }
    }

    pub fn cancel_sleep(&mut self) {
        if let Some(timer) = self.sleep_timer.take() {
            timer.abort();
        }
        self.sleep_generation += 1;
    }

    pub fn cancel_timers(&mut self) {
        self.cancel_sleep();
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
    }

    /// Deliver the final result to every outcome holder
    pub fn settle(mut self, result: Result<T, JobError>) {
        self.cancel_timers();
        if let Some(sender) = self.sender.take() {
            // Nobody listening is fine
            let _ = sender.send(result);
        }
    }

    /// Hand out a handle for the next executor or exception handler invocation
    pub fn next_attempt(&mut self, queue: Weak<QueueInner<E, T>>) -> JobHandle<E, T> {
        self.attempt += 1;
        JobHandle::new(
            queue,
            self.job_id,
            self.attempt,
            self.entity.clone(),
            self.props.clone(),
            self.requeue_count,
        )
    }

    /// Whether `attempt` is the invocation currently allowed to steer the job
    pub fn is_current(&self, job_id: Uuid, attempt: u32) -> bool {
        self.job_id == job_id
            && self.attempt == attempt
            && matches!(self.status, JobStatus::InProgress | JobStatus::TimedOut)
    }

    pub fn snapshot(&self) -> JobStateSnapshot<E> {
        JobStateSnapshot {
            job_id: self.job_id,
            entity: self.entity.clone(),
            props: self.props.clone(),
            status: self.status,
            requeue_count: self.requeue_count,
            attempt: self.attempt,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
        }
    }
}

impl<E: QueueEntity, T> Drop for JobState<E, T> {
    fn drop(&mut self) {
        if let Some(timer) = self.sleep_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
    }
}

/// Read-only view of a tracked job
#[derive(Debug, Clone)]
pub struct JobStateSnapshot<E> {
    pub job_id: Uuid,
    pub entity: E,
    pub props: ExecutionProps,
    pub status: JobStatus,
    pub requeue_count: u32,
    /// Executor and exception handler invocations so far
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// First promotion to `InProgress`; the timeout budget counts from here
    pub started_at: Option<DateTime<Utc>>,
}
