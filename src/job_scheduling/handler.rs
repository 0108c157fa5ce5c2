//! Executor contract between the job queue and its call-sites

use super::job_queue::QueueInner;
use super::types::{ExceptionReason, ExecutionProps, JobError, JobValue, QueueEntity};
use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use uuid::Uuid;

/// Work performed for each job.
///
/// `execute` runs once per attempt and must eventually lead to exactly one of
/// `resolve`, `reject` or `requeue` on the handle, either before returning or
/// later from somewhere the handle was stashed. Returning `Err` or panicking
/// rejects the job with [`JobError::ExecutorFailure`].
#[async_trait]
pub trait JobHandler<E, T>: Send + Sync
where
    E: QueueEntity,
    T: JobValue,
{
    async fn execute(&self, job: JobHandle<E, T>) -> anyhow::Result<()>;

    /// Last chance to settle a job whose timeout elapsed
    async fn handle_exception(
        &self,
        job: JobHandle<E, T>,
        reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        let _ = reason;
        job.reject(JobError::Timeout);
        Ok(())
    }
}

/// Capability to settle or requeue one job.
///
/// Bound to a single job identity: once that job is settled or cancelled,
/// every method becomes a no-op returning `false`. `resolve` and `reject`
/// work from any attempt, so a handle stashed for an out-of-band result can
/// still settle the job. `requeue` and `update_entity` only work from the
/// attempt currently running, and only once per attempt.
pub struct JobHandle<E: QueueEntity, T: JobValue> {
    queue: Weak<QueueInner<E, T>>,
    job_id: Uuid,
    attempt: u32,
    entity_id: E::Id,
    entity: E,
    props: ExecutionProps,
    requeue_count: u32,
}

impl<E, T> JobHandle<E, T>
where
    E: QueueEntity,
    T: JobValue,
{
    pub(crate) fn new(
        queue: Weak<QueueInner<E, T>>,
        job_id: Uuid,
        attempt: u32,
        entity: E,
        props: ExecutionProps,
        requeue_count: u32,
    ) -> Self {
        Self {
            queue,
            job_id,
            attempt,
            entity_id: entity.entity_id(),
            entity,
            props,
            requeue_count,
        }
    }

    /// Entity snapshot at the time this attempt started
    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn entity_id(&self) -> &E::Id {
        &self.entity_id
    }

    /// Merged execution properties at the time this attempt started
    pub fn props(&self) -> &ExecutionProps {
        &self.props
    }

    pub fn requeue_count(&self) -> u32 {
        self.requeue_count
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Invocation this handle was issued for, starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Settle the job successfully. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.settle(&self.entity_id, self.job_id, Ok(value)),
            None => false,
        }
    }

    /// Settle the job with an error. Returns `false` if it was already settled.
    pub fn reject(&self, error: JobError) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.settle(&self.entity_id, self.job_id, Err(error)),
            None => false,
        }
    }

    /// Put the job back to sleep and run it again later.
    ///
    /// The timeout budget keeps counting from the first attempt.
    pub fn requeue(&self, delay: Option<Duration>, props: Option<ExecutionProps>) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.requeue(&self.entity_id, self.job_id, self.attempt, delay, props),
            None => false,
        }
    }

    /// Replace the stored entity snapshot after refetching it
    pub fn update_entity(&self, entity: E) -> bool {
        match self.queue.upgrade() {
            Some(queue) => queue.update_entity(&self.entity_id, self.job_id, self.attempt, entity),
            None => false,
        }
    }
}

impl<E: QueueEntity, T: JobValue> Clone for JobHandle<E, T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            job_id: self.job_id,
            attempt: self.attempt,
            entity_id: self.entity_id.clone(),
            entity: self.entity.clone(),
            props: self.props.clone(),
            requeue_count: self.requeue_count,
        }
    }
}

impl<E: QueueEntity, T: JobValue> std::fmt::Debug for JobHandle<E, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("entity_id", &self.entity_id)
            .field("requeue_count", &self.requeue_count)
            .finish()
    }
}
