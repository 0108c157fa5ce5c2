//! Per-entity job queue with concurrency slots, timeouts and requeue

use super::handler::{JobHandle, JobHandler};
use super::job_state::{JobState, JobStateSnapshot};
use super::outcome::JobOutcome;
use super::types::{
    ExceptionReason, ExecutionProps, JobError, JobStatus, JobValue, QueueConfig, QueueEntity,
    RequeuePolicy,
};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Job queue keyed by entity id.
///
/// At most one job exists per entity; enqueuing an entity that is already
/// tracked merges the new properties into the existing job and returns the
/// same [`JobOutcome`]. Up to `concurrency_limit` jobs run at once, promoted
/// in enqueue order by a debounced processing pass.
///
/// All bookkeeping runs under one lock that is never held while caller code
/// runs. Methods that start timers must be called from within a Tokio runtime.
pub struct TabJobQueue<E: QueueEntity, T: JobValue> {
    inner: Arc<QueueInner<E, T>>,
}

impl<E: QueueEntity, T: JobValue> Clone for TabJobQueue<E, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Statistics about the job queue state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub queued: usize,
    /// Jobs holding a concurrency slot; never above the limit
    pub in_progress: usize,
    pub sleeping: usize,
    /// Exception handlers running for jobs that timed out while waiting
    pub timed_out: usize,
    /// Jobs still unsettled a full `job_timeout` after their timeout fired
    pub overdue: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.queued + self.in_progress + self.sleeping + self.timed_out
    }
}

impl<E, T> TabJobQueue<E, T>
where
    E: QueueEntity,
    T: JobValue,
{
    /// Create a queue, failing fast on an invalid configuration
    pub fn new(
        name: impl Into<String>,
        config: QueueConfig,
        handler: Arc<dyn JobHandler<E, T>>,
    ) -> Result<Self, JobError> {
        config.validate()?;
        let name = name.into();
        info!(
            "Created {} job queue (concurrency: {}, timeout: {:?})",
            name, config.concurrency_limit, config.job_timeout
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                name,
                state: Mutex::new(QueueState {
                    config,
                    handler,
                    jobs: HashMap::new(),
                    pending_ids: Vec::new(),
                    pass_timer: None,
                }),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Replace the configuration, e.g. to widen concurrency during a bulk operation
    pub fn configure(&self, config: QueueConfig) -> Result<(), JobError> {
        config.validate()?;
        {
            let mut state = self.inner.state();
            info!(
                "Reconfigured {} job queue: concurrency {} -> {}, timeout {:?} -> {:?}",
                self.inner.name,
                state.config.concurrency_limit,
                config.concurrency_limit,
                state.config.job_timeout,
                config.job_timeout
            );
            state.config = config;
        }
        self.inner.request_process(Duration::ZERO);
        Ok(())
    }

    pub fn config(&self) -> QueueConfig {
        self.inner.state().config.clone()
    }

    /// Swap the executor and exception functions for subsequent attempts
    pub fn set_handler(&self, handler: Arc<dyn JobHandler<E, T>>) {
        self.inner.state().handler = handler;
    }

    /// Track a job for `entity`, or merge into the job already tracked for it.
    ///
    /// With a non-zero `delay` the job sleeps before becoming eligible; without
    /// one, a sleeping job is woken immediately.
    pub fn enqueue(
        &self,
        entity: E,
        props: ExecutionProps,
        delay: Option<Duration>,
    ) -> JobOutcome<T> {
        self.inner.enqueue(entity, props, delay)
    }

    /// Cancel the job for `id`, rejecting its outcome with
    /// [`JobError::CancelledExternally`]. An executor already running is not
    /// interrupted; its later calls on the handle are ignored.
    pub fn unqueue(&self, id: &E::Id) -> bool {
        self.inner.unqueue(id)
    }

    pub fn query_job_state(&self, id: &E::Id) -> Option<JobStateSnapshot<E>> {
        self.inner.state().jobs.get(id).map(JobState::snapshot)
    }

    /// Number of tracked jobs (queued, in progress or sleeping)
    pub fn queue_size(&self) -> usize {
        self.inner.state().pending_ids.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state();
        let grace = state.config.job_timeout;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::InProgress => stats.in_progress += 1,
                JobStatus::Sleeping => stats.sleeping += 1,
                JobStatus::TimedOut => stats.timed_out += 1,
            }
            if job
                .timed_out_at
                .is_some_and(|timed_out_at| timed_out_at.elapsed() >= grace)
            {
                stats.overdue += 1;
            }
        }
        stats
    }

    /// Tracked entity ids in promotion order
    pub fn pending_ids(&self) -> Vec<E::Id> {
        self.inner.state().pending_ids.clone()
    }

    /// Reject every tracked job with [`JobError::Shutdown`]
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown()
    }
}

pub(crate) struct QueueInner<E: QueueEntity, T: JobValue> {
    name: String,
    state: Mutex<QueueState<E, T>>,
}

struct QueueState<E: QueueEntity, T: JobValue> {
    config: QueueConfig,
    handler: Arc<dyn JobHandler<E, T>>,
    jobs: HashMap<E::Id, JobState<E, T>>,
    /// Enqueue order; no id appears twice
    pending_ids: Vec<E::Id>,
    /// Debounced processing pass, if one is scheduled
    pass_timer: Option<AbortHandle>,
}

impl<E: QueueEntity, T: JobValue> QueueState<E, T> {
    fn remove_job(&mut self, id: &E::Id) -> Option<JobState<E, T>> {
        self.pending_ids.retain(|pending| pending != id);
        self.jobs.remove(id)
    }
}

impl<E: QueueEntity, T: JobValue> Drop for QueueState<E, T> {
    fn drop(&mut self) {
        if let Some(timer) = self.pass_timer.take() {
            timer.abort();
        }
    }
}

impl<E, T> QueueInner<E, T>
where
    E: QueueEntity,
    T: JobValue,
{
    fn state(&self) -> MutexGuard<'_, QueueState<E, T>> {
        // No caller code runs under the lock, so a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(
        self: &Arc<Self>,
        entity: E,
        props: ExecutionProps,
        delay: Option<Duration>,
    ) -> JobOutcome<T> {
        let id = entity.entity_id();
        let mut guard = self.state();
        let state = &mut *guard;

        let job = match state.jobs.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let job = entry.into_mut();
                job.props.merge(props);
                job.entity = entity;
                debug!(
                    "{} queue: merged request into existing job for {} ({})",
                    self.name, id, job.status
                );
                job
            }
            Entry::Vacant(entry) => {
                state.pending_ids.push(id.clone());
                debug!("{} queue: enqueued job for {}", self.name, id);
                entry.insert(JobState::new(entity, props))
            }
        };
        let outcome = job.outcome.clone();

        match delay.filter(|delay| !delay.is_zero()) {
            Some(delay) if matches!(job.status, JobStatus::Queued | JobStatus::Sleeping) => {
                self.sleep_job(&id, job, delay);
                return outcome;
            }
            Some(_) => {
                debug!(
                    "{} queue: ignoring delay for {}, job is {}",
                    self.name, id, job.status
                );
            }
            None => {
                if job.status == JobStatus::Sleeping {
                    job.cancel_sleep();
                    job.status = JobStatus::Queued;
                }
            }
        }
        drop(guard);

        self.request_process(Duration::ZERO);
        outcome
    }

    fn unqueue(self: &Arc<Self>, id: &E::Id) -> bool {
        let (job, delay) = {
            let mut state = self.state();
            match state.remove_job(id) {
                Some(job) => (job, state.config.processing_delay),
                None => return false,
            }
        };

        info!("{} queue: cancelled job for {}", self.name, id);
        job.settle(Err(JobError::CancelledExternally));
        self.request_process(delay);
        true
    }

    fn shutdown(&self) -> usize {
        let jobs: Vec<_> = {
            let mut state = self.state();
            if let Some(timer) = state.pass_timer.take() {
                timer.abort();
            }
            state.pending_ids.clear();
            state.jobs.drain().map(|(_, job)| job).collect()
        };

        let count = jobs.len();
        for job in jobs {
            job.settle(Err(JobError::Shutdown));
        }
        if count > 0 {
            info!("{} queue: shut down with {} tracked jobs", self.name, count);
        }
        count
    }

    /// Settle the job if `job_id` still identifies the tracked job for `id`
    pub(crate) fn settle(
        self: &Arc<Self>,
        id: &E::Id,
        job_id: Uuid,
        result: Result<T, JobError>,
    ) -> bool {
        let (job, delay) = {
            let mut state = self.state();
            if !state.jobs.get(id).is_some_and(|job| job.job_id == job_id) {
                debug!(
                    "{} queue: ignoring settlement for {}, job no longer tracked",
                    self.name, id
                );
                return false;
            }
            match state.remove_job(id) {
                Some(job) => (job, state.config.processing_delay),
                None => return false,
            }
        };

        match &result {
            Ok(_) => info!(
                "{} queue: job for {} resolved after {} requeues",
                self.name, id, job.requeue_count
            ),
            Err(e) => info!("{} queue: job for {} rejected: {}", self.name, id, e),
        }
        job.settle(result);
        self.request_process(delay);
        true
    }

    pub(crate) fn requeue(
        self: &Arc<Self>,
        id: &E::Id,
        job_id: Uuid,
        attempt: u32,
        delay: Option<Duration>,
        props: Option<ExecutionProps>,
    ) -> bool {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(job) = state
            .jobs
            .get_mut(id)
            .filter(|job| job.is_current(job_id, attempt))
        else {
            debug!(
                "{} queue: ignoring requeue for {} from stale attempt {}",
                self.name, id, attempt
            );
            return false;
        };

        if let Some(props) = props {
            job.props.merge(props);
        }
        job.requeue_count += 1;
        let delay = delay
            .filter(|delay| !delay.is_zero())
            .unwrap_or(state.config.default_requeue_delay);
        debug!(
            "{} queue: requeued job for {} (attempt {}, sleeping {:?})",
            self.name,
            id,
            job.requeue_count + 1,
            delay
        );
        self.sleep_job(id, job, delay);

        if state.config.requeue_policy == RequeuePolicy::MoveToBack {
            state.pending_ids.retain(|pending| pending != id);
            state.pending_ids.push(id.clone());
        }
        drop(guard);

        // The slot is free while the job sleeps
        self.request_process(Duration::ZERO);
        true
    }

    pub(crate) fn update_entity(
        &self,
        id: &E::Id,
        job_id: Uuid,
        attempt: u32,
        entity: E,
    ) -> bool {
        let mut state = self.state();
        match state
            .jobs
            .get_mut(id)
            .filter(|job| job.is_current(job_id, attempt))
        {
            Some(job) => {
                job.entity = entity;
                true
            }
            None => false,
        }
    }

    /// Put a job to sleep; it becomes `Queued` again when the timer fires
    fn sleep_job(self: &Arc<Self>, id: &E::Id, job: &mut JobState<E, T>, delay: Duration) {
        job.cancel_sleep();
        job.status = JobStatus::Sleeping;

        let generation = job.sleep_generation;
        let job_id = job.job_id;
        let queue = Arc::downgrade(self);
        let id = id.clone();
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.wake(&id, job_id, generation);
            }
        });
        job.sleep_timer = Some(timer.abort_handle());
    }

    fn wake(self: &Arc<Self>, id: &E::Id, job_id: Uuid, generation: u64) {
        {
            let mut state = self.state();
            let Some(job) = state.jobs.get_mut(id).filter(|job| {
                job.job_id == job_id
                    && job.sleep_generation == generation
                    && job.status == JobStatus::Sleeping
            }) else {
                return;
            };
            job.sleep_timer = None;
            job.status = JobStatus::Queued;
            debug!("{} queue: job for {} woke up", self.name, id);
        }
        self.request_process(Duration::ZERO);
    }

    /// Ask for a processing pass after `delay`
    fn request_process(self: &Arc<Self>, delay: Duration) {
        if delay.is_zero() {
            self.schedule_pass();
            return;
        }

        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.schedule_pass();
            }
        });
    }

    /// Coalesce requests into a single pass after the buffer interval
    fn schedule_pass(self: &Arc<Self>) {
        let mut state = self.state();
        if state.pass_timer.is_some() {
            return;
        }

        let buffer = state.config.processing_buffer;
        let queue = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            sleep(buffer).await;
            if let Some(queue) = queue.upgrade() {
                queue.process_queue();
            }
        });
        state.pass_timer = Some(timer.abort_handle());
    }

    /// Promote queued jobs in enqueue order until every slot is taken
    fn process_queue(self: &Arc<Self>) {
        let (handler, promoted) = {
            let mut guard = self.state();
            let state = &mut *guard;
            state.pass_timer = None;

            let limit = state.config.concurrency_limit;
            let job_timeout = state.config.job_timeout;
            let mut in_progress = state
                .pending_ids
                .iter()
                .filter(|id| {
                    state
                        .jobs
                        .get(*id)
                        .is_some_and(|job| job.status == JobStatus::InProgress)
                })
                .count();

            let mut promoted = Vec::new();
            for id in &state.pending_ids {
                if in_progress >= limit {
                    break;
                }
                let Some(job) = state.jobs.get_mut(id) else {
                    continue;
                };
                if job.status != JobStatus::Queued {
                    continue;
                }

                job.status = JobStatus::InProgress;
                in_progress += 1;
                if !job.timeout_armed {
                    job.timeout_armed = true;
                    job.started_at = Some(Utc::now());
                    job.timeout_timer = Some(self.arm_timeout(id, job.job_id, job_timeout));
                }
                promoted.push(job.next_attempt(Arc::downgrade(self)));
            }

            (state.handler.clone(), promoted)
        };

        if !promoted.is_empty() {
            debug!(
                "{} queue: promoted {} jobs to in progress",
                self.name,
                promoted.len()
            );
        }
        for job in promoted {
            self.spawn_attempt(handler.clone(), job, None);
        }
    }

    fn arm_timeout(self: &Arc<Self>, id: &E::Id, job_id: Uuid, timeout: Duration) -> AbortHandle {
        let queue = Arc::downgrade(self);
        let id = id.clone();
        tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(queue) = queue.upgrade() {
                queue.on_timeout(&id, job_id, timeout);
            }
        })
        .abort_handle()
    }

    fn on_timeout(self: &Arc<Self>, id: &E::Id, job_id: Uuid, timeout: Duration) {
        let (handler, job) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(job) = state.jobs.get_mut(id).filter(|job| job.job_id == job_id) else {
                return;
            };
            job.timeout_timer = None;
            job.timed_out_at = Some(Instant::now());
            // A running attempt keeps its slot; a waiting job never gets one
            if job.status != JobStatus::InProgress {
                job.cancel_sleep();
                job.status = JobStatus::TimedOut;
            }
            (state.handler.clone(), job.next_attempt(Arc::downgrade(self)))
        };

        warn!(
            "{} queue: job for {} timed out after {:?} ({} requeues)",
            self.name,
            id,
            timeout,
            job.requeue_count()
        );
        self.spawn_attempt(handler, job, Some(ExceptionReason::Timeout));
    }

    /// Run the executor (or exception handler) behind an error boundary
    fn spawn_attempt(
        self: &Arc<Self>,
        handler: Arc<dyn JobHandler<E, T>>,
        job: JobHandle<E, T>,
        exception: Option<ExceptionReason>,
    ) {
        let queue = Arc::downgrade(self);
        let name = self.name.clone();
        tokio::spawn(async move {
            let attempt = match exception {
                None => handler.execute(job.clone()),
                Some(reason) => handler.handle_exception(job.clone(), reason),
            };

            match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(Ok(())) => {
                    if exception.is_some() {
                        if let Some(queue) = queue.upgrade() {
                            queue.reject_unsettled(&job);
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(
                        "{} queue: handler for {} failed: {:#}",
                        name,
                        job.entity_id(),
                        e
                    );
                    job.reject(JobError::executor(format!("{e:#}")));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        "{} queue: handler for {} panicked: {}",
                        name,
                        job.entity_id(),
                        message
                    );
                    job.reject(JobError::executor(message));
                }
            }
        });
    }

    /// An exception handler returned without settling or requeuing
    fn reject_unsettled(self: &Arc<Self>, job: &JobHandle<E, T>) {
        let unchanged = self
            .state()
            .jobs
            .get(job.entity_id())
            .is_some_and(|state| {
                state.is_current(job.job_id(), job.attempt())
                    && state.requeue_count == job.requeue_count()
            });
        if unchanged {
            warn!(
                "{} queue: exception handler left job for {} unsettled, rejecting",
                self.name,
                job.entity_id()
            );
            job.reject(JobError::Timeout);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
