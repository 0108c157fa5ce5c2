//! Shared deferred result of a job

use super::types::{JobError, JobValue};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

pub(crate) type OutcomeSender<T> = oneshot::Sender<Result<T, JobError>>;

/// Awaitable outcome of one job.
///
/// Every `enqueue` for the same entity before settlement returns a clone of
/// the same outcome, so all callers observe one settlement.
pub struct JobOutcome<T> {
    job_id: Uuid,
    inner: Shared<BoxFuture<'static, Result<T, JobError>>>,
}

impl<T> JobOutcome<T>
where
    T: JobValue,
{
    pub(crate) fn channel(job_id: Uuid) -> (OutcomeSender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let inner = rx
            .map(|received| received.unwrap_or(Err(JobError::SchedulerDropped)))
            .boxed()
            .shared();
        (tx, Self { job_id, inner })
    }

    /// Identity of the job this outcome belongs to
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Settled value, if the job has already finished
    pub fn peek(&self) -> Option<Result<T, JobError>> {
        self.inner.peek().cloned()
    }
}

impl<T> Clone for JobOutcome<T> {
    fn clone(&self) -> Self {
        Self {
            job_id: self.job_id,
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for JobOutcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOutcome")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl<T> Future for JobOutcome<T>
where
    T: JobValue,
{
    type Output = Result<T, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}
