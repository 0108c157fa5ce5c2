//! Job scheduling type definitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

/// Something the queue can run jobs against (a browser tab in practice).
///
/// The id is the deduplication and ordering key: at most one job exists per id.
pub trait QueueEntity: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    fn entity_id(&self) -> Self::Id;
}

/// Values a job can resolve with
pub trait JobValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> JobValue for T {}

/// Queue status of a tracked job
///
/// There is no terminal status: settlement removes the job entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for a free concurrency slot
    Queued,
    /// Executor (or exception handler) is running in a concurrency slot
    InProgress,
    /// Waiting for a sleep timer before becoming `Queued` again
    Sleeping,
    /// Timed out while waiting; the exception handler runs without a slot
    TimedOut,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Sleeping => write!(f, "sleeping"),
            JobStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Why the exception handler is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionReason {
    /// The job timeout elapsed before the job was settled
    Timeout,
}

impl fmt::Display for ExceptionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Where a requeued job goes in the pending order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeuePolicy {
    /// Keep the original enqueue position (strict FIFO, can starve later jobs)
    #[default]
    KeepPosition,
    /// Move the job behind every other tracked job
    MoveToBack,
}

/// Open string-keyed properties attached to a job.
///
/// Repeated enqueues and requeues merge into the existing mapping key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionProps(Map<String, Value>);

impl ExecutionProps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Overwrite keys present in `other`, keep everything else
    pub fn merge(&mut self, other: ExecutionProps) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ExecutionProps {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Validated scheduler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of jobs in `InProgress` at once
    pub concurrency_limit: usize,
    /// Cumulative budget from a job's first promotion until the exception handler fires
    pub job_timeout: Duration,
    /// Delay before the next processing pass after a job settles
    pub processing_delay: Duration,
    /// Debounce interval coalescing bursts of processing requests
    pub processing_buffer: Duration,
    /// Sleep used by `requeue` when the executor gives no delay
    pub default_requeue_delay: Duration,
    pub requeue_policy: RequeuePolicy,
}

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 1;
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_PROCESSING_BUFFER: Duration = Duration::from_millis(50);
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            processing_delay: DEFAULT_PROCESSING_DELAY,
            processing_buffer: DEFAULT_PROCESSING_BUFFER,
            default_requeue_delay: DEFAULT_REQUEUE_DELAY,
            requeue_policy: RequeuePolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<(), JobError> {
        if self.concurrency_limit == 0 {
            return Err(JobError::configuration(
                "concurrency_limit must be at least 1",
            ));
        }
        if self.job_timeout < Duration::from_millis(1) {
            return Err(JobError::configuration("job_timeout must be at least 1ms"));
        }
        if self.processing_buffer.is_zero() {
            return Err(JobError::configuration(
                "processing_buffer must be greater than zero",
            ));
        }
        if self.default_requeue_delay.is_zero() {
            return Err(JobError::configuration(
                "default_requeue_delay must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Errors that settle a job or reject a configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Exception handler rejected after the job timeout elapsed
    #[error("Job timed out")]
    Timeout,

    /// Executor rejected explicitly, returned an error, or panicked
    #[error("Executor failed: {message}")]
    ExecutorFailure { message: String },

    /// `unqueue` was called for the job
    #[error("Job cancelled externally")]
    CancelledExternally,

    /// Invalid scheduler parameters
    #[error("Invalid queue configuration: {reason}")]
    Configuration { reason: String },

    /// The queue was shut down while the job was tracked
    #[error("Job queue shut down")]
    Shutdown,

    /// The queue was dropped without settling the job
    #[error("Job queue dropped before the job settled")]
    SchedulerDropped,
}

impl JobError {
    pub fn executor<S: Into<String>>(message: S) -> Self {
        Self::ExecutorFailure {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(reason: S) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_props_merge_overwrites_keys() {
        let mut props = ExecutionProps::new()
            .with("force_level", 3)
            .with("refetch", false);

        props.merge(ExecutionProps::new().with("refetch", true).with("quality", 0.8));

        assert_eq!(props.len(), 3);
        assert_eq!(props.get_u64("force_level"), Some(3));
        assert_eq!(props.get_bool("refetch"), Some(true));
        assert_eq!(props.get("quality"), Some(&json!(0.8)));
    }

    #[test]
    fn test_queue_config_validation() {
        assert!(QueueConfig::default().validate().is_ok());

        let zero_limit = QueueConfig {
            concurrency_limit: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(
            zero_limit.validate(),
            Err(JobError::Configuration { .. })
        ));

        let zero_timeout = QueueConfig {
            job_timeout: Duration::ZERO,
            ..QueueConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let zero_buffer = QueueConfig {
            processing_buffer: Duration::ZERO,
            ..QueueConfig::default()
        };
        assert!(zero_buffer.validate().is_err());

        // A zero processing delay is allowed
        let zero_delay = QueueConfig {
            processing_delay: Duration::ZERO,
            ..QueueConfig::default()
        };
        assert!(zero_delay.validate().is_ok());
    }

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!(JobStatus::InProgress.to_string(), "in_progress");
        assert_eq!(JobStatus::Sleeping.to_string(), "sleeping");
        assert_eq!(JobStatus::TimedOut.to_string(), "timed_out");
    }
}
