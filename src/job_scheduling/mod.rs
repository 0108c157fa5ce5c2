//! Job scheduling subsystem for tab-suspender
//!
//! Every slow, unreliable operation performed against a tab (suspending,
//! responsiveness checks, discarding) runs through its own `TabJobQueue`:
//! - At most one job per tab; repeated requests merge into the tracked job
//! - A fixed number of concurrency slots, filled in enqueue order
//! - A cumulative timeout per job that hands the job to an exception handler
//! - Executor-driven requeue ("sleep and retry") that keeps the timeout budget
//!
//! The components are:
//! - `TabJobQueue`: the scheduler and its debounced processing loop
//! - `JobHandler` / `JobHandle`: the executor contract used by call-sites
//! - `JobOutcome`: the shared result every caller for a tab awaits
//! - `PendingCompletions`: registry for handles settled by later notifications
//! - `TabJobsApi`: facade over the three tab services

pub mod api;
pub mod completions;
pub mod handler;
mod job_queue;
mod job_state;
pub mod outcome;
pub mod types;

pub use api::{TabJobsApi, TabJobsHealthStatus};
pub use completions::PendingCompletions;
pub use handler::{JobHandle, JobHandler};
pub use job_queue::{QueueStats, TabJobQueue};
pub use job_state::JobStateSnapshot;
pub use outcome::JobOutcome;
pub use types::*;
