use async_trait::async_trait;
use rstest::rstest;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tab_suspender::job_scheduling::{
    ExceptionReason, ExecutionProps, JobError, JobHandle, JobHandler, JobStatus, QueueConfig,
    QueueEntity, RequeuePolicy, TabJobQueue,
};
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, PartialEq)]
struct Item(u32);

impl QueueEntity for Item {
    type Id = u32;

    fn entity_id(&self) -> u32 {
        self.0
    }
}

/// Start order and peak parallelism of executor attempts
#[derive(Default)]
struct Recorder {
    started: Mutex<Vec<u32>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Recorder {
    fn start(&self, id: u32) {
        self.started.lock().unwrap().push(id);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    fn started(&self) -> Vec<u32> {
        self.started.lock().unwrap().clone()
    }
}

/// Works for a fixed time, then resolves with `value`
struct Worker {
    work: Duration,
    value: bool,
    /// Value the exception handler resolves with; `None` rejects
    on_timeout: Option<bool>,
    recorder: Arc<Recorder>,
    late_resolves: AtomicUsize,
}

impl Worker {
    fn new(work: Duration, value: bool) -> Self {
        Self {
            work,
            value,
            on_timeout: None,
            recorder: Arc::new(Recorder::default()),
            late_resolves: AtomicUsize::new(0),
        }
    }

    fn on_timeout(mut self, value: bool) -> Self {
        self.on_timeout = Some(value);
        self
    }
}

#[async_trait]
impl JobHandler<Item, bool> for Worker {
    async fn execute(&self, job: JobHandle<Item, bool>) -> anyhow::Result<()> {
        self.recorder.start(job.entity().0);
        sleep(self.work).await;
        self.recorder.finish();
        if !job.resolve(self.value) {
            self.late_resolves.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn handle_exception(
        &self,
        job: JobHandle<Item, bool>,
        _reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        match self.on_timeout {
            Some(value) => job.resolve(value),
            None => job.reject(JobError::Timeout),
        };
        Ok(())
    }
}

fn config(concurrency_limit: usize, job_timeout: Duration) -> QueueConfig {
    QueueConfig {
        concurrency_limit,
        job_timeout,
        processing_delay: Duration::ZERO,
        processing_buffer: Duration::from_millis(10),
        ..QueueConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_serial_jobs_resolve_in_sequence() {
    let handler = Arc::new(Worker::new(Duration::from_millis(100), true));
    let queue = TabJobQueue::new("test", config(1, Duration::from_secs(1)), handler.clone())
        .unwrap();

    let started = Instant::now();
    let outcomes: Vec<_> = (1..=5)
        .map(|id| queue.enqueue(Item(id), ExecutionProps::new(), None))
        .collect();
    let results = futures::future::join_all(outcomes).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|result| *result == Ok(true)));
    assert!(
        elapsed >= Duration::from_millis(500) && elapsed <= Duration::from_millis(600),
        "elapsed {elapsed:?}"
    );
    assert_eq!(handler.recorder.started(), vec![1, 2, 3, 4, 5]);
    assert_eq!(queue.queue_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_result_wins_over_late_executor() {
    let handler = Arc::new(Worker::new(Duration::from_millis(100), true).on_timeout(false));
    let queue = TabJobQueue::new("test", config(1, Duration::from_millis(10)), handler.clone())
        .unwrap();

    let outcome = queue.enqueue(Item(1), ExecutionProps::new(), None);
    assert_eq!(outcome.await, Ok(false));

    // Let the executor finish; its resolve must be ignored
    sleep(Duration::from_millis(200)).await;
    assert_eq!(handler.late_resolves.load(Ordering::SeqCst), 1);
    assert!(queue.query_job_state(&1).is_none());
}

/// Requeues every attempt; settles only through the exception handler
struct AlwaysRequeue {
    delay: Duration,
    executions: AtomicUsize,
    requeues_at_timeout: AtomicU32,
}

#[async_trait]
impl JobHandler<Item, bool> for AlwaysRequeue {
    async fn execute(&self, job: JobHandle<Item, bool>) -> anyhow::Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        job.requeue(Some(self.delay), None);
        Ok(())
    }

    async fn handle_exception(
        &self,
        job: JobHandle<Item, bool>,
        _reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        self.requeues_at_timeout
            .store(job.requeue_count(), Ordering::SeqCst);
        job.resolve(false);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_requeue_keeps_cumulative_timeout() {
    let handler = Arc::new(AlwaysRequeue {
        delay: Duration::from_millis(100),
        executions: AtomicUsize::new(0),
        requeues_at_timeout: AtomicU32::new(0),
    });
    let job_timeout = Duration::from_millis(350);
    let buffer = Duration::from_millis(10);
    let queue = TabJobQueue::new("test", config(1, job_timeout), handler.clone()).unwrap();

    let started = Instant::now();
    let result = queue.enqueue(Item(1), ExecutionProps::new(), None).await;
    let elapsed = started.elapsed();

    assert_eq!(result, Ok(false));
    // First promotion happens one buffer after enqueue
    assert!(elapsed >= buffer + Duration::from_millis(100), "elapsed {elapsed:?}");
    assert!(elapsed <= buffer + job_timeout, "elapsed {elapsed:?}");
    assert!(handler.executions.load(Ordering::SeqCst) >= 2);
    assert!(handler.requeues_at_timeout.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_never_exceeded() {
    let handler = Arc::new(Worker::new(Duration::from_millis(50), true));
    let queue = TabJobQueue::new("test", config(2, Duration::from_secs(1)), handler.clone())
        .unwrap();

    let outcomes: Vec<_> = (1..=6)
        .map(|id| queue.enqueue(Item(id), ExecutionProps::new(), None))
        .collect();

    sleep(Duration::from_millis(30)).await;
    let stats = queue.stats();
    assert_eq!(stats.in_progress, 2);
    assert_eq!(stats.queued, 4);

    let results = futures::future::join_all(outcomes).await;
    assert!(results.iter().all(|result| *result == Ok(true)));
    assert_eq!(handler.recorder.max_running.load(Ordering::SeqCst), 2);
}

/// Job 1 requeues forever, job 2 works past the timeout; both settle on timeout
struct SleeperAndWorker {
    requeue_delay: Duration,
    work: Duration,
    handler_work: Duration,
    first_executions: AtomicUsize,
}

#[async_trait]
impl JobHandler<Item, bool> for SleeperAndWorker {
    async fn execute(&self, job: JobHandle<Item, bool>) -> anyhow::Result<()> {
        if job.entity().0 == 1 {
            self.first_executions.fetch_add(1, Ordering::SeqCst);
            job.requeue(Some(self.requeue_delay), None);
        } else {
            sleep(self.work).await;
            job.resolve(true);
        }
        Ok(())
    }

    async fn handle_exception(
        &self,
        job: JobHandle<Item, bool>,
        _reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        sleep(self.handler_work).await;
        job.resolve(false);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_of_sleeping_job_does_not_take_a_slot() {
    let handler = Arc::new(SleeperAndWorker {
        requeue_delay: Duration::from_millis(500),
        work: Duration::from_secs(1),
        handler_work: Duration::from_millis(50),
        first_executions: AtomicUsize::new(0),
    });
    let queue = TabJobQueue::new("test", config(1, Duration::from_millis(200)), handler.clone())
        .unwrap();

    let sleeper = queue.enqueue(Item(1), ExecutionProps::new(), None);
    let worker = queue.enqueue(Item(2), ExecutionProps::new(), None);

    let mut saw_timed_out = false;
    for _ in 0..120 {
        sleep(Duration::from_millis(5)).await;
        let stats = queue.stats();
        assert!(stats.in_progress <= 1, "limit exceeded: {stats:?}");
        if stats.timed_out > 0 {
            saw_timed_out = true;
            assert_eq!(
                queue.query_job_state(&1).map(|job| job.status),
                Some(JobStatus::TimedOut)
            );
        }
    }

    assert!(saw_timed_out);
    assert_eq!(sleeper.await, Ok(false));
    assert_eq!(worker.await, Ok(false));
    // The sleep was cancelled by the timeout; no second executor attempt
    assert_eq!(handler.first_executions.load(Ordering::SeqCst), 1);
    assert_eq!(queue.queue_size(), 0);
}

/// Keeps every handle; requeues the first attempt and leaves later ones pending
#[derive(Default)]
struct Hoarder {
    handles: Mutex<Vec<JobHandle<Item, bool>>>,
}

#[async_trait]
impl JobHandler<Item, bool> for Hoarder {
    async fn execute(&self, job: JobHandle<Item, bool>) -> anyhow::Result<()> {
        self.handles.lock().unwrap().push(job.clone());
        if job.requeue_count() == 0 {
            job.requeue(Some(Duration::from_millis(50)), None);
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_handle_cannot_requeue() {
    let handler = Arc::new(Hoarder::default());
    let queue = TabJobQueue::new("test", config(1, Duration::from_secs(1)), handler.clone())
        .unwrap();
    let outcome = queue.enqueue(Item(1), ExecutionProps::new(), None);

    sleep(Duration::from_millis(20)).await;
    let first = handler.handles.lock().unwrap()[0].clone();
    assert_eq!(first.attempt(), 1);
    // Already requeued once from this attempt
    assert!(!first.requeue(Some(Duration::from_secs(5)), None));
    assert_eq!(queue.query_job_state(&1).unwrap().requeue_count, 1);

    sleep(Duration::from_millis(80)).await;
    let second = handler.handles.lock().unwrap()[1].clone();
    assert_eq!(second.attempt(), 2);
    assert_eq!(
        queue.query_job_state(&1).map(|job| job.status),
        Some(JobStatus::InProgress)
    );
    assert!(!first.requeue(None, None));
    assert!(!first.update_entity(Item(1)));
    assert_eq!(queue.query_job_state(&1).unwrap().requeue_count, 1);

    // Settling still works from a stashed handle
    assert!(first.resolve(true));
    assert_eq!(outcome.await, Ok(true));
    assert!(!second.resolve(false));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_exception_handler_is_reported_overdue() {
    let handler = Arc::new(SleeperAndWorker {
        requeue_delay: Duration::from_millis(500),
        work: Duration::from_secs(5),
        handler_work: Duration::from_secs(1),
        first_executions: AtomicUsize::new(0),
    });
    let queue = TabJobQueue::new("test", config(1, Duration::from_millis(100)), handler).unwrap();
    let outcome = queue.enqueue(Item(2), ExecutionProps::new(), None);

    // Timeout fires at ~110ms; overdue once another timeout has passed
    sleep(Duration::from_millis(150)).await;
    let stats = queue.stats();
    assert_eq!(stats.in_progress, 1);
    assert_eq!(stats.overdue, 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.stats().overdue, 1);

    assert_eq!(outcome.await, Ok(false));
    assert_eq!(queue.stats().overdue, 0);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_enqueue_shares_one_execution() {
    let handler = Arc::new(Worker::new(Duration::from_millis(20), true));
    let queue = TabJobQueue::new("test", config(3, Duration::from_secs(1)), handler.clone())
        .unwrap();

    let first = queue.enqueue(Item(7), ExecutionProps::new().with("force_level", 3), None);
    let second = queue.enqueue(Item(7), ExecutionProps::new().with("force_level", 1), None);
    assert_eq!(first.job_id(), second.job_id());
    assert_eq!(
        queue.query_job_state(&7).unwrap().props.get_u64("force_level"),
        Some(1)
    );

    let (a, b) = tokio::join!(first, second);
    assert_eq!(a, Ok(true));
    assert_eq!(b, Ok(true));
    assert_eq!(handler.recorder.started(), vec![7]);
}

#[tokio::test(start_paused = true)]
async fn test_unqueue_is_idempotent() {
    let queue = TabJobQueue::new(
        "test",
        config(1, Duration::from_secs(1)),
        Arc::new(Worker::new(Duration::from_millis(10), true)),
    )
    .unwrap();

    assert!(!queue.unqueue(&1));
    assert_eq!(queue.queue_size(), 0);

    let cancelled = queue.enqueue(Item(1), ExecutionProps::new(), Some(Duration::from_secs(5)));
    let kept = queue.enqueue(Item(2), ExecutionProps::new(), Some(Duration::from_secs(5)));
    assert_eq!(queue.queue_size(), 2);

    assert!(queue.unqueue(&1));
    assert_eq!(queue.queue_size(), 1);
    assert_eq!(cancelled.await, Err(JobError::CancelledExternally));

    assert!(!queue.unqueue(&1));
    assert_eq!(queue.queue_size(), 1);
    assert!(kept.peek().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unqueue_running_job_ignores_its_late_result() {
    let handler = Arc::new(Worker::new(Duration::from_millis(100), true));
    let queue = TabJobQueue::new("test", config(1, Duration::from_secs(1)), handler.clone())
        .unwrap();

    let outcome = queue.enqueue(Item(1), ExecutionProps::new(), None);
    sleep(Duration::from_millis(20)).await;
    assert_eq!(
        queue.query_job_state(&1).map(|job| job.status),
        Some(JobStatus::InProgress)
    );

    assert!(queue.unqueue(&1));
    assert_eq!(outcome.await, Err(JobError::CancelledExternally));

    sleep(Duration::from_millis(200)).await;
    assert_eq!(handler.late_resolves.load(Ordering::SeqCst), 1);
}

/// Requeues `target` once on its first attempt, everything else works normally
struct RequeueFirst {
    target: u32,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl JobHandler<Item, bool> for RequeueFirst {
    async fn execute(&self, job: JobHandle<Item, bool>) -> anyhow::Result<()> {
        let id = job.entity().0;
        self.recorder.start(id);
        if id == self.target && job.requeue_count() == 0 {
            self.recorder.finish();
            job.requeue(Some(Duration::from_millis(5)), None);
            return Ok(());
        }
        sleep(Duration::from_millis(20)).await;
        self.recorder.finish();
        job.resolve(true);
        Ok(())
    }
}

#[rstest]
#[case::keep_position(RequeuePolicy::KeepPosition, vec![1, 1, 2, 3])]
#[case::move_to_back(RequeuePolicy::MoveToBack, vec![1, 2, 3, 1])]
#[tokio::test(start_paused = true)]
async fn test_requeue_policy_controls_order(
    #[case] policy: RequeuePolicy,
    #[case] expected: Vec<u32>,
) {
    let recorder = Arc::new(Recorder::default());
    let handler = Arc::new(RequeueFirst {
        target: 1,
        recorder: recorder.clone(),
    });
    let queue_config = QueueConfig {
        requeue_policy: policy,
        ..config(1, Duration::from_secs(1))
    };
    let queue = TabJobQueue::new("test", queue_config, handler).unwrap();

    let outcomes: Vec<_> = (1..=3)
        .map(|id| queue.enqueue(Item(id), ExecutionProps::new(), None))
        .collect();
    let results = futures::future::join_all(outcomes).await;

    assert!(results.iter().all(|result| *result == Ok(true)));
    assert_eq!(recorder.started(), expected);
}

/// Fails in different ways depending on the entity
struct Faulty;

#[async_trait]
impl JobHandler<Item, bool> for Faulty {
    async fn execute(&self, job: JobHandle<Item, bool>) -> anyhow::Result<()> {
        match job.entity().0 {
            1 => anyhow::bail!("content script crashed"),
            2 => panic!("executor bug"),
            3 => {
                job.reject(JobError::executor("refused"));
            }
            _ => {
                job.resolve(true);
            }
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_executor_failures_become_rejections() {
    let queue = TabJobQueue::new("test", config(1, Duration::from_secs(1)), Arc::new(Faulty))
        .unwrap();

    let errored = queue.enqueue(Item(1), ExecutionProps::new(), None);
    let panicked = queue.enqueue(Item(2), ExecutionProps::new(), None);
    let rejected = queue.enqueue(Item(3), ExecutionProps::new(), None);
    let healthy = queue.enqueue(Item(4), ExecutionProps::new(), None);

    assert_eq!(
        errored.await,
        Err(JobError::executor("content script crashed"))
    );
    assert_eq!(panicked.await, Err(JobError::executor("executor bug")));
    assert_eq!(rejected.await, Err(JobError::executor("refused")));
    assert_eq!(healthy.await, Ok(true));
    assert_eq!(queue.queue_size(), 0);
}

/// Never settles, not even from the exception handler
struct Stubborn;

#[async_trait]
impl JobHandler<Item, bool> for Stubborn {
    async fn execute(&self, _job: JobHandle<Item, bool>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_exception(
        &self,
        _job: JobHandle<Item, bool>,
        _reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_unsettled_exception_handler_rejects_with_timeout() {
    let queue =
        TabJobQueue::new("test", config(1, Duration::from_millis(50)), Arc::new(Stubborn)).unwrap();

    let outcome = queue.enqueue(Item(1), ExecutionProps::new(), None);
    assert_eq!(outcome.await, Err(JobError::Timeout));
    assert_eq!(queue.queue_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_default_exception_handler_rejects_with_timeout() {
    struct Silent;

    #[async_trait]
    impl JobHandler<Item, bool> for Silent {
        async fn execute(&self, _job: JobHandle<Item, bool>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let queue =
        TabJobQueue::new("test", config(1, Duration::from_millis(50)), Arc::new(Silent)).unwrap();

    let started = Instant::now();
    let outcome = queue.enqueue(Item(1), ExecutionProps::new(), None);
    assert_eq!(outcome.await, Err(JobError::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_widening_concurrency_starts_waiting_jobs() {
    let handler = Arc::new(Worker::new(Duration::from_millis(100), true));
    let queue = TabJobQueue::new("test", config(1, Duration::from_secs(1)), handler.clone())
        .unwrap();

    let started = Instant::now();
    let outcomes: Vec<_> = (1..=4)
        .map(|id| queue.enqueue(Item(id), ExecutionProps::new(), None))
        .collect();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.stats().in_progress, 1);

    queue.configure(config(4, Duration::from_secs(1))).unwrap();
    let results = futures::future::join_all(outcomes).await;

    assert!(results.iter().all(|result| *result == Ok(true)));
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(handler.recorder.max_running.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_processing_delay_spaces_out_jobs() {
    let handler = Arc::new(Worker::new(Duration::from_millis(10), true));
    let queue_config = QueueConfig {
        processing_delay: Duration::from_millis(200),
        ..config(1, Duration::from_secs(1))
    };
    let queue = TabJobQueue::new("test", queue_config, handler).unwrap();

    let started = Instant::now();
    let first = queue.enqueue(Item(1), ExecutionProps::new(), None);
    let second = queue.enqueue(Item(2), ExecutionProps::new(), None);

    assert_eq!(first.await, Ok(true));
    let first_done = started.elapsed();
    assert_eq!(second.await, Ok(true));

    assert!(started.elapsed() >= first_done + Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_query_job_state_reports_progress() {
    let handler = Arc::new(Worker::new(Duration::from_millis(100), true));
    let queue = TabJobQueue::new("test", config(1, Duration::from_secs(1)), handler).unwrap();

    queue.enqueue(Item(1), ExecutionProps::new(), None);
    queue.enqueue(Item(2), ExecutionProps::new(), None);
    let snapshot = queue.query_job_state(&2).unwrap();
    assert_eq!(snapshot.status, JobStatus::Queued);
    assert!(snapshot.started_at.is_none());

    sleep(Duration::from_millis(20)).await;
    let running = queue.query_job_state(&1).unwrap();
    assert_eq!(running.status, JobStatus::InProgress);
    assert!(running.started_at.is_some());
    assert_eq!(queue.pending_ids(), vec![1, 2]);
}
