//! Worker pool for processing jobs from the Redis queue.
//!
//! Each worker runs as an independent async task. A loop iteration promotes
//! due retries, dequeues one job and runs it through the pool's
//! [`JobExecutor`] under a per-job timeout. The executor may size that
//! timeout to the job; otherwise the pool's `job_timeout` applies.
//!
//! # Outcomes
//!
//! - success: the executor's JSON output is stored as the job result
//! - error with attempts left: the job waits out `retry_delay` in the
//!   delayed set
//! - error on the last attempt: the job is dead-lettered and a failure
//!   result is stored
//! - timeout: a timeout result is stored

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobResult};
use super::queue::{JobQueue, QueueError, DEFAULT_RESULT_TTL};
use crate::error::TaskError;

/// Runs the task carried by a job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Executes `job`, returning the JSON payload stored as its result.
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, TaskError>;

    /// Wall-clock budget for `job`. `None` falls back to the pool's
    /// `job_timeout`.
    fn time_budget(&self, _job: &Job) -> Option<Duration> {
        None
    }
}

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to connect to the job queue.
    #[error("Queue connection failed: {0}")]
    QueueConnection(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Redis connection URL.
    pub redis_url: String,
    /// Name of the job queue.
    pub queue_name: String,
    /// How long a dequeue blocks when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum time allowed for processing a single job.
    pub job_timeout: Duration,
    /// Wait before a failed job is retried.
    pub retry_delay: Duration,
    /// Lifetime of stored job results.
    pub result_ttl: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            redis_url: "redis://localhost:6379".to_string(),
            queue_name: "reddit_harvest".to_string(),
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(300),
            result_ttl: DEFAULT_RESULT_TTL,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Total number of jobs completed successfully.
    pub jobs_completed: u64,
    /// Total number of attempts that failed or timed out.
    pub jobs_failed: u64,
    /// Failed attempts that were scheduled for retry.
    pub jobs_retried: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_retry(&self) {
        self.jobs_retried.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_retried: self.jobs_retried.load(Ordering::SeqCst),
            average_job_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers processing jobs from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool, connecting its own queue handle.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if queue connection fails.
    pub async fn new(
        config: WorkerPoolConfig,
        executor: Arc<dyn JobExecutor>,
    ) -> Result<Self, PoolError> {
        let queue = JobQueue::connect(&config.redis_url, &config.queue_name)
            .await?
            .with_result_ttl(config.result_ttl);
        Ok(Self::with_queue(config, Arc::new(queue), executor))
    }

    /// Creates a worker pool with an existing queue connection.
    ///
    /// Used when the executor also enqueues follow-up jobs on the same queue.
    pub fn with_queue(
        config: WorkerPoolConfig,
        queue: Arc<JobQueue>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        // only ever sent once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            executor,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Recovers stranded jobs and spawns the workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.queue.recover_processing_jobs().await {
            Ok(recovered) => {
                if recovered > 0 {
                    info!(
                        recovered = recovered,
                        "Recovered jobs from processing queue"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to recover processing jobs");
            }
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                executor: Arc::clone(&self.executor),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                job_timeout: self.config.job_timeout,
                retry_delay: self.config.retry_delay,
                stats: Arc::clone(&self.stats),
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, queue = %self.queue.queue_name(), "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers, letting each finish its current
    /// job.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // workers may already have stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

/// What happened to one execution attempt.
#[derive(Debug)]
enum Attempt {
    Succeeded(serde_json::Value),
    Failed(TaskError),
    TimedOut(Duration),
}

async fn run_attempt(executor: &dyn JobExecutor, job: &Job, fallback: Duration) -> Attempt {
    let budget = executor.time_budget(job).unwrap_or(fallback);
    match tokio::time::timeout(budget, executor.execute(job)).await {
        Ok(Ok(output)) => Attempt::Succeeded(output),
        Ok(Err(e)) => Attempt::Failed(e),
        Err(_) => Attempt::TimedOut(budget),
    }
}

/// A single worker that processes jobs from the queue.
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    retry_delay: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Polls and processes jobs until a shutdown signal is received.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            if let Err(e) = self.queue.promote_due_jobs().await {
                warn!(worker_id = %self.id, error = %e, "Failed to promote delayed jobs");
            }

            match self.queue.dequeue(self.poll_interval).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No jobs available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_job(&self, mut job: Job) {
        let job_id = job.id;
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            task = job.task_spec.name(),
            attempt = job.attempts + 1,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        self.stats.increment_active();
        job.increment_attempts();
        let attempt = self.execute_with_timeout(&job).await;
        let duration = start_time.elapsed();
        self.stats.decrement_active();
        let duration_ms = duration.as_millis() as u64;

        match attempt {
            Attempt::Succeeded(output) => {
                self.stats.record_completion(duration);
                let result = JobResult::success(job_id, &self.id, output, duration_ms);
                if let Err(e) = self.queue.complete(job_id, result).await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to mark job complete");
                }
                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    duration_ms = duration_ms,
                    "Job completed successfully"
                );
            }
            Attempt::TimedOut(budget) => {
                self.stats.record_failure(duration);
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    timeout_secs = budget.as_secs(),
                    "Job timed out"
                );
                let result = JobResult::timeout(job_id, &self.id, duration_ms);
                if let Err(e) = self.queue.complete(job_id, result).await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to store timeout result");
                }
            }
            Attempt::Failed(e) => {
                self.stats.record_failure(duration);
                self.handle_failure(job, e, duration_ms).await;
            }
        }
    }

    async fn handle_failure(&self, job: Job, err: TaskError, duration_ms: u64) {
        let job_id = job.id;
        if job.should_retry() {
            self.stats.record_retry();
            warn!(
                worker_id = %self.id,
                job_id = %job_id,
                error = %err,
                remaining_attempts = job.remaining_attempts(),
                retry_in_secs = self.retry_delay.as_secs(),
                "Job failed, scheduling retry"
            );
            if let Err(e) = self.queue.schedule_retry(job, self.retry_delay).await {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to schedule retry");
            }
            return;
        }

        error!(
            worker_id = %self.id,
            job_id = %job_id,
            error = %err,
            "Job failed, moving to dead letter queue"
        );
        let message = err.to_string();
        if let Err(e) = self.queue.dead_letter(job, &message).await {
            error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to move job to dead letter queue");
        }
        let result = JobResult::failure(job_id, &self.id, message, duration_ms);
        if let Err(e) = self.queue.store_result(&result).await {
            error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to store failure result");
        }
    }

    async fn execute_with_timeout(&self, job: &Job) -> Attempt {
        run_attempt(self.executor.as_ref(), job, self.job_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskSpec;

    struct Echo;

    #[async_trait]
    impl JobExecutor for Echo {
        async fn execute(&self, job: &Job) -> Result<serde_json::Value, TaskError> {
            match job.task_spec {
                TaskSpec::Ping => Ok(serde_json::json!({"status": "ok"})),
                _ => Err(TaskError::UploadFailed),
            }
        }
    }

    struct Sleepy;

    #[async_trait]
    impl JobExecutor for Sleepy {
        async fn execute(&self, _job: &Job) -> Result<serde_json::Value, TaskError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert_eq!(config.num_workers, 2);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.queue_name, "reddit_harvest");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_delay, Duration::from_secs(300));
        assert_eq!(config.result_ttl, Duration::from_secs(3600));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(8)
            .with_redis_url("redis://custom:6380")
            .with_queue_name("my_queue")
            .with_poll_interval(Duration::from_secs(5))
            .with_job_timeout(Duration::from_secs(3600))
            .with_retry_delay(Duration::from_secs(10))
            .with_result_ttl(Duration::from_secs(60))
            .with_shutdown_timeout(Duration::from_secs(120));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.redis_url, "redis://custom:6380");
        assert_eq!(config.queue_name, "my_queue");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.retry_delay, Duration::from_secs(10));
        assert_eq!(config.result_ttl, Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();

        stats.record_completion(Duration::from_secs(10));
        stats.record_completion(Duration::from_secs(20));
        stats.record_failure(Duration::from_secs(5));
        stats.record_retry();

        let pool_stats = stats.to_pool_stats(4);

        assert_eq!(pool_stats.num_workers, 4);
        assert_eq!(pool_stats.jobs_completed, 2);
        assert_eq!(pool_stats.jobs_failed, 1);
        assert_eq!(pool_stats.jobs_retried, 1);
        // (10000 + 20000 + 5000) / 3 = 11666 ms
        assert!(pool_stats.average_job_duration.as_millis() > 11000);
        assert!(pool_stats.average_job_duration.as_millis() < 12000);
    }

    #[test]
    fn test_success_rate() {
        let stats = PoolStats {
            jobs_completed: 9,
            jobs_failed: 3,
            ..PoolStats::default()
        };
        assert_eq!(stats.total_processed(), 12);
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(PoolStats::default().success_rate(), 0.0);
    }

    /// Fails until it has been called `failures` times.
    struct Flaky {
        failures: u32,
        calls: AtomicU64,
    }

    #[async_trait]
    impl JobExecutor for Flaky {
        async fn execute(&self, _job: &Job) -> Result<serde_json::Value, TaskError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
            if call < self.failures {
                Err(TaskError::DatabaseUnavailable)
            } else {
                Ok(serde_json::json!({"status": "success"}))
            }
        }
    }

    #[tokio::test]
    async fn test_catalog_retry_budget_covers_transient_failures() {
        let policy = crate::config::TaskConfig::default();
        let executor = Flaky {
            failures: policy.max_retries,
            calls: AtomicU64::new(0),
        };
        let mut job = Job::for_task(TaskSpec::ManualFromConfig, &policy);

        loop {
            job.increment_attempts();
            match run_attempt(&executor, &job, Duration::from_secs(1)).await {
                Attempt::Succeeded(_) => break,
                Attempt::Failed(_) => assert!(job.should_retry(), "ran out at {}", job.attempts),
                Attempt::TimedOut(_) => panic!("unexpected timeout"),
            }
        }
        assert_eq!(job.attempts, policy.max_retries + 1);
        assert_eq!(job.remaining_attempts(), 0);
    }

    #[tokio::test]
    async fn test_executor_outcomes() {
        let ping = Job::new(TaskSpec::Ping);
        assert!(matches!(
            run_attempt(&Echo, &ping, Duration::from_secs(1)).await,
            Attempt::Succeeded(_)
        ));

        let legacy = Job::new(TaskSpec::ScrapeAndUpload);
        assert!(matches!(
            run_attempt(&Echo, &legacy, Duration::from_secs(1)).await,
            Attempt::Failed(TaskError::UploadFailed)
        ));
    }

    #[tokio::test]
    async fn test_slow_executor_times_out() {
        let job = Job::new(TaskSpec::Ping);
        assert!(matches!(
            run_attempt(&Sleepy, &job, Duration::from_millis(20)).await,
            Attempt::TimedOut(d) if d == Duration::from_millis(20)
        ));
    }

    /// Sleeps 100 ms but asks for a budget longer than that.
    struct Budgeted;

    #[async_trait]
    impl JobExecutor for Budgeted {
        async fn execute(&self, _job: &Job) -> Result<serde_json::Value, TaskError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(serde_json::json!({"status": "success"}))
        }

        fn time_budget(&self, _job: &Job) -> Option<Duration> {
            Some(Duration::from_secs(5))
        }
    }

    #[tokio::test]
    async fn test_executor_budget_overrides_pool_timeout() {
        let job = Job::new(TaskSpec::ManualFromConfig);
        assert!(matches!(
            run_attempt(&Budgeted, &job, Duration::from_millis(20)).await,
            Attempt::Succeeded(_)
        ));
    }
}
