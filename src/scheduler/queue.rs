//! Redis-based job queue with reliable dequeue and delayed retries.
//!
//! # Queue Structure
//!
//! - `{queue_name}`: main list where jobs are enqueued
//! - `{queue_name}:processing`: jobs being processed (for crash recovery)
//! - `{queue_name}:dead_letter`: jobs that failed after max attempts
//! - `{queue_name}:delayed`: sorted set of jobs waiting out a retry delay,
//!   scored by the epoch millisecond they become due
//! - `{queue_name}:results:{job_id}`: job results, expiring after the
//!   configured TTL
//!
//! # Reliability
//!
//! Jobs are atomically moved from the main queue to the processing queue when
//! dequeued. If a worker crashes, jobs in the processing queue can be recovered
//! and requeued. Due retries are promoted by a Lua script so two workers never
//! move the same job.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::job::{Job, JobResult};

/// Default lifetime of a stored job result.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(3600);

/// Most jobs moved by a single promotion pass.
const PROMOTE_BATCH: usize = 100;

/// Moves due members of the delayed set (KEYS[1]) onto the main queue
/// (KEYS[2]). A job is pushed only by the caller whose ZREM removed it.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
local moved = 0
for _, job in ipairs(due) do
    if redis.call('ZREM', KEYS[1], job) == 1 then
        redis.call('RPUSH', KEYS[2], job)
        moved = moved + 1
    end
end
return moved
"#;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Job not found in the queue.
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Redis-based job queue with reliable dequeue.
#[derive(Clone)]
pub struct JobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    queue_name: String,
    processing_queue: String,
    dead_letter_queue: String,
    delayed_queue: String,
    /// Prefix of result keys.
    results_key: String,
    result_ttl: Duration,
    promote_script: redis::Script,
}

impl JobQueue {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a JobQueue from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        let keys = QueueKeys::new(queue_name);
        Self {
            redis,
            queue_name: keys.main,
            processing_queue: keys.processing,
            dead_letter_queue: keys.dead_letter,
            delayed_queue: keys.delayed,
            results_key: keys.results,
            result_ttl: DEFAULT_RESULT_TTL,
            promote_script: redis::Script::new(PROMOTE_SCRIPT),
        }
    }

    /// Sets how long job results are kept.
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Enqueues a new job.
    ///
    /// Jobs are added to the left of the queue (LPUSH) so they can be
    /// dequeued from the right (RPOP) in FIFO order.
    pub async fn enqueue(&self, job: Job) -> Result<Uuid, QueueError> {
        let id = job.id;
        let serialized = serde_json::to_string(&job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        debug!(job_id = %id, task = job.task_spec.name(), "Enqueued job");
        Ok(id)
    }

    /// Dequeues the next job, blocking until one is available or timeout.
    ///
    /// Uses BRPOPLPUSH to atomically move the job from the main queue to
    /// the processing queue.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(job))` if a job was dequeued
    /// - `Ok(None)` if the timeout expired with no jobs available
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => {
                let job: Job = serde_json::from_str(&data)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Stores the result of a job and removes it from the processing queue.
    pub async fn complete(&self, job_id: Uuid, result: JobResult) -> Result<(), QueueError> {
        self.store_result(&result).await?;
        self.remove_job_from_processing(job_id).await?;
        Ok(())
    }

    /// Stores a result under `{queue}:results:{id}` with the result TTL.
    pub async fn store_result(&self, result: &JobResult) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let result_data = serde_json::to_string(result)?;
        conn.set_ex::<_, _, ()>(
            self.result_key(result.job_id),
            &result_data,
            self.result_ttl.as_secs().max(1),
        )
        .await?;
        Ok(())
    }

    /// Parks a job in the delayed set until `delay` has passed.
    /// [`promote_due_jobs`](Self::promote_due_jobs) moves it back.
    pub async fn schedule_retry(&self, job: Job, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        self.remove_job_from_processing(job.id).await?;

        let due_at = due_timestamp_ms(delay);
        let serialized = serde_json::to_string(&job)?;
        conn.zadd::<_, _, _, ()>(&self.delayed_queue, serialized, due_at)
            .await?;
        debug!(job_id = %job.id, delay_secs = delay.as_secs(), "Scheduled retry");
        Ok(())
    }

    /// Moves delayed jobs whose retry time has passed onto the main queue.
    /// Returns how many were moved.
    pub async fn promote_due_jobs(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let moved: usize = self
            .promote_script
            .key(&self.delayed_queue)
            .key(&self.queue_name)
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        if moved > 0 {
            debug!(moved, "Promoted delayed jobs");
        }
        Ok(moved)
    }

    /// Moves a job to the dead letter queue after exhausting retry attempts.
    pub async fn dead_letter(&self, job: Job, error: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        self.remove_job_from_processing(job.id).await?;

        let dead_letter_entry = serde_json::json!({
            "job": job,
            "error": error,
            "moved_at": Utc::now().to_rfc3339(),
        });
        let serialized = serde_json::to_string(&dead_letter_entry)?;

        conn.lpush::<_, _, ()>(&self.dead_letter_queue, serialized)
            .await?;

        Ok(())
    }

    /// Returns the number of jobs in the main queue.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    /// Returns the number of jobs currently being processed.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_queue).await?;
        Ok(len)
    }

    /// Returns the number of jobs in the dead letter queue.
    pub async fn dead_letter_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.dead_letter_queue).await?;
        Ok(len)
    }

    /// Returns the number of jobs waiting out a retry delay.
    pub async fn delayed_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.zcard(&self.delayed_queue).await?;
        Ok(len)
    }

    /// Retrieves a job result by job ID, if it has not expired.
    pub async fn get_result(&self, job_id: Uuid) -> Result<Option<JobResult>, QueueError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(self.result_key(job_id)).await?;

        match data {
            Some(s) => {
                let result: JobResult = serde_json::from_str(&s)?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    /// Polls for a job result until it appears or `timeout` elapses.
    pub async fn wait_for_result(
        &self,
        job_id: Uuid,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<JobResult, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(result) = self.get_result(job_id).await? {
                return Ok(result);
            }
            if tokio::time::Instant::now() + poll_interval > deadline {
                return Err(QueueError::Timeout(timeout));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Recovers jobs stuck in the processing queue.
    ///
    /// Called on worker startup to recover jobs from workers that crashed.
    /// Each recovered job counts as an attempt; jobs out of attempts are
    /// dead-lettered instead.
    ///
    /// # Returns
    ///
    /// The number of jobs moved back to the main queue.
    pub async fn recover_processing_jobs(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let jobs: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for job_data in jobs {
            if let Ok(mut job) = serde_json::from_str::<Job>(&job_data) {
                job.increment_attempts();

                if job.should_retry() {
                    let serialized = serde_json::to_string(&job)?;

                    let mut pipe = redis::pipe();
                    pipe.atomic()
                        .lrem(&self.processing_queue, 1, &job_data)
                        .rpush(&self.queue_name, &serialized);
                    pipe.query_async::<_, ()>(&mut conn).await?;

                    recovered += 1;
                } else {
                    self.dead_letter(job, "Recovered from processing queue after max attempts")
                        .await?;
                }
            }
        }

        Ok(recovered)
    }

    /// Returns queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (queue_len, processing_len, delayed_len, dead_letter_len) = tokio::try_join!(
            self.len(),
            self.processing_len(),
            self.delayed_len(),
            self.dead_letter_len()
        )?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending_jobs: queue_len,
            processing_jobs: processing_len,
            delayed_jobs: delayed_len,
            dead_letter_jobs: dead_letter_len,
        })
    }

    /// Peeks at jobs in the dead letter queue without removing them.
    pub async fn peek_dead_letter(
        &self,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(&self.dead_letter_queue, 0, limit as isize - 1)
            .await?;

        let entries: Result<Vec<serde_json::Value>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();

        Ok(entries?)
    }

    async fn remove_job_from_processing(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let jobs: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for job_data in jobs {
            if let Ok(job) = serde_json::from_str::<Job>(&job_data) {
                if job.id == job_id {
                    conn.lrem::<_, _, ()>(&self.processing_queue, 1, &job_data)
                        .await?;
                    return Ok(());
                }
            }
        }

        // already gone, e.g. recovered by another worker
        Ok(())
    }

    fn result_key(&self, job_id: Uuid) -> String {
        format!("{}:{}", self.results_key, job_id)
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// Redis key names derived from a queue name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub main: String,
    pub processing: String,
    pub dead_letter: String,
    pub delayed: String,
    pub results: String,
}

impl QueueKeys {
    pub fn new(queue_name: &str) -> Self {
        Self {
            main: queue_name.to_string(),
            processing: format!("{}:processing", queue_name),
            dead_letter: format!("{}:dead_letter", queue_name),
            delayed: format!("{}:delayed", queue_name),
            results: format!("{}:results", queue_name),
        }
    }
}

fn due_timestamp_ms(delay: Duration) -> i64 {
    Utc::now().timestamp_millis() + delay.as_millis() as i64
}

/// Statistics about queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Name of the queue.
    pub queue_name: String,
    /// Number of jobs waiting to be processed.
    pub pending_jobs: usize,
    /// Number of jobs currently being processed.
    pub processing_jobs: usize,
    /// Number of jobs waiting out a retry delay.
    pub delayed_jobs: usize,
    /// Number of jobs in the dead letter queue.
    pub dead_letter_jobs: usize,
}

impl QueueStats {
    /// Returns the total number of jobs in all queues.
    pub fn total_jobs(&self) -> usize {
        self.pending_jobs + self.processing_jobs + self.delayed_jobs + self.dead_letter_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskSpec;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = QueueError::JobNotFound(Uuid::new_v4());
        assert!(err.to_string().contains("not found"));

        let err = QueueError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_queue_keys() {
        let keys = QueueKeys::new("reddit_harvest");
        assert_eq!(keys.main, "reddit_harvest");
        assert_eq!(keys.processing, "reddit_harvest:processing");
        assert_eq!(keys.dead_letter, "reddit_harvest:dead_letter");
        assert_eq!(keys.delayed, "reddit_harvest:delayed");
        assert_eq!(keys.results, "reddit_harvest:results");
    }

    #[test]
    fn test_queue_stats() {
        let stats = QueueStats {
            queue_name: "test".to_string(),
            pending_jobs: 10,
            processing_jobs: 5,
            delayed_jobs: 3,
            dead_letter_jobs: 2,
        };

        assert_eq!(stats.total_jobs(), 20);
    }

    #[test]
    fn test_due_timestamp_is_in_the_future() {
        let now = Utc::now().timestamp_millis();
        let due = due_timestamp_ms(Duration::from_secs(300));
        assert!(due >= now + 300_000);
        assert!(due < now + 301_000);
    }

    #[test]
    fn test_promote_script_removes_before_pushing() {
        let zrem = PROMOTE_SCRIPT.find("ZREM").unwrap();
        let rpush = PROMOTE_SCRIPT.find("RPUSH").unwrap();
        assert!(zrem < rpush);
    }

    #[test]
    fn test_dead_letter_entry_structure() {
        let job = Job::new(TaskSpec::Ping);
        let entry = serde_json::json!({
            "job": job,
            "error": "Test error message",
            "moved_at": Utc::now().to_rfc3339(),
        });

        let serialized = serde_json::to_string(&entry).expect("entry should serialize");
        let parsed: serde_json::Value =
            serde_json::from_str(&serialized).expect("should parse back");

        assert_eq!(parsed["job"]["task_spec"]["task"], "ping");
        assert!(parsed.get("error").is_some());
        assert!(parsed.get("moved_at").is_some());
    }

    #[tokio::test]
    #[ignore] // needs REDIS_URL pointing at a live Redis
    async fn test_retry_is_promoted_when_due() {
        let url = std::env::var("REDIS_URL").unwrap();
        let queue = JobQueue::connect(&url, &format!("harvest_test_{}", Uuid::new_v4()))
            .await
            .unwrap();

        let id = queue.enqueue(Job::new(TaskSpec::Ping)).await.unwrap();
        let job = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(job.id, id);

        queue.schedule_retry(job, Duration::ZERO).await.unwrap();
        assert_eq!(queue.processing_len().await.unwrap(), 0);
        assert_eq!(queue.promote_due_jobs().await.unwrap(), 1);
        assert_eq!(queue.len().await.unwrap(), 1);

        let mut conn = queue.redis.clone();
        conn.del::<_, ()>(&queue.queue_name).await.unwrap();
    }
}
