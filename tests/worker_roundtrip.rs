//! Queue-to-worker round trips.
//!
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test worker_roundtrip -- --ignored

use std::sync::Arc;
use std::time::Duration;

use subreddit_harvest::config::AppConfig;
use subreddit_harvest::scheduler::{
    Job, JobQueue, JobStatus, QueueKeys, TaskSpec, WorkerPool, WorkerPoolConfig,
};
use subreddit_harvest::tasks::TaskRunner;

fn redis_url() -> String {
    std::env::var("REDIS_URL").expect("REDIS_URL must be set for worker round trips")
}

async fn test_queue() -> Arc<JobQueue> {
    let name = format!("harvest_roundtrip_{}", uuid::Uuid::new_v4());
    Arc::new(JobQueue::connect(&redis_url(), &name).await.expect("redis reachable"))
}

/// Deletes every list and set the queue created.
async fn drop_queue(queue: &JobQueue) {
    let keys = QueueKeys::new(queue.queue_name());
    let client = redis::Client::open(redis_url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("DEL")
        .arg(&[keys.main, keys.processing, keys.delayed, keys.dead_letter])
        .query_async::<_, ()>(&mut conn)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore] // needs REDIS_URL pointing at a live Redis
async fn test_ping_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue().await;
    let runner = TaskRunner::new(
        AppConfig::new()
            .with_urs_command("true")
            .with_catalog_path(dir.path().join("catalog.yaml")),
    )
    .unwrap();

    let config = WorkerPoolConfig::new(1)
        .with_poll_interval(Duration::from_millis(200))
        .with_shutdown_timeout(Duration::from_secs(5));
    let mut pool = WorkerPool::with_queue(config, queue.clone(), Arc::new(runner));
    pool.start().await.unwrap();

    let id = queue.enqueue(Job::new(TaskSpec::Ping)).await.unwrap();
    let result = queue
        .wait_for_result(id, Duration::from_secs(10), Duration::from_millis(100))
        .await
        .unwrap();

    assert_eq!(result.status, JobStatus::Completed);
    let output = result.output.unwrap();
    assert_eq!(output["status"], "ok");

    pool.shutdown().await.unwrap();
    assert_eq!(pool.stats().jobs_completed, 1);
    drop_queue(&queue).await;
}

#[tokio::test]
#[ignore] // needs REDIS_URL pointing at a live Redis
async fn test_failing_job_is_parked_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let queue = test_queue().await;
    let runner = TaskRunner::new(
        AppConfig::new()
            .with_urs_command("true")
            .with_catalog_path(dir.path().join("catalog.yaml")),
    )
    .unwrap();

    let config = WorkerPoolConfig::new(1)
        .with_poll_interval(Duration::from_millis(200))
        .with_retry_delay(Duration::from_secs(300))
        .with_shutdown_timeout(Duration::from_secs(5));
    let mut pool = WorkerPool::with_queue(config, queue.clone(), Arc::new(runner));
    pool.start().await.unwrap();

    // no R2 credentials, so the legacy job fails and is retried later
    queue
        .enqueue(Job::new(TaskSpec::ScrapeAndUpload))
        .await
        .unwrap();

    let mut parked = 0;
    for _ in 0..50 {
        parked = queue.delayed_len().await.unwrap();
        if parked == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(parked, 1);
    assert_eq!(queue.dead_letter_len().await.unwrap(), 0);

    pool.shutdown().await.unwrap();
    assert_eq!(pool.stats().jobs_retried, 1);
    drop_queue(&queue).await;
}
