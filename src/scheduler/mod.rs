//! Background task execution over a Redis queue.
//!
//! - **JobQueue**: Redis-backed job queue with reliable dequeue using BRPOPLPUSH
//! - **WorkerPool**: workers that pull jobs and hand them to a [`JobExecutor`]
//! - **Beat**: enqueues catalog schedules as they come due
//! - **Job**: job envelope with retry and dead letter bookkeeping
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────┐      ┌──────────┐
//!    │   Beat   │      │   CLI    │
//!    └────┬─────┘      └────┬─────┘
//!         └────────┬────────┘
//!           ┌──────▼───────┐
//!           │    Redis     │
//!           │    Queue     │
//!           └──────┬───────┘
//!         ┌────────┴────────┐
//!         ▼                 ▼
//!    ┌─────────┐       ┌─────────┐
//!    │ Worker 1│       │ Worker N│
//!    └─────────┘       └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use subreddit_harvest::scheduler::{Job, JobQueue, TaskSpec, WorkerPool, WorkerPoolConfig};
//!
//! let queue = JobQueue::connect("redis://localhost:6379", "reddit_harvest").await?;
//! queue.enqueue(Job::new(TaskSpec::Ping)).await?;
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(2), executor).await?;
//! pool.start().await?;
//! pool.shutdown().await?;
//! ```
//!
//! # Reliability
//!
//! - **Atomic dequeue**: jobs move to a processing list while they run
//! - **Crash recovery**: processing jobs are requeued when a pool starts
//! - **Delayed retry**: failed jobs wait in a sorted set before they are requeued
//! - **Dead letter queue**: jobs out of attempts are kept for inspection

pub mod beat;
pub mod job;
pub mod queue;
pub mod worker_pool;

pub use beat::{beat_entries, Beat, BeatEntry, Schedule};
pub use job::{Job, JobResult, JobStatus, TaskSpec, DEFAULT_MAX_ATTEMPTS};
pub use queue::{JobQueue, QueueError, QueueKeys, QueueStats, DEFAULT_RESULT_TTL};
pub use worker_pool::{JobExecutor, PoolError, PoolStats, Worker, WorkerPool, WorkerPoolConfig};
