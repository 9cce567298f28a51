//! Job definitions for the scheduler.
//!
//! - `Job`: a unit of work stored in Redis and executed by workers
//! - `TaskSpec`: which harvest task to run, with its arguments
//! - `JobResult`: outcome of a job, stored under `{queue}:results:{id}`
//! - `JobStatus`: final status of a job

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ScrapeOptions, SubredditConfig, TaskConfig};
use crate::scraper::{Category, ScrapeTarget, TimeFilter};
use crate::storage::TaskType;
use crate::tasks::ScrapeResult;

/// Default maximum number of attempts: three retries after the first run.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default priority for jobs (0 is normal priority).
const DEFAULT_PRIORITY: i32 = 0;

/// A harvest task and its arguments.
///
/// Serialized with a `task` tag so queued jobs stay readable in Redis, e.g.
/// `{"task":"scheduled_scrape","schedule":"daily_scrapes"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskSpec {
    /// The legacy daily scrape, archive and upload.
    ScrapeAndUpload,
    /// Runs the legacy flow inline, for testing a deployment.
    TestScrape,
    /// Worker connectivity check.
    Ping,
    /// Every enabled config of a named schedule.
    ScheduledScrape { schedule: String },
    /// One flattened scheduled config.
    ScheduledConfig { config_id: usize },
    /// One flattened scheduled config, with persistence and upload split
    /// into follow-up jobs.
    ScheduledModular { config_id: usize },
    ManualScrape {
        subreddit: String,
        category: Category,
        target: ScrapeTarget,
        #[serde(default)]
        time_filter: Option<TimeFilter>,
        #[serde(default)]
        options: ScrapeOptions,
        #[serde(default = "default_true")]
        scrape_comments: bool,
    },
    /// Every enabled manual config in the catalog.
    ManualFromConfig,
    /// Persists one scrape result to Postgres.
    DatabaseOnly {
        task_id: String,
        task_type: TaskType,
        config: SubredditConfig,
        result: ScrapeResult,
        #[serde(default)]
        scrape_file_path: Option<PathBuf>,
    },
    /// Uploads an archive that already exists on disk.
    UploadOnly {
        archive_path: PathBuf,
        object_key: String,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
        #[serde(default = "default_true")]
        cleanup: bool,
    },
    /// Zips a scrape directory and uploads it.
    ArchiveAndUpload {
        scrapes_dir: PathBuf,
        archive_type: String,
        /// Object key prefix, e.g. a schedule name or `manual_scrapes`.
        label: String,
        #[serde(default)]
        configs: Vec<SubredditConfig>,
        #[serde(default)]
        results: Vec<ScrapeResult>,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
        #[serde(default = "default_true")]
        cleanup: bool,
    },
}

fn default_true() -> bool {
    true
}

impl TaskSpec {
    /// Short task name, matching the serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            TaskSpec::ScrapeAndUpload => "scrape_and_upload",
            TaskSpec::TestScrape => "test_scrape",
            TaskSpec::Ping => "ping",
            TaskSpec::ScheduledScrape { .. } => "scheduled_scrape",
            TaskSpec::ScheduledConfig { .. } => "scheduled_config",
            TaskSpec::ScheduledModular { .. } => "scheduled_modular",
            TaskSpec::ManualScrape { .. } => "manual_scrape",
            TaskSpec::ManualFromConfig => "manual_from_config",
            TaskSpec::DatabaseOnly { .. } => "database_only",
            TaskSpec::UploadOnly { .. } => "upload_only",
            TaskSpec::ArchiveAndUpload { .. } => "archive_and_upload",
        }
    }

    /// A manual scrape with catalog-default options.
    pub fn manual(
        subreddit: impl Into<String>,
        category: Category,
        target: ScrapeTarget,
        time_filter: Option<TimeFilter>,
    ) -> Self {
        TaskSpec::ManualScrape {
            subreddit: subreddit.into(),
            category,
            target,
            time_filter,
            options: ScrapeOptions::default(),
            scrape_comments: true,
        }
    }
}

/// A job representing a unit of work to be executed.
///
/// Jobs are stored in Redis and processed by workers, which retry them
/// until `max_attempts` is used up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: Uuid,
    /// The task to execute.
    pub task_spec: TaskSpec,
    /// Priority of the job (higher values = higher priority).
    pub priority: i32,
    /// When this job was created.
    pub created_at: DateTime<Utc>,
    /// Number of times this job has been attempted.
    pub attempts: u32,
    /// Maximum number of attempts before moving to dead letter queue.
    pub max_attempts: u32,
}

impl Job {
    /// Creates a new job with default settings: a fresh UUID, priority 0,
    /// zero attempts and four maximum attempts.
    pub fn new(task: TaskSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_spec: task,
            priority: DEFAULT_PRIORITY,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Creates a job whose attempt budget follows the catalog's retry policy
    /// (`max_retries + 1` attempts).
    pub fn for_task(task: TaskSpec, policy: &TaskConfig) -> Self {
        Self::new(task).with_max_attempts(policy.max_retries + 1)
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Increments the attempt counter. Called before each execution attempt.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Returns whether the job should be retried after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Returns the number of remaining attempts.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// Status of a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job completed successfully.
    Completed,
    /// Job failed after exhausting all retry attempts.
    Failed,
    /// Job timed out during execution.
    Timeout,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of a job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// ID of the job that was executed.
    pub job_id: Uuid,
    /// Final status of the job.
    pub status: JobStatus,
    /// Task payload returned on success.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Error message if the job failed.
    pub error: Option<String>,
    /// When the job was completed.
    pub completed_at: DateTime<Utc>,
    /// ID of the worker that processed this job.
    pub worker_id: String,
    /// Duration of the execution in milliseconds.
    pub duration_ms: u64,
}

impl JobResult {
    /// Creates a new successful job result.
    pub fn success(
        job_id: Uuid,
        worker_id: impl Into<String>,
        output: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id,
            status: JobStatus::Completed,
            output: Some(output),
            error: None,
            completed_at: Utc::now(),
            worker_id: worker_id.into(),
            duration_ms,
        }
    }

    /// Creates a failed result. The output carries
    /// `{status: "failed", error, date}` for clients polling the result.
    pub fn failure(
        job_id: Uuid,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let error = error.into();
        let completed_at = Utc::now();
        Self {
            job_id,
            status: JobStatus::Failed,
            output: Some(serde_json::json!({
                "status": "failed",
                "error": error,
                "date": completed_at.date_naive().to_string(),
            })),
            error: Some(error),
            completed_at,
            worker_id: worker_id.into(),
            duration_ms,
        }
    }

    /// Creates a new timeout job result.
    pub fn timeout(job_id: Uuid, worker_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            job_id,
            status: JobStatus::Timeout,
            output: None,
            error: Some("Job execution timed out".to_string()),
            completed_at: Utc::now(),
            worker_id: worker_id.into(),
            duration_ms,
        }
    }

    /// Returns whether the job completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
