//! Executes queued harvest tasks.
//!
//! [`TaskRunner`] owns everything a task may touch: the URS harvester, the
//! optional Postgres database, the optional R2 store and, for tasks that fan
//! out into follow-up jobs, the job queue. The catalog is re-read for every
//! task so `config` edits apply without restarting workers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::scrape::{CommentPlan, Harvester};
use super::ScrapeResult;
use crate::archive::{create_archive, sha256_file, ArchiveKind};
use crate::config::{AppConfig, ScrapeCatalog, ScrapeOptions, SubredditConfig};
use crate::error::{ObjectStoreError, TaskError};
use crate::objectstore::{
    legacy_object_key, manual_object_key, scheduled_object_key, ObjectStore, R2Store,
};
use crate::scheduler::{Job, JobExecutor, JobQueue, TaskSpec};
use crate::scraper::{
    validate_subreddit_name, Category, ScrapeLayout, ScrapeTarget, TimeFilter, UrsRunner,
};
use crate::storage::records::count_i32;
use crate::storage::{ArchiveRecord, Database, ScrapeIngestor, ScrapeStatus, TaskType};

/// Object key prefix of manual scrape archives.
const MANUAL_PREFIX: &str = "manual_scrapes";
/// Object key prefix of the legacy daily upload.
const LEGACY_PREFIX: &str = "daily_scrapes";

/// An archive built by a task, and what happened to it.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveUpload {
    pub status: &'static str,
    pub archive_path: PathBuf,
    pub object_key: String,
    pub uploaded: bool,
    pub deleted_locally: bool,
    pub file_count: usize,
    pub original_size_bytes: u64,
    pub compressed_size_bytes: u64,
}

/// Inputs of [`TaskRunner::archive_and_upload`].
struct ArchiveJob<'a> {
    source_dir: &'a Path,
    kind: ArchiveKind,
    /// Object key prefix; also the archive type recorded in the database.
    label: &'a str,
    configs: &'a [SubredditConfig],
    results: &'a [ScrapeResult],
    metadata: BTreeMap<String, String>,
    compress_level: u8,
    upload: bool,
    cleanup: bool,
}

/// The [`JobExecutor`] behind the worker pool.
pub struct TaskRunner {
    config: AppConfig,
    harvester: Harvester,
    db: Option<Database>,
    store: Option<Arc<dyn ObjectStore>>,
    queue: Option<Arc<JobQueue>>,
}

impl TaskRunner {
    /// Builds a runner without a database. An R2 store is created when the
    /// R2 settings are complete.
    pub fn new(config: AppConfig) -> Result<Self, TaskError> {
        let harvester = Harvester::new(
            UrsRunner::from_config(&config)?,
            ScrapeLayout::new(&config.scrapes_dir),
        );
        let store: Option<Arc<dyn ObjectStore>> = if config.r2.is_complete() {
            Some(Arc::new(R2Store::new(&config.r2)?))
        } else {
            None
        };
        Ok(Self {
            config,
            harvester,
            db: None,
            store,
            queue: None,
        })
    }

    /// Builds a runner and connects to Postgres when `DATABASE_URL` is set.
    ///
    /// A database that cannot be reached disables database integration
    /// instead of failing; scrapes still run.
    pub async fn connect(config: AppConfig) -> Result<Self, TaskError> {
        let mut runner = Self::new(config)?;
        match runner.config.database_url.as_deref() {
            Some(url) => match Database::connect(url).await {
                Ok(db) => {
                    if let Err(e) = db.run_migrations().await {
                        warn!(error = %e, "Database migrations failed");
                    }
                    runner.db = Some(db);
                }
                Err(e) => warn!(error = %e, "Database unavailable, database integration disabled"),
            },
            None => warn!("DATABASE_URL not set, database integration disabled"),
        }
        if runner.store.is_none() {
            warn!("R2 configuration incomplete, uploads will fail");
        }
        Ok(runner)
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Gives the runner a queue for tasks that enqueue follow-up jobs.
    pub fn with_queue(mut self, queue: Arc<JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_harvester(mut self, harvester: Harvester) -> Self {
        self.harvester = harvester;
        self
    }

    pub fn has_database(&self) -> bool {
        self.db.is_some()
    }

    /// The catalog as it is on disk right now.
    pub fn catalog(&self) -> Result<ScrapeCatalog, TaskError> {
        Ok(ScrapeCatalog::load(&self.config.catalog_path)?)
    }

    /// The harvester with the catalog's per-run URS timeout applied.
    fn harvester_for(&self, catalog: &ScrapeCatalog) -> Harvester {
        self.harvester
            .with_operation_timeout(catalog.tasks.operation_timeout())
    }

    /// Worst-case wall time of `task` under `catalog`: every scrape it will
    /// run, plus one operation timeout for archiving, uploading and saving.
    pub fn task_budget(&self, catalog: &ScrapeCatalog, task: &TaskSpec) -> Duration {
        let harvester = self.harvester_for(catalog);
        let listed = CommentPlan::from_catalog(catalog);
        let scrapes = |configs: &[&SubredditConfig], plan: &CommentPlan| -> Duration {
            configs.iter().map(|c| harvester.time_budget(c, plan)).sum()
        };

        let scraping = match task {
            TaskSpec::ScrapeAndUpload | TaskSpec::TestScrape => {
                let configs: Vec<&SubredditConfig> =
                    catalog.legacy_upload.subreddits.iter().collect();
                scrapes(
                    &configs,
                    &CommentPlan::all_comments(catalog.comments.delay_range),
                )
            }
            TaskSpec::ScheduledScrape { schedule } => match catalog.schedule(schedule) {
                Some(def) => {
                    let configs: Vec<&SubredditConfig> = def.enabled_subreddits().collect();
                    scrapes(&configs, &listed)
                }
                None => Duration::ZERO,
            },
            TaskSpec::ScheduledConfig { config_id } | TaskSpec::ScheduledModular { config_id } => {
                match catalog.enabled_scheduled_configs().get(*config_id) {
                    Some((_, config)) => harvester.time_budget(config, &listed),
                    None => Duration::ZERO,
                }
            }
            TaskSpec::ManualScrape {
                subreddit,
                category,
                target,
                time_filter,
                options,
                scrape_comments,
            } => {
                let config = manual_config(subreddit, *category, target, *time_filter, options);
                let plan = if *scrape_comments {
                    listed
                } else {
                    CommentPlan::disabled()
                };
                harvester.time_budget(&config, &plan)
            }
            TaskSpec::ManualFromConfig => scrapes(&catalog.enabled_manual_configs(), &listed),
            TaskSpec::Ping
            | TaskSpec::DatabaseOnly { .. }
            | TaskSpec::UploadOnly { .. }
            | TaskSpec::ArchiveAndUpload { .. } => Duration::ZERO,
        };
        scraping + catalog.tasks.operation_timeout()
    }

    /// Runs `task`. `task_id` identifies the run in scrape sessions.
    pub async fn run_task(&self, task_id: &str, task: &TaskSpec) -> Result<Value, TaskError> {
        info!(task_id = %task_id, task = task.name(), "Running task");
        match task {
            TaskSpec::Ping => Ok(json!({
                "status": "ok",
                "worker": worker_name(),
                "timestamp": Utc::now().to_rfc3339(),
            })),
            TaskSpec::ScrapeAndUpload | TaskSpec::TestScrape => self.scrape_and_upload().await,
            TaskSpec::ScheduledScrape { schedule } => self.scheduled_scrape(task_id, schedule).await,
            TaskSpec::ScheduledConfig { config_id } => {
                self.scheduled_config(task_id, *config_id).await
            }
            TaskSpec::ScheduledModular { config_id } => {
                self.scheduled_modular(task_id, *config_id).await
            }
            TaskSpec::ManualScrape {
                subreddit,
                category,
                target,
                time_filter,
                options,
                scrape_comments,
            } => {
                let config = manual_config(subreddit, *category, target, *time_filter, options);
                self.manual_scrape(task_id, &config, *scrape_comments).await
            }
            TaskSpec::ManualFromConfig => self.manual_from_config(task_id).await,
            TaskSpec::DatabaseOnly {
                task_id,
                task_type,
                config,
                result,
                scrape_file_path,
            } => {
                self.database_only(task_id, *task_type, config, result, scrape_file_path.as_deref())
                    .await
            }
            TaskSpec::UploadOnly {
                archive_path,
                object_key,
                metadata,
                cleanup,
            } => {
                self.upload_only(archive_path, object_key, metadata, *cleanup)
                    .await
            }
            TaskSpec::ArchiveAndUpload {
                scrapes_dir,
                archive_type,
                label,
                configs,
                results,
                metadata,
                cleanup,
            } => {
                let catalog = self.catalog()?;
                let upload = self
                    .archive_and_upload(ArchiveJob {
                        source_dir: scrapes_dir,
                        kind: ArchiveKind::Typed(archive_type.clone()),
                        label,
                        configs,
                        results,
                        metadata: metadata.clone(),
                        compress_level: catalog.archive.compress_level,
                        upload: true,
                        cleanup: *cleanup,
                    })
                    .await?;
                Ok(json!({
                    "status": "success",
                    "archive_path": upload.archive_path,
                    "object_key": upload.object_key,
                    "uploaded": upload.uploaded,
                }))
            }
        }
    }

    /// The legacy daily job: scrape every legacy config with all comments,
    /// archive today's directory and upload it to the legacy key.
    async fn scrape_and_upload(&self) -> Result<Value, TaskError> {
        info!("Starting daily Reddit scraping task");
        let catalog = self.catalog()?;
        self.config.r2()?;

        let configs: Vec<SubredditConfig> = catalog
            .legacy_upload
            .subreddits
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        let plan = CommentPlan::all_comments(catalog.comments.delay_range);
        let harvester = self.harvester_for(&catalog);

        let mut results = Vec::with_capacity(configs.len());
        for config in &configs {
            let result = harvester.process_subreddit_config(config, &plan).await;
            if !result.is_success() {
                error!(subreddit = %config.name, error = ?result.error, "Scrape failed, skipping");
            }
            results.push(result);
        }

        let source_dir = self.harvester.layout().today_dir();
        let upload = self
            .archive_and_upload(ArchiveJob {
                source_dir: &source_dir,
                kind: ArchiveKind::Legacy,
                label: LEGACY_PREFIX,
                configs: &configs,
                results: &results,
                metadata: legacy_metadata(&configs),
                compress_level: catalog.archive.compress_level,
                upload: true,
                cleanup: true,
            })
            .await?;

        info!("Successfully completed daily scraping and upload");
        Ok(json!({
            "status": "success",
            "date": date_string(today()),
            "archive_uploaded": upload.object_key,
            "subreddits_processed": configs.len(),
        }))
    }

    async fn scheduled_scrape(&self, task_id: &str, name: &str) -> Result<Value, TaskError> {
        let catalog = self.catalog()?;
        if let Some(reason) = scheduled_disabled(&catalog) {
            return Ok(skipped(reason, json!({ "schedule": name })));
        }
        let def = catalog
            .schedule(name)
            .ok_or_else(|| TaskError::UnknownSchedule(name.to_string()))?;
        if !def.enabled {
            return Ok(skipped("schedule disabled", json!({ "schedule": name })));
        }

        info!(schedule = %name, "Starting scheduled scrape");
        let configs: Vec<SubredditConfig> = def.enabled_subreddits().cloned().collect();
        let plan = CommentPlan::from_catalog(&catalog);
        let results = self
            .scrape_all(&self.harvester_for(&catalog), task_id, TaskType::Scheduled, &configs, &plan)
            .await;
        let archive = self
            .archive_run(&catalog, ArchiveKind::Typed(name.to_string()), name, &configs, &results)
            .await;

        Ok(json!({
            "status": batch_status(&results),
            "schedule": name,
            "date": date_string(today()),
            "subreddits_processed": results.len(),
            "results": results,
            "archive": archive,
        }))
    }

    async fn scheduled_config(&self, task_id: &str, config_id: usize) -> Result<Value, TaskError> {
        let catalog = self.catalog()?;
        if let Some(reason) = scheduled_disabled(&catalog) {
            return Ok(skipped(reason, json!({ "config_id": config_id })));
        }
        let (schedule, config) = lookup_scheduled_config(&catalog, config_id)?;

        let plan = CommentPlan::from_catalog(&catalog);
        let result = self
            .harvester_for(&catalog)
            .process_subreddit_config(&config, &plan)
            .await;
        self.persist(task_id, TaskType::Scheduled, &config, &result)
            .await;
        let archive = self
            .archive_run(
                &catalog,
                ArchiveKind::Typed(schedule.clone()),
                &schedule,
                std::slice::from_ref(&config),
                std::slice::from_ref(&result),
            )
            .await;

        Ok(json!({
            "status": result.status,
            "schedule": schedule,
            "config_id": config_id,
            "date": date_string(today()),
            "result": result,
            "archive": archive,
        }))
    }

    /// Scrapes one scheduled config and hands persistence and upload to
    /// separate jobs.
    async fn scheduled_modular(&self, task_id: &str, config_id: usize) -> Result<Value, TaskError> {
        let queue = self.queue.as_ref().ok_or(TaskError::QueueUnavailable)?;
        let catalog = self.catalog()?;
        if let Some(reason) = scheduled_disabled(&catalog) {
            return Ok(skipped(reason, json!({ "config_id": config_id })));
        }
        let (schedule, config) = lookup_scheduled_config(&catalog, config_id)?;

        let plan = CommentPlan::from_catalog(&catalog);
        let result = self
            .harvester_for(&catalog)
            .process_subreddit_config(&config, &plan)
            .await;

        let mut database_tasks = Vec::new();
        if self.db.is_some() && result.scrape_file_path.is_some() {
            let job = Job::for_task(
                TaskSpec::DatabaseOnly {
                    task_id: task_id.to_string(),
                    task_type: TaskType::Scheduled,
                    config: config.clone(),
                    result: result.clone(),
                    scrape_file_path: result.scrape_file_path.clone(),
                },
                &catalog.tasks,
            );
            database_tasks.push(queue.enqueue(job).await?);
        }

        let upload_task = if result.is_success()
            && catalog.global.create_archives_enabled
            && catalog.global.upload_to_r2_enabled
        {
            let job = Job::for_task(
                TaskSpec::ArchiveAndUpload {
                    scrapes_dir: self.harvester.layout().today_dir(),
                    archive_type: schedule.clone(),
                    label: schedule.clone(),
                    configs: vec![config.clone()],
                    results: vec![result.clone()],
                    metadata: run_metadata(&catalog, &schedule, std::slice::from_ref(&config)),
                    cleanup: true,
                },
                &catalog.tasks,
            );
            let job_id = queue.enqueue(job).await?;
            json!({ "job_id": job_id, "status": "queued" })
        } else {
            Value::Null
        };

        info!(
            config_id,
            database_tasks = database_tasks.len(),
            upload_queued = !upload_task.is_null(),
            "Modular scrape finished"
        );
        Ok(json!({
            "status": result.status,
            "modular_execution": true,
            "schedule": schedule,
            "config_id": config_id,
            "result": result,
            "database_tasks": database_tasks,
            "upload_task": upload_task,
        }))
    }

    async fn manual_scrape(
        &self,
        task_id: &str,
        config: &SubredditConfig,
        scrape_comments: bool,
    ) -> Result<Value, TaskError> {
        let catalog = self.catalog()?;
        if let Some(reason) = manual_disabled(&catalog) {
            return Ok(skipped(reason, json!({ "subreddit": config.name })));
        }
        validate_subreddit_name(&config.name)?;

        let plan = if scrape_comments {
            CommentPlan::from_catalog(&catalog)
        } else {
            CommentPlan::disabled()
        };
        let result = self
            .harvester_for(&catalog)
            .process_subreddit_config(config, &plan)
            .await;
        self.persist(task_id, TaskType::Manual, config, &result).await;
        let archive = self
            .archive_run(
                &catalog,
                ArchiveKind::Custom("manual_scrape".to_string()),
                MANUAL_PREFIX,
                std::slice::from_ref(config),
                std::slice::from_ref(&result),
            )
            .await;

        Ok(json!({
            "status": result.status,
            "subreddit": config.name,
            "date": date_string(today()),
            "result": result,
            "archive": archive,
        }))
    }

    async fn manual_from_config(&self, task_id: &str) -> Result<Value, TaskError> {
        let catalog = self.catalog()?;
        if let Some(reason) = manual_disabled(&catalog) {
            return Ok(skipped(reason, Value::Null));
        }

        let configs: Vec<SubredditConfig> =
            catalog.enabled_manual_configs().into_iter().cloned().collect();
        let plan = CommentPlan::from_catalog(&catalog);
        let results = self
            .scrape_all(&self.harvester_for(&catalog), task_id, TaskType::Manual, &configs, &plan)
            .await;
        let archive = self
            .archive_run(
                &catalog,
                ArchiveKind::Custom("manual_config_scrape".to_string()),
                MANUAL_PREFIX,
                &configs,
                &results,
            )
            .await;

        Ok(json!({
            "status": batch_status(&results),
            "date": date_string(today()),
            "subreddits_processed": results.len(),
            "results": results,
            "archive": archive,
        }))
    }

    async fn database_only(
        &self,
        task_id: &str,
        task_type: TaskType,
        config: &SubredditConfig,
        result: &ScrapeResult,
        scrape_file: Option<&Path>,
    ) -> Result<Value, TaskError> {
        let db = self.db.as_ref().ok_or(TaskError::DatabaseUnavailable)?;
        let session_id = ScrapeIngestor::new(db)
            .save_scraping_results(
                task_id,
                task_type,
                config,
                result,
                scrape_file,
                self.harvester.layout(),
            )
            .await?;
        Ok(json!({
            "database_saved": true,
            "subreddit": config.name,
            "task_id": task_id,
            "session_id": session_id,
        }))
    }

    async fn upload_only(
        &self,
        archive_path: &Path,
        object_key: &str,
        metadata: &BTreeMap<String, String>,
        cleanup: bool,
    ) -> Result<Value, TaskError> {
        if !archive_path.is_file() {
            return Err(ObjectStoreError::FileMissing(archive_path.to_path_buf()).into());
        }
        let store = self.object_store()?;
        store.upload_file(archive_path, object_key, metadata).await?;
        let deleted_locally = cleanup && remove_local(archive_path);
        Ok(json!({
            "uploaded": true,
            "object_key": object_key,
            "archive_path": archive_path,
            "deleted_locally": deleted_locally,
        }))
    }

    /// Scrapes each config in order, saving every result to the database
    /// when one is configured.
    async fn scrape_all(
        &self,
        harvester: &Harvester,
        task_id: &str,
        task_type: TaskType,
        configs: &[SubredditConfig],
        plan: &CommentPlan,
    ) -> Vec<ScrapeResult> {
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            let result = harvester.process_subreddit_config(config, plan).await;
            self.persist(task_id, task_type, config, &result).await;
            results.push(result);
        }
        results
    }

    /// Saves a scrape result. Database errors are logged, not returned.
    async fn persist(
        &self,
        task_id: &str,
        task_type: TaskType,
        config: &SubredditConfig,
        result: &ScrapeResult,
    ) -> bool {
        let Some(db) = &self.db else {
            return false;
        };
        if result.status == ScrapeStatus::Skipped {
            return false;
        }
        match ScrapeIngestor::new(db)
            .save_scraping_results(
                task_id,
                task_type,
                config,
                result,
                result.scrape_file_path.as_deref(),
                self.harvester.layout(),
            )
            .await
        {
            Ok(session_id) => {
                info!(subreddit = %config.name, session = %session_id, "Saved scrape to database");
                true
            }
            Err(e) => {
                warn!(subreddit = %config.name, error = %e, "Failed to save scrape to database");
                false
            }
        }
    }

    /// Archives today's scrapes after a scheduled or manual run, following
    /// the catalog's archive and upload switches. Failures are reported in
    /// the returned JSON so the scrapes themselves are not retried.
    async fn archive_run(
        &self,
        catalog: &ScrapeCatalog,
        kind: ArchiveKind,
        label: &str,
        configs: &[SubredditConfig],
        results: &[ScrapeResult],
    ) -> Value {
        if !catalog.global.create_archives_enabled || !results.iter().any(ScrapeResult::is_success)
        {
            return Value::Null;
        }
        let mut upload = catalog.global.upload_to_r2_enabled;
        if upload && self.store.is_none() {
            warn!("R2 upload enabled but R2 is not configured, keeping archive locally");
            upload = false;
        }

        let source_dir = self.harvester.layout().today_dir();
        match self
            .archive_and_upload(ArchiveJob {
                source_dir: &source_dir,
                kind,
                label,
                configs,
                results,
                metadata: run_metadata(catalog, label, configs),
                compress_level: catalog.archive.compress_level,
                upload,
                cleanup: true,
            })
            .await
        {
            Ok(archive) => json!(archive),
            Err(e) => {
                error!(label = %label, error = %e, "Archive step failed");
                json!({ "status": "failed", "error": e.to_string() })
            }
        }
    }

    async fn archive_and_upload(&self, job: ArchiveJob<'_>) -> Result<ArchiveUpload, TaskError> {
        if !job.source_dir.is_dir() {
            return Err(TaskError::ScrapesDirMissing(job.source_dir.to_path_buf()));
        }
        let now = Local::now();
        let file_name = job.kind.file_name(now);
        let summary = create_archive(
            job.source_dir,
            &self.config.archive_dir,
            &file_name,
            job.compress_level,
        )?;

        let date = now.date_naive();
        let object_key = match job.kind {
            ArchiveKind::Legacy => legacy_object_key(date),
            _ if job.label == MANUAL_PREFIX => manual_object_key(date, &file_name),
            _ => scheduled_object_key(job.label, date, &file_name),
        };

        if !job.upload {
            info!(archive = %summary.path.display(), "Archive kept locally, upload disabled");
            return Ok(ArchiveUpload {
                status: "archived",
                archive_path: summary.path,
                object_key,
                uploaded: false,
                deleted_locally: false,
                file_count: summary.file_count,
                original_size_bytes: summary.original_size_bytes,
                compressed_size_bytes: summary.compressed_size_bytes,
            });
        }

        let store = self.object_store()?;
        let mut metadata = job.metadata;
        metadata.insert("sha256".to_string(), sha256_file(&summary.path)?);
        metadata.insert("file_count".to_string(), summary.file_count.to_string());
        store
            .upload_file(&summary.path, &object_key, &metadata)
            .await?;
        let deleted_locally = job.cleanup && remove_local(&summary.path);

        if let Some(db) = &self.db {
            let record = ArchiveRecord {
                filename: file_name.clone(),
                archive_type: job.label.to_string(),
                file_path: (!deleted_locally).then(|| summary.path.display().to_string()),
                r2_object_key: object_key.clone(),
                original_size_bytes: summary.original_size_bytes as i64,
                compressed_size_bytes: summary.compressed_size_bytes as i64,
                compression_ratio: summary.compression_ratio,
                compression_level: i32::from(job.compress_level),
                file_count: count_i32(summary.file_count),
                subreddits_included: Some(subreddit_names(job.configs)),
                total_submissions: job.results.iter().map(|r| count_i32(r.submissions_found)).fold(0i32, i32::saturating_add),
                total_comments: job.results.iter().map(|r| count_i32(r.comments_scraped)).fold(0i32, i32::saturating_add),
                upload_metadata: Some(json!(metadata)),
                is_deleted_locally: deleted_locally,
            };
            if let Err(e) = ScrapeIngestor::new(db).record_archive(&record).await {
                warn!(key = %object_key, error = %e, "Failed to record archive");
            }
        }

        Ok(ArchiveUpload {
            status: "uploaded",
            archive_path: summary.path,
            object_key,
            uploaded: true,
            deleted_locally,
            file_count: summary.file_count,
            original_size_bytes: summary.original_size_bytes,
            compressed_size_bytes: summary.compressed_size_bytes,
        })
    }

    fn object_store(&self) -> Result<Arc<dyn ObjectStore>, TaskError> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => Err(match self.config.r2() {
                Err(e) => e.into(),
                Ok(_) => TaskError::UploadFailed,
            }),
        }
    }
}

#[async_trait]
impl JobExecutor for TaskRunner {
    async fn execute(&self, job: &Job) -> Result<Value, TaskError> {
        self.run_task(&job.id.to_string(), &job.task_spec).await
    }

    fn time_budget(&self, job: &Job) -> Option<Duration> {
        match self.catalog() {
            Ok(catalog) => Some(self.task_budget(&catalog, &job.task_spec)),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Catalog unreadable, using pool job timeout");
                None
            }
        }
    }
}

fn manual_config(
    subreddit: &str,
    category: Category,
    target: &ScrapeTarget,
    time_filter: Option<TimeFilter>,
    options: &ScrapeOptions,
) -> SubredditConfig {
    SubredditConfig {
        name: subreddit.to_string(),
        category,
        n_results: target.count(),
        keywords: match target {
            ScrapeTarget::Keywords(k) => Some(k.clone()),
            ScrapeTarget::Count(_) => None,
        },
        time_filter,
        enabled: true,
        options: options.clone(),
    }
}

fn scheduled_disabled(catalog: &ScrapeCatalog) -> Option<&'static str> {
    if !catalog.global.master_enabled {
        Some("master switch disabled")
    } else if !catalog.global.scheduled_scraping_enabled {
        Some("scheduled scraping disabled")
    } else {
        None
    }
}

fn manual_disabled(catalog: &ScrapeCatalog) -> Option<&'static str> {
    if !catalog.global.master_enabled {
        Some("master switch disabled")
    } else if !catalog.global.manual_scraping_enabled {
        Some("manual scraping disabled")
    } else {
        None
    }
}

fn skipped(reason: &str, context: Value) -> Value {
    info!(reason = %reason, "Task skipped");
    let mut value = json!({ "status": "skipped", "reason": reason });
    if let (Some(map), Value::Object(extra)) = (value.as_object_mut(), context) {
        map.extend(extra);
    }
    value
}

/// The schedule name and config behind a flattened config id.
fn lookup_scheduled_config(
    catalog: &ScrapeCatalog,
    config_id: usize,
) -> Result<(String, SubredditConfig), TaskError> {
    let configs = catalog.enabled_scheduled_configs();
    match configs.get(config_id) {
        Some((schedule, config)) => Ok((schedule.name.clone(), (*config).clone())),
        None => Err(TaskError::InvalidConfigId {
            id: config_id,
            available: match configs.len() {
                0 => "no enabled scheduled configs".to_string(),
                n => format!("valid ids are 0 to {}", n - 1),
            },
        }),
    }
}

fn batch_status(results: &[ScrapeResult]) -> &'static str {
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = results
        .iter()
        .filter(|r| r.status == ScrapeStatus::Failed)
        .count();
    match (succeeded, failed) {
        (0, 0) => "skipped",
        (_, 0) => "success",
        (0, _) => "failed",
        _ => "partial",
    }
}

fn subreddit_names(configs: &[SubredditConfig]) -> String {
    configs
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Upload metadata describing a run. Empty when the catalog turns
/// `archive.include_metadata` off; checksum and file count are added later
/// regardless.
fn run_metadata(
    catalog: &ScrapeCatalog,
    label: &str,
    configs: &[SubredditConfig],
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if !catalog.archive.include_metadata {
        return metadata;
    }
    metadata.insert("schedule".to_string(), label.to_string());
    metadata.insert("subreddits".to_string(), subreddit_names(configs));
    metadata.insert("configs".to_string(), configs.len().to_string());
    metadata
}

/// Upload metadata of the legacy job: the last config's subreddit, category
/// and result count, plus every subreddit processed.
fn legacy_metadata(configs: &[SubredditConfig]) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Some(last) = configs.last() {
        metadata.insert("subreddit".to_string(), last.name.clone());
        metadata.insert("category".to_string(), last.category.code().to_string());
        if let Some(n) = last.n_results {
            metadata.insert("n_results".to_string(), n.to_string());
        }
    }
    metadata.insert("subreddits".to_string(), subreddit_names(configs));
    metadata
}

fn remove_local(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(file = %path.display(), "Cleaned up local archive file");
            true
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Could not remove local archive");
            false
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn date_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn worker_name() -> String {
    format!("{}-{}", env!("CARGO_PKG_NAME"), std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::{ObjectMetadata, ObjectSummary};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        uploads: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn upload_file(
            &self,
            path: &Path,
            key: &str,
            metadata: &BTreeMap<String, String>,
        ) -> Result<(), ObjectStoreError> {
            if !path.is_file() {
                return Err(ObjectStoreError::FileMissing(path.to_path_buf()));
            }
            self.uploads
                .lock()
                .unwrap()
                .push((key.to_string(), metadata.clone()));
            Ok(())
        }

        async fn list_objects(
            &self,
            _prefix: &str,
            _days_back: i64,
        ) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
            Ok(Vec::new())
        }

        async fn object_metadata(&self, _key: &str) -> Result<ObjectMetadata, ObjectStoreError> {
            Ok(ObjectMetadata::default())
        }

        async fn delete_object(&self, _key: &str) -> Result<(), ObjectStoreError> {
            Ok(())
        }

        fn bucket(&self) -> &str {
            "memory"
        }
    }

    fn config_in(dir: &Path) -> AppConfig {
        AppConfig::new()
            .with_urs_command("true")
            .with_urs_dir(dir)
            .with_scrapes_dir(dir.join("scrapes"))
            .with_archive_dir(dir.join("out"))
            .with_catalog_path(dir.join("catalog.yaml"))
    }

    #[tokio::test]
    async fn test_ping() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let output = runner.run_task("t1", &TaskSpec::Ping).await.unwrap();
        assert_eq!(output["status"], "ok");
        assert!(output["worker"].as_str().unwrap().starts_with("subreddit-harvest-"));
    }

    #[test]
    fn test_daily_budget_covers_every_urs_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let catalog = ScrapeCatalog::default();
        let op = catalog.tasks.operation_timeout();

        let daily = runner.task_budget(
            &catalog,
            &TaskSpec::ScheduledScrape {
                schedule: "daily_scrapes".to_string(),
            },
        );
        // 2 subreddit runs and 50 comment runs, 48 pauses of up to 8 s
        assert!(daily >= op * 52 + Duration::from_secs(48 * 8), "{:?}", daily);

        let legacy = runner.task_budget(&catalog, &TaskSpec::ScrapeAndUpload);
        assert!(legacy >= op * 26 + Duration::from_secs(24 * 8), "{:?}", legacy);

        let search_only = runner.task_budget(
            &catalog,
            &TaskSpec::manual("rust", Category::Search, ScrapeTarget::Keywords("a".into()), None),
        );
        assert!(search_only < daily);
        assert_eq!(runner.task_budget(&catalog, &TaskSpec::Ping), op);
    }

    #[test]
    fn test_budget_follows_catalog_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let runner = TaskRunner::new(config.clone()).unwrap();
        let job = Job::new(TaskSpec::ScheduledConfig { config_id: 0 });
        let before = JobExecutor::time_budget(&runner, &job).unwrap();

        let mut catalog = ScrapeCatalog::default();
        catalog.tasks.timeout_secs = 600;
        catalog.save(&config.catalog_path).unwrap();
        let after = JobExecutor::time_budget(&runner, &job).unwrap();
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_legacy_upload_requires_r2() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let err = runner
            .run_task("t1", &TaskSpec::ScrapeAndUpload)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
        assert!(err.to_string().contains("R2 configuration is incomplete"));
    }

    #[tokio::test]
    async fn test_invalid_config_id_names_range() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let err = runner
            .run_task("t1", &TaskSpec::ScheduledConfig { config_id: 9 })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfigId { id: 9, .. }));
        assert!(err.to_string().contains("0 to 2"));
    }

    #[tokio::test]
    async fn test_unknown_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let err = runner
            .run_task(
                "t1",
                &TaskSpec::ScheduledScrape {
                    schedule: "nightly".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownSchedule(_)));
    }

    #[tokio::test]
    async fn test_disabled_schedule_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let output = runner
            .run_task(
                "t1",
                &TaskSpec::ScheduledScrape {
                    schedule: "weekly_scrapes".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(output["status"], "skipped");
        assert_eq!(output["reason"], "schedule disabled");
        assert_eq!(output["schedule"], "weekly_scrapes");
    }

    #[tokio::test]
    async fn test_manual_scrape_obeys_flag() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut catalog = ScrapeCatalog::default();
        catalog.global.manual_scraping_enabled = false;
        catalog.save(&config.catalog_path).unwrap();

        let runner = TaskRunner::new(config).unwrap();
        let task = TaskSpec::manual("rust", Category::Hot, ScrapeTarget::Count(5), None);
        let output = runner.run_task("t1", &task).await.unwrap();
        assert_eq!(output["status"], "skipped");
        assert_eq!(output["reason"], "manual scraping disabled");
    }

    #[tokio::test]
    async fn test_modular_requires_queue() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let err = runner
            .run_task("t1", &TaskSpec::ScheduledModular { config_id: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::QueueUnavailable));
    }

    #[tokio::test]
    async fn test_database_only_requires_database() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TaskRunner::new(config_in(dir.path())).unwrap();
        let config = SubredditConfig::listing("rust", Category::Hot, 5);
        let task = TaskSpec::DatabaseOnly {
            task_id: "t0".to_string(),
            task_type: TaskType::Manual,
            result: ScrapeResult::skipped(&config),
            config,
            scrape_file_path: None,
        };
        let err = runner.run_task("t1", &task).await.unwrap_err();
        assert!(matches!(err, TaskError::DatabaseUnavailable));
    }

    #[tokio::test]
    async fn test_upload_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let runner = TaskRunner::new(config_in(dir.path()))
            .unwrap()
            .with_object_store(store.clone());

        let archive = dir.path().join("a.zip");
        std::fs::write(&archive, b"zip").unwrap();
        let task = TaskSpec::UploadOnly {
            archive_path: archive.clone(),
            object_key: "manual_scrapes/2024-05-01/a.zip".to_string(),
            metadata: BTreeMap::new(),
            cleanup: false,
        };
        let output = runner.run_task("t1", &task).await.unwrap();
        assert_eq!(output["uploaded"], true);
        assert!(archive.exists());
        assert_eq!(store.uploads.lock().unwrap()[0].0, "manual_scrapes/2024-05-01/a.zip");

        std::fs::remove_file(&archive).unwrap();
        let err = runner.run_task("t1", &task).await.unwrap_err();
        assert!(matches!(err, TaskError::ObjectStore(ObjectStoreError::FileMissing(_))));
    }

    #[tokio::test]
    async fn test_archive_and_upload() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("scrapes").join("2024-05-01");
        std::fs::create_dir_all(day.join("subreddits")).unwrap();
        std::fs::write(day.join("subreddits").join("rust-hot-5-results.json"), b"{}").unwrap();

        let store = Arc::new(MemoryStore::default());
        let runner = TaskRunner::new(config_in(dir.path()))
            .unwrap()
            .with_object_store(store.clone());
        let task = TaskSpec::ArchiveAndUpload {
            scrapes_dir: day,
            archive_type: "hourly_hot_scrapes".to_string(),
            label: "hourly_hot_scrapes".to_string(),
            configs: vec![SubredditConfig::listing("rust", Category::Hot, 5)],
            results: Vec::new(),
            metadata: BTreeMap::new(),
            cleanup: true,
        };
        let output = runner.run_task("t1", &task).await.unwrap();
        assert_eq!(output["status"], "success");
        assert_eq!(output["uploaded"], true);

        let key = output["object_key"].as_str().unwrap();
        assert!(key.starts_with("hourly_hot_scrapes/"));
        assert!(key.ends_with(".zip"));
        let archive_path = PathBuf::from(output["archive_path"].as_str().unwrap());
        assert!(!archive_path.exists());

        let uploads = store.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1["file_count"], "1");
        assert_eq!(uploads[0].1["sha256"].len(), 64);
    }

    #[test]
    fn test_batch_status() {
        let ok = SubredditConfig::listing("rust", Category::Hot, 5);
        let success = ScrapeResult {
            status: ScrapeStatus::Success,
            ..ScrapeResult::skipped(&ok)
        };
        let failed = ScrapeResult::failed(&ok, "boom");
        assert_eq!(batch_status(&[]), "skipped");
        assert_eq!(batch_status(&[success.clone()]), "success");
        assert_eq!(batch_status(&[failed.clone()]), "failed");
        assert_eq!(batch_status(&[success, failed]), "partial");
    }

    #[test]
    fn test_legacy_metadata_uses_last_config() {
        let configs = vec![
            SubredditConfig::listing("CreditCardsIndia", Category::Top, 25),
            SubredditConfig::listing("LifeProTips", Category::Hot, 10),
        ];
        let metadata = legacy_metadata(&configs);
        assert_eq!(metadata["subreddit"], "LifeProTips");
        assert_eq!(metadata["category"], "h");
        assert_eq!(metadata["n_results"], "10");
        assert_eq!(metadata["subreddits"], "CreditCardsIndia,LifeProTips");
    }

    #[test]
    fn test_run_metadata_follows_include_flag() {
        let configs = vec![SubredditConfig::listing("rust", Category::Hot, 5)];
        let mut catalog = ScrapeCatalog::default();
        let metadata = run_metadata(&catalog, "daily_scrapes", &configs);
        assert_eq!(metadata["schedule"], "daily_scrapes");
        assert_eq!(metadata["subreddits"], "rust");
        assert_eq!(metadata["configs"], "1");

        catalog.archive.include_metadata = false;
        assert!(run_metadata(&catalog, "daily_scrapes", &configs).is_empty());
    }
}
