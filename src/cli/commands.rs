//! CLI command definitions for subreddit-harvest.
//!
//! Service commands (`worker`, `beat`) run until Ctrl-C. Scrape commands
//! enqueue a job and, unless told otherwise, wait for its result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::inspect::{run_db_command, run_r2_command, DbArgs, R2Args};
use crate::config::{
    parse_env_bool, AppConfig, CatalogEditor, EditOutcome, GlobalFlag, ScrapeCatalog,
    ScrapeOptions,
};
use crate::scheduler::{
    beat_entries, Beat, Job, JobQueue, QueueError, TaskSpec, WorkerPool, WorkerPoolConfig,
};
use crate::scraper::{Category, ScrapeTarget, TimeFilter};
use crate::tasks::TaskRunner;

/// Default seconds to wait for a job result.
const DEFAULT_WAIT_SECS: u64 = 600;
/// How often a waiting command polls for the result.
const RESULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Scheduled subreddit scraping with URS, R2 archives and a Postgres index.
#[derive(Parser)]
#[command(name = "subreddit-harvest")]
#[command(about = "Schedule URS subreddit scrapes, archive them to R2 and index them in Postgres")]
#[command(version)]
#[command(
    long_about = "subreddit-harvest runs URS subreddit scrapes on a schedule or on demand.\n\nJobs go through a Redis queue to a pool of workers; scrape output is zipped, uploaded to R2 and indexed in Postgres.\n\nExample usage:\n  subreddit-harvest worker --workers 2\n  subreddit-harvest beat\n  subreddit-harvest manual CreditCardsIndia t 25 --time-filter week --wait 600"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the worker pool until Ctrl-C.
    Worker(WorkerArgs),

    /// Run the schedule loop until Ctrl-C.
    Beat,

    /// Show queue statistics, global flags and upcoming schedules.
    Status(StatusArgs),

    /// Enqueue a one-off scrape of a subreddit.
    Manual(ManualArgs),

    /// Enqueue one scheduled config by id (see `list-configs`).
    Schedule(ConfigIdArgs),

    /// Enqueue every enabled manual config.
    #[command(name = "manual-config")]
    ManualConfig(WaitArgs),

    /// Enqueue one scheduled config with database and upload as separate jobs.
    Modular(ConfigIdArgs),

    /// Enqueue the legacy scrape-and-upload job.
    Test(WaitArgs),

    /// List scheduled and manual configs with their ids.
    #[command(name = "list-configs")]
    ListConfigs,

    /// Explain the catalog file format.
    #[command(name = "config-help")]
    ConfigHelp,

    /// Toggle catalog settings.
    Config(ConfigArgs),

    /// Database setup and queries.
    Db(DbArgs),

    /// Inspect the R2 bucket.
    R2(R2Args),

    /// Enqueue an upload of an existing archive.
    Upload(UploadArgs),
}

/// Arguments for `worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of concurrent workers (default: HARVEST_WORKERS, then the
    /// catalog's tasks.max_concurrent_tasks).
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,
}

/// Arguments for `status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Dead-lettered jobs to show.
    #[arg(long, default_value = "5")]
    pub dead_letters: usize,
}

/// Whether and how long to wait for a job result.
#[derive(Parser, Debug, Clone)]
pub struct WaitArgs {
    /// Return right after enqueueing.
    #[arg(long)]
    pub no_wait: bool,

    /// Seconds to wait for the result.
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
    pub timeout: u64,
}

impl WaitArgs {
    fn wait_for(&self) -> Option<Duration> {
        (!self.no_wait).then(|| Duration::from_secs(self.timeout))
    }
}

/// Arguments for `schedule` and `modular`.
#[derive(Parser, Debug)]
pub struct ConfigIdArgs {
    /// Position in the `list-configs` output.
    pub config_id: usize,

    #[command(flatten)]
    pub wait: WaitArgs,
}

/// Arguments for `manual`.
#[derive(Parser, Debug)]
pub struct ManualArgs {
    /// Subreddit name, without `r/`.
    pub subreddit: String,

    /// Category code: h, n, t, r, c or s.
    pub category: Category,

    /// Result count, or keywords for search.
    pub n_or_keywords: String,

    /// Time filter for top, controversial and search.
    #[arg(short = 't', long)]
    pub time_filter: Option<TimeFilter>,

    /// Export CSV instead of JSON.
    #[arg(long, overrides_with = "no_csv")]
    pub csv: bool,

    /// Export JSON (the default).
    #[arg(long = "no-csv")]
    pub no_csv: bool,

    /// Also fetch subreddit rules.
    #[arg(long)]
    pub rules: bool,

    /// Skip comment scraping.
    #[arg(long)]
    pub no_comments: bool,

    /// Wait up to SECS for the result instead of returning after enqueueing.
    #[arg(long, value_name = "SECS")]
    pub wait: Option<u64>,
}

/// Arguments for `upload`.
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Local archive to upload.
    pub archive: PathBuf,

    /// Destination key in the bucket.
    pub object_key: String,

    /// Keep the local file after upload.
    #[arg(long)]
    pub keep: bool,

    #[command(flatten)]
    pub wait: WaitArgs,
}

/// Arguments for `config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

/// Catalog edits.
#[derive(clap::Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Set a global switch, e.g. `config global master_enabled false`.
    Global {
        flag: String,
        #[arg(value_parser = parse_toggle, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Enable or disable a schedule.
    Schedule {
        name: String,
        #[arg(value_parser = parse_toggle, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Enable or disable a subreddit inside a schedule.
    Subreddit {
        schedule: String,
        subreddit: String,
        #[arg(value_parser = parse_toggle, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Show all switches.
    List,

    /// Write the built-in catalog, backing up any existing file.
    Init,
}

fn parse_toggle(raw: &str) -> Result<bool, String> {
    parse_env_bool(raw, "value").map_err(|e| e.to_string())
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Worker(args) => run_worker_command(args).await,
        Commands::Beat => run_beat_command().await,
        Commands::Status(args) => run_status_command(args).await,
        Commands::Manual(args) => run_manual_command(args).await,
        Commands::Schedule(args) => {
            let task = TaskSpec::ScheduledConfig {
                config_id: checked_config_id(args.config_id)?,
            };
            enqueue_task(task, args.wait.wait_for()).await
        }
        Commands::ManualConfig(args) => {
            enqueue_task(TaskSpec::ManualFromConfig, args.wait_for()).await
        }
        Commands::Modular(args) => {
            let task = TaskSpec::ScheduledModular {
                config_id: checked_config_id(args.config_id)?,
            };
            enqueue_task(task, args.wait.wait_for()).await
        }
        Commands::Test(args) => enqueue_task(TaskSpec::TestScrape, args.wait_for()).await,
        Commands::ListConfigs => run_list_configs_command(),
        Commands::ConfigHelp => {
            print!("{}", CONFIG_HELP);
            Ok(())
        }
        Commands::Config(args) => run_config_command(args),
        Commands::Db(args) => run_db_command(args).await,
        Commands::R2(args) => run_r2_command(args).await,
        Commands::Upload(args) => {
            if !args.archive.is_file() {
                anyhow::bail!("Archive {} does not exist", args.archive.display());
            }
            let task = TaskSpec::UploadOnly {
                archive_path: args.archive,
                object_key: args.object_key,
                metadata: Default::default(),
                cleanup: !args.keep,
            };
            enqueue_task(task, args.wait.wait_for()).await
        }
    }
}

// ============================================================================
// Services
// ============================================================================

async fn connect_queue(config: &AppConfig) -> anyhow::Result<JobQueue> {
    let queue = JobQueue::connect(&config.redis_url(), &config.queue_name)
        .await?
        .with_result_ttl(config.result_ttl);
    Ok(queue)
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let catalog = ScrapeCatalog::load(&config.catalog_path)?;
    let num_workers = args
        .workers
        .or(config.workers)
        .unwrap_or(catalog.tasks.max_concurrent_tasks);
    if num_workers == 0 {
        anyhow::bail!("--workers must be greater than 0");
    }

    let queue = Arc::new(connect_queue(&config).await?);
    let runner = TaskRunner::connect(config.clone())
        .await?
        .with_queue(queue.clone());

    let pool_config = WorkerPoolConfig::new(num_workers)
        .with_redis_url(config.redis_url())
        .with_queue_name(config.queue_name.clone())
        // only used when a task's catalog budget cannot be computed
        .with_job_timeout(catalog.tasks.operation_timeout())
        .with_retry_delay(Duration::from_secs(catalog.tasks.retry_delay_secs))
        .with_result_ttl(config.result_ttl);
    let mut pool = WorkerPool::with_queue(pool_config, queue, Arc::new(runner));
    pool.start().await?;

    info!(workers = num_workers, queue = %config.queue_name, "Worker pool running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker pool");
    pool.shutdown().await?;

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        retried = stats.jobs_retried,
        "Worker pool stopped"
    );
    Ok(())
}

async fn run_beat_command() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let catalog = ScrapeCatalog::load(&config.catalog_path)?;
    let queue = Arc::new(connect_queue(&config).await?);

    let beat = Beat::new(queue, &catalog);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(beat.run(shutdown_rx));

    info!(queue = %config.queue_name, "Beat running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(());
    handle.await?;
    Ok(())
}

#[derive(Serialize)]
struct ScheduleStatus {
    name: String,
    schedule: String,
    next_run: String,
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let catalog = ScrapeCatalog::load(&config.catalog_path)?;

    println!("Reddit Scraper Status");
    println!("=====================");
    match connect_queue(&config).await {
        Ok(queue) => {
            let stats = queue.stats().await?;
            println!("Queue '{}':", stats.queue_name);
            println!("  pending:     {}", stats.pending_jobs);
            println!("  processing:  {}", stats.processing_jobs);
            println!("  delayed:     {}", stats.delayed_jobs);
            println!("  dead letter: {}", stats.dead_letter_jobs);

            let dead = queue.peek_dead_letter(args.dead_letters).await?;
            if !dead.is_empty() {
                println!("\nRecent dead-lettered jobs:");
                for entry in dead {
                    let task = entry
                        .pointer("/job/task_spec/task")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?");
                    let error = entry.get("error").and_then(|v| v.as_str()).unwrap_or("");
                    println!("  - {}: {}", task, error);
                }
            }
        }
        Err(e) => println!("Queue unavailable: {}", e),
    }

    println!("\nGlobal settings:");
    for flag in GlobalFlag::ALL {
        println!("  {:<36} {}", flag.key(), on_off(flag.get(&catalog)));
    }

    let next_runs: Vec<ScheduleStatus> = beat_entries(&catalog, Utc::now())
        .into_iter()
        .map(|e| ScheduleStatus {
            name: e.name,
            schedule: e.schedule.to_string(),
            next_run: e.next_run.to_rfc3339(),
        })
        .collect();
    println!("\nActive schedules:");
    if next_runs.is_empty() {
        println!("  (none)");
    }
    for entry in &next_runs {
        println!("  {:<28} {:<32} next {}", entry.name, entry.schedule, entry.next_run);
    }
    for def in catalog.schedules.iter().filter(|s| !s.enabled) {
        println!("  {:<28} disabled", def.name);
    }
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

// ============================================================================
// Enqueueing
// ============================================================================

/// Rejects ids outside the current catalog before anything is queued.
fn checked_config_id(config_id: usize) -> anyhow::Result<usize> {
    let config = AppConfig::from_env()?;
    let catalog = ScrapeCatalog::load(&config.catalog_path)?;
    let count = catalog.enabled_scheduled_configs().len();
    if config_id >= count {
        if count == 0 {
            anyhow::bail!("Invalid config ID {}: no enabled scheduled configs", config_id);
        }
        anyhow::bail!(
            "Invalid config ID {}. Valid IDs are 0 to {}",
            config_id,
            count - 1
        );
    }
    Ok(config_id)
}

async fn enqueue_task(task: TaskSpec, wait: Option<Duration>) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let catalog = ScrapeCatalog::load(&config.catalog_path)?;
    let queue = connect_queue(&config).await?;

    let name = task.name();
    let job_id = queue.enqueue(Job::for_task(task, &catalog.tasks)).await?;
    println!("Enqueued {} job {}", name, job_id);

    let Some(timeout) = wait else {
        return Ok(());
    };
    println!("Waiting up to {}s for the result...", timeout.as_secs());
    match queue
        .wait_for_result(job_id, timeout, RESULT_POLL_INTERVAL)
        .await
    {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(QueueError::Timeout(_)) => {
            warn!(job_id = %job_id, "No result yet");
            println!(
                "Job {} is still running; check `subreddit-harvest status` later",
                job_id
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_manual_command(args: ManualArgs) -> anyhow::Result<()> {
    crate::scraper::validate_subreddit_name(&args.subreddit)?;
    let target = ScrapeTarget::parse_for(args.category, &args.subreddit, &args.n_or_keywords)?;
    if let Some(tf) = args.time_filter {
        if !args.category.accepts_time_filter() {
            warn!(category = %args.category, time_filter = %tf, "Category ignores time filters");
        }
    }

    let task = TaskSpec::ManualScrape {
        subreddit: args.subreddit,
        category: args.category,
        target,
        time_filter: args.time_filter,
        options: ScrapeOptions {
            csv: args.csv && !args.no_csv,
            rules: args.rules,
            auto_confirm: true,
        },
        scrape_comments: !args.no_comments,
    };
    enqueue_task(task, args.wait.map(Duration::from_secs)).await
}

// ============================================================================
// Catalog
// ============================================================================

fn run_list_configs_command() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let catalog = ScrapeCatalog::load(&config.catalog_path)?;

    println!("Scheduled configs (ids for `schedule` / `modular`):");
    let scheduled = catalog.enabled_scheduled_configs();
    if scheduled.is_empty() {
        println!("  (none enabled)");
    }
    for (id, (schedule, sub)) in scheduled.iter().enumerate() {
        println!("  [{}] {:<24} {}", id, schedule.name, sub.describe());
    }

    println!("\nAll schedules:");
    for def in &catalog.schedules {
        println!(
            "  {} ({}, {})",
            def.name,
            def.schedule,
            if def.enabled { "enabled" } else { "disabled" }
        );
        for sub in &def.subreddits {
            let marker = if sub.enabled { "+" } else { "-" };
            println!("    {} {}", marker, sub.describe());
        }
    }

    println!("\nManual configs (`manual-config`):");
    for sub in &catalog.manual {
        let marker = if sub.enabled { "+" } else { "-" };
        println!("  {} {}", marker, sub.describe());
    }
    Ok(())
}

fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let editor = CatalogEditor::new(&config.catalog_path);

    let (what, outcome) = match args.command {
        ConfigSubcommand::Global { flag, enabled } => {
            let flag: GlobalFlag = flag.parse()?;
            (
                format!("{} = {}", flag, enabled),
                editor.set_global(flag, enabled)?,
            )
        }
        ConfigSubcommand::Schedule { name, enabled } => (
            format!("schedule {} enabled = {}", name, enabled),
            editor.set_schedule(&name, enabled)?,
        ),
        ConfigSubcommand::Subreddit {
            schedule,
            subreddit,
            enabled,
        } => (
            format!("r/{} in {} enabled = {}", subreddit, schedule, enabled),
            editor.set_subreddit(&schedule, &subreddit, enabled)?,
        ),
        ConfigSubcommand::List => {
            println!("Settings in {}:", editor.path().display());
            for (key, value) in editor.list_settings()? {
                println!("  {:<40} {}", key, on_off(value));
            }
            return Ok(());
        }
        ConfigSubcommand::Init => (
            format!("default catalog written to {}", editor.path().display()),
            editor.init()?,
        ),
    };

    match outcome {
        EditOutcome::AlreadySet => println!("Already set: {}", what),
        EditOutcome::Updated { backup } => {
            println!("Updated: {}", what);
            if let Some(backup) = backup {
                println!("Backup saved to {}", backup.display());
            }
        }
    }
    Ok(())
}

const CONFIG_HELP: &str = r#"Scrape catalog (HARVEST_CATALOG, default config/scrape_catalog.yaml)

global:                      switches checked before every task
  master_enabled             all scraping
  scheduled_scraping_enabled beat-driven schedules
  manual_scraping_enabled    manual and manual-config scrapes
  comment_scraping_globally_enabled
  upload_to_r2_enabled
  create_archives_enabled

schedules:                   ordered list
  - name: daily_scrapes
    enabled: true
    schedule: { kind: daily, hour: 23, minute: 30 }       # UTC
              # { kind: weekly, weekday: 1, hour: 2, minute: 0 }  (0 = Sunday)
              # { kind: hourly, minute: 0 }
              # { kind: interval, seconds: 21600 }
    subreddits:
      - name: CreditCardsIndia
        category: t          # h hot, n new, t top, r rising, c controversial, s search
        n_results: 25        # required unless category is s
        keywords: "..."      # required when category is s
        time_filter: day     # hour, day, week, month, year, all
        enabled: true
        options: { csv: false, rules: false, auto_confirm: true }

manual:                      same shape as schedule subreddits
comments:  { default_n_comments: 0, max_comments_per_post: 500, delay_range: [3, 8], enabled: true }
archive:   { compress_level: 6, include_metadata: true }
tasks:     { max_retries: 3, retry_delay_secs: 300, timeout_secs: 300, max_concurrent_tasks: 2 }
legacy_upload: { enabled: true, schedule: {...}, subreddits: [...] }

Edit switches with:
  subreddit-harvest config global master_enabled false
  subreddit-harvest config schedule weekly_scrapes true
  subreddit-harvest config subreddit daily_scrapes LifeProTips false
"#;
