//! `db` and `r2` commands: setup plus read-only inspection.

use chrono::Utc;
use clap::Parser;
use serde::Serialize;

use crate::config::AppConfig;
use crate::objectstore::{
    analyze_prefixes, find_naming_conflicts, recent_uploads, ObjectStore, ObjectSummary, R2Store,
};
use crate::storage::{
    ensure_database_exists, redact_database_url, render_post, ContentType, Database,
    ProcessingQueue, RedditDataApi, ReportFormat,
};

/// Arguments for `db`.
#[derive(Parser, Debug)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum DbCommand {
    /// Create the database if needed and apply migrations.
    Setup {
        /// Drop every table first.
        #[arg(long)]
        reset: bool,
    },

    /// Row counts and top subreddits.
    Status,

    /// One submission with its comments.
    Post {
        reddit_id: String,
        /// detailed, simple or json.
        #[arg(short, long, default_value = "detailed")]
        format: ReportFormat,
    },

    /// Newest submissions.
    Recent {
        #[arg(short, long)]
        subreddit: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
        #[arg(short, long, default_value = "7")]
        days: i64,
    },

    /// Submissions matching any keyword.
    Search {
        #[arg(required = true)]
        keywords: Vec<String>,
        #[arg(short, long)]
        subreddit: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Highest scoring submissions.
    Top {
        #[arg(short, long)]
        subreddit: Option<String>,
        #[arg(short, long, default_value = "7")]
        days: i64,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Submissions and comments by one author.
    Author {
        author: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Aggregates for one subreddit.
    Stats { subreddit: String },

    /// Recent scrape sessions.
    Sessions {
        #[arg(short, long)]
        subreddit: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Items waiting in the processing queue.
    Pending {
        #[arg(short, long)]
        processor: Option<String>,
        /// submission or comment.
        #[arg(short = 't', long)]
        content_type: Option<ContentType>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },
}

/// Arguments for `r2`. With no flags, shows the last 24 hours of uploads
/// and any naming conflicts.
#[derive(Parser, Debug)]
pub struct R2Args {
    /// List each scrape prefix over the last week.
    #[arg(long)]
    pub analyze: bool,

    /// Uploads in the last HOURS hours.
    #[arg(long, value_name = "HOURS")]
    pub recent: Option<i64>,

    /// Keys sharing a schedule and day.
    #[arg(long)]
    pub conflicts: bool,

    /// Objects under PREFIX.
    #[arg(long, value_name = "PREFIX")]
    pub list: Option<String>,

    /// Days back for --list.
    #[arg(long, default_value = "7")]
    pub days: i64,
}

impl R2Args {
    fn is_default(&self) -> bool {
        !self.analyze && self.recent.is_none() && !self.conflicts && self.list.is_none()
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let Some(url) = config.database_url.as_deref() else {
        anyhow::bail!("DATABASE_URL is not set");
    };
    Ok(Database::connect(url).await?)
}

pub(crate) async fn run_db_command(args: DbArgs) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    match args.command {
        DbCommand::Setup { reset } => run_db_setup(&config, reset).await,
        command => run_db_query(&config, command).await,
    }
}

async fn run_db_setup(config: &AppConfig, reset: bool) -> anyhow::Result<()> {
    let Some(url) = config.database_url.as_deref() else {
        anyhow::bail!("DATABASE_URL is not set");
    };
    if ensure_database_exists(url).await? {
        println!("Created database for {}", redact_database_url(url));
    }
    let db = Database::connect(url).await?;
    if reset {
        db.reset().await?;
        println!("Dropped all tables");
    }
    let applied = db.run_migrations().await?;
    println!("Applied {} migration(s)", applied);
    println!("Connected to {}", db.server_version().await?);
    Ok(())
}

async fn run_db_query(config: &AppConfig, command: DbCommand) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let api = RedditDataApi::new(&db);

    match command {
        DbCommand::Setup { reset } => return run_db_setup(config, reset).await,
        DbCommand::Status => {
            let overview = api.database_overview().await?;
            println!("Server: {}", db.server_version().await?);
            println!("\nTable counts:");
            for (table, count) in &overview.table_counts {
                println!("  {:<24} {}", table, count);
            }
            println!("\nTop subreddits by submissions:");
            for entry in &overview.top_subreddits_by_submissions {
                println!("  r/{:<22} {}", entry.name, entry.count);
            }
            println!("\nTop subreddits by comments:");
            for entry in &overview.top_subreddits_by_comments {
                println!("  r/{:<22} {}", entry.name, entry.count);
            }
            println!("\nTop comment authors:");
            for entry in &overview.top_comment_authors {
                println!("  u/{:<22} {}", entry.name, entry.count);
            }
            println!(
                "\nAverage score: submissions {:.1}, comments {:.1}",
                overview.avg_submission_score, overview.avg_comment_score
            );
        }
        DbCommand::Post { reddit_id, format } => {
            let Some(post) = api.submission_with_comments(&reddit_id).await? else {
                anyhow::bail!("Post {} not found", reddit_id);
            };
            println!("{}", render_post(&post, format)?);
        }
        DbCommand::Recent {
            subreddit,
            limit,
            days,
        } => {
            let rows = api
                .recent_submissions(subreddit.as_deref(), limit, days)
                .await?;
            print_json(&rows)?;
        }
        DbCommand::Search {
            keywords,
            subreddit,
            limit,
        } => {
            let rows = api
                .search_submissions(&keywords, subreddit.as_deref(), limit)
                .await?;
            print_json(&rows)?;
        }
        DbCommand::Top {
            subreddit,
            days,
            limit,
        } => {
            let rows = api.top_submissions(subreddit.as_deref(), days, limit).await?;
            print_json(&rows)?;
        }
        DbCommand::Author { author, limit } => {
            print_json(&api.content_by_author(&author, limit).await?)?;
        }
        DbCommand::Stats { subreddit } => {
            let Some(stats) = api.subreddit_stats(&subreddit).await? else {
                anyhow::bail!("No data for r/{}", subreddit);
            };
            print_json(&stats)?;
        }
        DbCommand::Sessions { subreddit, limit } => {
            print_json(&api.session_history(subreddit.as_deref(), limit).await?)?;
        }
        DbCommand::Pending {
            processor,
            content_type,
            limit,
        } => {
            let items = ProcessingQueue::new(db.pool().clone())
                .pending_items(processor.as_deref(), content_type, limit)
                .await?;
            print_json(&items)?;
        }
    }
    Ok(())
}

fn print_objects(objects: &[ObjectSummary]) {
    if objects.is_empty() {
        println!("  (none)");
    }
    for object in objects {
        println!(
            "  {}  {:>9.2} MB  {}",
            object.last_modified.format("%Y-%m-%d %H:%M"),
            object.size_mb,
            object.key
        );
    }
}

pub(crate) async fn run_r2_command(args: R2Args) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let store = R2Store::new(config.r2()?)?;
    let store: &dyn ObjectStore = &store;
    println!("Bucket: {}", store.bucket());

    if args.analyze {
        for report in analyze_prefixes(store).await? {
            println!("\n{} ({}/), last 7 days:", report.label, report.prefix);
            print_objects(&report.objects);
        }
    }

    if let Some(prefix) = &args.list {
        println!("\nObjects under '{}' (last {} days):", prefix, args.days);
        print_objects(&store.list_objects(prefix, args.days).await?);
    }

    let recent_hours = args.recent.or(args.is_default().then_some(24));
    if let Some(hours) = recent_hours {
        println!("\nUploads in the last {} hours:", hours);
        print_objects(&recent_uploads(store, hours, Utc::now()).await?);
    }

    if args.conflicts || args.is_default() {
        let conflicts = find_naming_conflicts(store).await?;
        if conflicts.is_empty() {
            println!("\nNo naming conflicts");
        } else {
            println!("\nNaming conflicts:");
            for (group, objects) in &conflicts {
                println!("  {} ({} files)", group, objects.len());
                print_objects(objects);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_r2_default_mode() {
        let args = R2Args::try_parse_from(["r2"]).expect("should parse");
        assert!(args.is_default());

        let args = R2Args::try_parse_from(["r2", "--recent", "6"]).expect("should parse");
        assert!(!args.is_default());
        assert_eq!(args.recent, Some(6));
    }

    #[test]
    fn test_db_post_format() {
        let args = DbArgs::try_parse_from(["db", "post", "abc123", "--format", "simple"])
            .expect("should parse");
        match args.command {
            DbCommand::Post { reddit_id, format } => {
                assert_eq!(reddit_id, "abc123");
                assert_eq!(format, ReportFormat::Simple);
            }
            _ => panic!("Expected post"),
        }
        assert!(DbArgs::try_parse_from(["db", "post", "abc", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_db_search_requires_keywords() {
        assert!(DbArgs::try_parse_from(["db", "search"]).is_err());
        let args =
            DbArgs::try_parse_from(["db", "search", "cashback", "lounge"]).expect("should parse");
        match args.command {
            DbCommand::Search { keywords, limit, .. } => {
                assert_eq!(keywords, vec!["cashback", "lounge"]);
                assert_eq!(limit, 20);
            }
            _ => panic!("Expected search"),
        }
    }

    #[test]
    fn test_db_pending_content_type() {
        let args = DbArgs::try_parse_from(["db", "pending", "-t", "comment"]).expect("should parse");
        match args.command {
            DbCommand::Pending { content_type, .. } => {
                assert_eq!(content_type, Some(ContentType::Comment))
            }
            _ => panic!("Expected pending"),
        }
    }
}
