//! Writes scrape output into Postgres.
//!
//! A scrape produces one `scrape_sessions` row. Its submissions and the
//! comments of each submission are inserted once per `reddit_id`; every new
//! row also gets a `processing_queue` item for downstream consumers.

use std::path::Path;

use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::database::{Database, DatabaseError};
use super::processing::{enqueue_item, COMMENT_PRIORITY, SUBMISSION_PRIORITY};
use super::records::{
    count_i32, flatten_comments, CommentRecord, ContentType, ScrapeStatus, SubmissionRecord,
    TaskType,
};
use crate::config::SubredditConfig;
use crate::error::ScrapeError;
use crate::scraper::{extract_reddit_id, extract_submission_urls, load_posts, ScrapeLayout};
use crate::tasks::ScrapeResult;

/// Optional fields applied by [`ScrapeIngestor::update_session_status`].
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub submissions_found: Option<i32>,
    pub submissions_scraped: Option<i32>,
    pub comments_scraped: Option<i32>,
    pub scrape_file_path: Option<String>,
    pub archive_path: Option<String>,
    pub r2_object_key: Option<String>,
    pub error_message: Option<String>,
}

/// Counts from one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Items present in the file.
    pub found: usize,
    /// Items newly inserted.
    pub inserted: usize,
}

/// An uploaded archive, as recorded in `archives`.
#[derive(Debug, Clone, Default)]
pub struct ArchiveRecord {
    pub filename: String,
    pub archive_type: String,
    pub file_path: Option<String>,
    pub r2_object_key: String,
    pub original_size_bytes: i64,
    pub compressed_size_bytes: i64,
    pub compression_ratio: f64,
    pub compression_level: i32,
    pub file_count: i32,
    pub subreddits_included: Option<String>,
    pub total_submissions: i32,
    pub total_comments: i32,
    pub upload_metadata: Option<Value>,
    pub is_deleted_locally: bool,
}

/// Inserts sessions, submissions, comments, archives and metrics.
#[derive(Clone)]
pub struct ScrapeIngestor {
    pool: PgPool,
}

impl ScrapeIngestor {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Creates a pending session for `config`, registering the subreddit if
    /// it is new.
    pub async fn create_scrape_session(
        &self,
        task_id: &str,
        task_type: TaskType,
        config: &SubredditConfig,
        config_id: Option<i32>,
    ) -> Result<Uuid, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let subreddit_id = subreddit_id(&mut tx, &config.name).await?;

        let session_id = Uuid::new_v4();
        let options = serde_json::to_value(&config.options)?;
        sqlx::query(
            r#"
            INSERT INTO scrape_sessions (
                id, session_name, task_id, task_type, config_id, subreddit_id,
                category, n_results, keywords, time_filter, status,
                file_format, scrape_options
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $12)
            "#,
        )
        .bind(session_id)
        .bind(format!("{} {}", task_type, config.describe()))
        .bind(task_id)
        .bind(task_type.as_str())
        .bind(config_id)
        .bind(subreddit_id)
        .bind(config.category.code())
        .bind(config.n_results.map(count_i32))
        .bind(config.keywords.as_deref())
        .bind(config.time_filter.map(|tf| tf.as_str()))
        .bind(if config.options.csv { "csv" } else { "json" })
        .bind(options)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE subreddits
            SET total_scrapes = total_scrapes + 1, last_scraped_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(subreddit_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(session = %session_id, subreddit = %config.name, "Created scrape session");
        Ok(session_id)
    }

    /// Moves a session to `status`. `running` stamps `started_at`; `success`
    /// and `failed` stamp `completed_at` and `duration_seconds`.
    pub async fn update_session_status(
        &self,
        session_id: Uuid,
        status: ScrapeStatus,
        update: SessionUpdate,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_sessions SET
                status = $2,
                started_at = CASE WHEN $2 = 'running' THEN NOW() ELSE started_at END,
                completed_at = CASE
                    WHEN $2 IN ('success', 'failed') THEN NOW()
                    ELSE completed_at
                END,
                duration_seconds = CASE
                    WHEN $2 IN ('success', 'failed') AND started_at IS NOT NULL
                        THEN EXTRACT(EPOCH FROM (NOW() - started_at))::INTEGER
                    ELSE duration_seconds
                END,
                submissions_found = COALESCE($3, submissions_found),
                submissions_scraped = COALESCE($4, submissions_scraped),
                comments_scraped = COALESCE($5, comments_scraped),
                total_content_items = COALESCE($4, submissions_scraped)
                    + COALESCE($5, comments_scraped),
                scrape_file_path = COALESCE($6, scrape_file_path),
                archive_path = COALESCE($7, archive_path),
                r2_object_key = COALESCE($8, r2_object_key),
                error_message = COALESCE($9, error_message)
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .bind(update.submissions_found)
        .bind(update.submissions_scraped)
        .bind(update.comments_scraped)
        .bind(update.scrape_file_path)
        .bind(update.archive_path)
        .bind(update.r2_object_key)
        .bind(update.error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stores the submissions of a subreddit scrape file under `session_id`
    /// and marks the session `success`. A file that cannot be read marks the
    /// session `failed` and returns the error.
    pub async fn ingest_submissions(
        &self,
        session_id: Uuid,
        path: &Path,
    ) -> Result<IngestSummary, DatabaseError> {
        let posts = match load_posts(path) {
            Ok(posts) => posts,
            Err(e) => {
                self.update_session_status(
                    session_id,
                    ScrapeStatus::Failed,
                    SessionUpdate {
                        error_message: Some(e.to_string()),
                        ..SessionUpdate::default()
                    },
                )
                .await?;
                return Err(e.into());
            }
        };

        let row = sqlx::query("SELECT subreddit_id FROM scrape_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("scrape session {}", session_id)))?;
        let session_subreddit: i32 = row.get("subreddit_id");

        let mut summary = IngestSummary {
            found: posts.len(),
            inserted: 0,
        };
        for post in &posts {
            match self.insert_submission(session_id, session_subreddit, post).await {
                Ok(true) => summary.inserted += 1,
                Ok(false) => {}
                Err(e) => {
                    let id = post.get("id").and_then(Value::as_str).unwrap_or("?");
                    warn!(reddit_id = %id, error = %e, "Skipping submission");
                }
            }
        }

        self.update_session_status(
            session_id,
            ScrapeStatus::Success,
            SessionUpdate {
                submissions_found: Some(count_i32(summary.found)),
                submissions_scraped: Some(count_i32(summary.inserted)),
                scrape_file_path: Some(path.display().to_string()),
                ..SessionUpdate::default()
            },
        )
        .await?;

        info!(
            session = %session_id,
            found = summary.found,
            inserted = summary.inserted,
            "Ingested submissions"
        );
        Ok(summary)
    }

    /// Returns false when the submission already exists.
    async fn insert_submission(
        &self,
        session_id: Uuid,
        session_subreddit: i32,
        post: &Value,
    ) -> Result<bool, DatabaseError> {
        let record = SubmissionRecord::from_json(post)?;
        let mut tx = self.pool.begin().await?;

        let subreddit = match &record.subreddit {
            Some(name) => subreddit_id(&mut tx, name).await?,
            None => session_subreddit,
        };

        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO submissions (
                id, reddit_id, title, url, permalink, selftext, author,
                created_utc, score, upvote_ratio, num_comments, is_self,
                is_original_content, is_nsfw, is_spoiler, is_stickied, is_locked,
                distinguished, link_flair_text, subreddit_id, scrape_session_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (reddit_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&record.reddit_id)
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.permalink)
        .bind(&record.selftext)
        .bind(&record.author)
        .bind(record.created_utc)
        .bind(record.score)
        .bind(record.upvote_ratio)
        .bind(record.num_comments)
        .bind(record.is_self)
        .bind(record.is_original_content)
        .bind(record.is_nsfw)
        .bind(record.is_spoiler)
        .bind(record.is_stickied)
        .bind(record.is_locked)
        .bind(&record.distinguished)
        .bind(&record.link_flair_text)
        .bind(subreddit)
        .bind(session_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            enqueue_item(
                &mut tx,
                ContentType::Submission,
                id,
                &record.reddit_id,
                SUBMISSION_PRIORITY,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Stores the comments in a URS comment scrape (`data.comments`) under
    /// the already-stored submission `submission_reddit_id`.
    pub async fn ingest_comments(
        &self,
        submission_reddit_id: &str,
        path: &Path,
    ) -> Result<IngestSummary, DatabaseError> {
        let row = sqlx::query("SELECT id, subreddit_id FROM submissions WHERE reddit_id = $1")
            .bind(submission_reddit_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                DatabaseError::NotFound(format!("submission {}", submission_reddit_id))
            })?;
        let submission_id: Uuid = row.get("id");
        let subreddit: i32 = row.get("subreddit_id");

        let comments = load_comments(path)?;
        let flat = flatten_comments(&comments);
        let mut summary = IngestSummary {
            found: flat.len(),
            inserted: 0,
        };

        for (value, depth) in flat {
            let outcome = match CommentRecord::from_json(value, depth) {
                Ok(record) => self.insert_comment(&record, submission_id, subreddit).await,
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(true) => summary.inserted += 1,
                Ok(false) => {}
                Err(e) => {
                    let id = value.get("id").and_then(Value::as_str).unwrap_or("?");
                    warn!(reddit_id = %id, error = %e, "Skipping comment");
                }
            }
        }

        info!(
            submission = %submission_reddit_id,
            found = summary.found,
            inserted = summary.inserted,
            "Ingested comments"
        );
        Ok(summary)
    }

    async fn insert_comment(
        &self,
        record: &CommentRecord,
        submission_id: Uuid,
        subreddit: i32,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO comments (
                id, reddit_id, body, body_html, author, created_utc, score,
                parent_id, link_id, depth, is_submitter, is_stickied,
                distinguished, edited, submission_id, subreddit_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (reddit_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&record.reddit_id)
        .bind(&record.body)
        .bind(&record.body_html)
        .bind(&record.author)
        .bind(record.created_utc)
        .bind(record.score)
        .bind(&record.parent_id)
        .bind(&record.link_id)
        .bind(record.depth)
        .bind(record.is_submitter)
        .bind(record.is_stickied)
        .bind(&record.distinguished)
        .bind(record.edited)
        .bind(submission_id)
        .bind(subreddit)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            enqueue_item(
                &mut tx,
                ContentType::Comment,
                id,
                &record.reddit_id,
                COMMENT_PRIORITY,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Records an uploaded archive. Re-recording the same object key updates
    /// the existing row.
    pub async fn record_archive(&self, archive: &ArchiveRecord) -> Result<Uuid, DatabaseError> {
        let row = sqlx::query(
            r#"
            INSERT INTO archives (
                id, filename, archive_type, file_path, r2_object_key,
                original_size_bytes, compressed_size_bytes, compression_ratio,
                compression_level, file_count, uploaded_at, subreddits_included,
                total_submissions, total_comments, upload_metadata, is_uploaded,
                is_deleted_locally
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), $11, $12, $13, $14, TRUE, $15)
            ON CONFLICT (r2_object_key) DO UPDATE SET
                filename = EXCLUDED.filename,
                file_path = EXCLUDED.file_path,
                original_size_bytes = EXCLUDED.original_size_bytes,
                compressed_size_bytes = EXCLUDED.compressed_size_bytes,
                compression_ratio = EXCLUDED.compression_ratio,
                file_count = EXCLUDED.file_count,
                uploaded_at = NOW(),
                upload_metadata = EXCLUDED.upload_metadata,
                is_uploaded = TRUE,
                is_deleted_locally = EXCLUDED.is_deleted_locally
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&archive.filename)
        .bind(&archive.archive_type)
        .bind(&archive.file_path)
        .bind(&archive.r2_object_key)
        .bind(archive.original_size_bytes)
        .bind(archive.compressed_size_bytes)
        .bind(archive.compression_ratio)
        .bind(archive.compression_level)
        .bind(archive.file_count)
        .bind(&archive.subreddits_included)
        .bind(archive.total_submissions)
        .bind(archive.total_comments)
        .bind(&archive.upload_metadata)
        .bind(archive.is_deleted_locally)
        .fetch_one(&self.pool)
        .await?;

        let id: Uuid = row.get("id");
        info!(archive = %archive.filename, key = %archive.r2_object_key, "Recorded archive");
        Ok(id)
    }

    pub async fn record_metric(
        &self,
        session_id: Uuid,
        name: &str,
        value: f64,
        unit: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO task_metrics (id, session_id, metric_name, metric_value, metric_unit, task_metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(name)
        .bind(value)
        .bind(unit)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Persists a finished scrape: session, submissions, then the comments
    /// of every submission whose comment file is found under `layout`.
    /// The session ends with the scrape's own status.
    pub async fn save_scraping_results(
        &self,
        task_id: &str,
        task_type: TaskType,
        config: &SubredditConfig,
        result: &ScrapeResult,
        scrape_file: Option<&Path>,
        layout: &ScrapeLayout,
    ) -> Result<Uuid, DatabaseError> {
        let session_id = self
            .create_scrape_session(task_id, task_type, config, None)
            .await?;
        self.update_session_status(session_id, ScrapeStatus::Running, SessionUpdate::default())
            .await?;

        let mut ingest_error = None;
        let mut comments_stored = 0usize;
        if let Some(file) = scrape_file.filter(|f| f.is_file()) {
            match self.ingest_submissions(session_id, file).await {
                Ok(_) => comments_stored = self.ingest_comment_files(file, layout).await,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Submission ingestion failed");
                    ingest_error = Some(e.to_string());
                }
            }
        }

        let (status, error) = match ingest_error {
            Some(e) => (ScrapeStatus::Failed, Some(e)),
            None => (result.status, result.error.clone()),
        };
        self.update_session_status(
            session_id,
            status,
            SessionUpdate {
                submissions_found: Some(count_i32(result.submissions_found)),
                comments_scraped: Some(
                    count_i32(result.comments_scraped).max(count_i32(comments_stored)),
                ),
                scrape_file_path: scrape_file.map(|f| f.display().to_string()),
                error_message: error,
                ..SessionUpdate::default()
            },
        )
        .await?;

        if let Some(elapsed) = result.duration_secs {
            if let Err(e) = self
                .record_metric(session_id, "scrape_duration", elapsed, Some("seconds"), None)
                .await
            {
                warn!(error = %e, "Failed to record scrape duration");
            }
        }

        Ok(session_id)
    }

    async fn ingest_comment_files(&self, scrape_file: &Path, layout: &ScrapeLayout) -> usize {
        let urls = match extract_submission_urls(scrape_file) {
            Ok(urls) => urls,
            Err(e) => {
                warn!(error = %e, "Could not read submission URLs");
                return 0;
            }
        };

        let mut stored = 0;
        for url in urls {
            let reddit_id = extract_reddit_id(&url);
            let Some(comments_file) = layout.find_comments_file(&reddit_id) else {
                continue;
            };
            match self.ingest_comments(&reddit_id, &comments_file).await {
                Ok(summary) => stored += summary.inserted,
                Err(e) => warn!(submission = %reddit_id, error = %e, "Comment ingestion failed"),
            }
        }
        stored
    }
}

/// Id of the `subreddits` row for `name`, inserting it if needed.
async fn subreddit_id(conn: &mut PgConnection, name: &str) -> Result<i32, DatabaseError> {
    let row = sqlx::query(
        r#"
        INSERT INTO subreddits (name, display_name)
        VALUES ($1, $1)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(name)
    .fetch_one(conn)
    .await?;
    Ok(row.get("id"))
}

/// The `data.comments` array of a URS comment scrape. A top-level
/// `comments` key or a bare array is accepted too.
pub fn load_comments(path: &Path) -> Result<Vec<Value>, ScrapeError> {
    let content = std::fs::read_to_string(path)?;
    let mut doc: Value = serde_json::from_str(&content)?;
    let comments = if doc.is_array() {
        Some(doc)
    } else {
        doc.pointer_mut("/data/comments")
            .map(Value::take)
            .or_else(|| doc.get_mut("comments").map(Value::take))
    };
    match comments {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ScrapeError::MalformedScrapeFile {
            path: path.to_path_buf(),
            reason: "missing 'data.comments' array".to_string(),
        }),
    }
}
