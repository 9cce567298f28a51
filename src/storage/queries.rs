//! Read-side queries over stored Reddit data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::database::{Database, DatabaseError};
use super::schema::TABLES;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: Uuid,
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub url: String,
    pub permalink: String,
    pub selftext: Option<String>,
    pub author: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub score: i32,
    pub upvote_ratio: Option<f64>,
    pub num_comments: i32,
    pub link_flair_text: Option<String>,
    pub processing_status: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CommentRow {
    pub id: Uuid,
    pub reddit_id: String,
    pub body: String,
    pub author: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub score: i32,
    pub parent_id: String,
    pub depth: i32,
    pub is_submitter: bool,
}

/// A submission and its stored comments, ordered by score.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionWithComments {
    pub submission: SubmissionRow,
    pub comments: Vec<CommentRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubredditStats {
    pub name: String,
    pub total_submissions: i64,
    pub total_comments: i64,
    pub avg_submission_score: f64,
    pub max_submission_score: i32,
    pub unique_authors: i64,
    pub submissions_last_7_days: i64,
    pub last_scraped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub subreddit: String,
    pub task_id: Option<String>,
    pub task_type: String,
    pub category: String,
    pub n_results: Option<i32>,
    pub keywords: Option<String>,
    pub time_filter: Option<String>,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i32>,
    pub submissions_found: i32,
    pub submissions_scraped: i32,
    pub comments_scraped: i32,
    pub error_message: Option<String>,
}

/// An author's comment with the title of the submission it belongs to.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuthorComment {
    pub reddit_id: String,
    pub body: String,
    pub score: i32,
    pub created_utc: DateTime<Utc>,
    pub submission_title: String,
    pub subreddit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorContent {
    pub author: String,
    pub submissions: Vec<SubmissionRow>,
    pub comments: Vec<AuthorComment>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NamedCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseOverview {
    pub table_counts: BTreeMap<String, i64>,
    pub top_subreddits_by_submissions: Vec<NamedCount>,
    pub top_subreddits_by_comments: Vec<NamedCount>,
    pub top_comment_authors: Vec<NamedCount>,
    pub avg_submission_score: f64,
    pub avg_comment_score: f64,
}

const SUBMISSION_COLUMNS: &str = r#"
    s.id, s.reddit_id, sr.name AS subreddit, s.title, s.url, s.permalink,
    s.selftext, s.author, s.created_utc, s.score, s.upvote_ratio,
    s.num_comments, s.link_flair_text, s.processing_status
"#;

/// Query API for consumers of the stored data.
#[derive(Clone)]
pub struct RedditDataApi {
    pool: PgPool,
}

impl RedditDataApi {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Newest submissions created within `days_back` days.
    pub async fn recent_submissions(
        &self,
        subreddit: Option<&str>,
        limit: i64,
        days_back: i64,
    ) -> Result<Vec<SubmissionRow>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {SUBMISSION_COLUMNS}
            FROM submissions s
            JOIN subreddits sr ON sr.id = s.subreddit_id
            WHERE s.created_utc >= NOW() - make_interval(days => $1::INT)
              AND ($2::TEXT IS NULL OR LOWER(sr.name) = LOWER($2))
            ORDER BY s.created_utc DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(days_back.clamp(0, i64::from(i32::MAX)) as i32)
            .bind(subreddit)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Submissions whose title or body contains any of `keywords`,
    /// case-insensitively, highest score first.
    pub async fn search_submissions(
        &self,
        keywords: &[String],
        subreddit: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SubmissionRow>, DatabaseError> {
        let patterns = like_patterns(keywords);
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {SUBMISSION_COLUMNS}
            FROM submissions s
            JOIN subreddits sr ON sr.id = s.subreddit_id
            WHERE (s.title ILIKE ANY($1) OR s.selftext ILIKE ANY($1))
              AND ($2::TEXT IS NULL OR LOWER(sr.name) = LOWER($2))
            ORDER BY s.score DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(&patterns)
            .bind(subreddit)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn submission_with_comments(
        &self,
        reddit_id: &str,
    ) -> Result<Option<SubmissionWithComments>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {SUBMISSION_COLUMNS}
            FROM submissions s
            JOIN subreddits sr ON sr.id = s.subreddit_id
            WHERE s.reddit_id = $1
            "#
        );
        let Some(submission) = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(reddit_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let comments = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, reddit_id, body, author, created_utc, score, parent_id,
                   depth, is_submitter
            FROM comments
            WHERE submission_id = $1
            ORDER BY score DESC, created_utc ASC
            "#,
        )
        .bind(submission.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(SubmissionWithComments {
            submission,
            comments,
        }))
    }

    /// Highest-scoring submissions created within `days_back` days.
    pub async fn top_submissions(
        &self,
        subreddit: Option<&str>,
        days_back: i64,
        limit: i64,
    ) -> Result<Vec<SubmissionRow>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {SUBMISSION_COLUMNS}
            FROM submissions s
            JOIN subreddits sr ON sr.id = s.subreddit_id
            WHERE s.created_utc >= NOW() - make_interval(days => $1::INT)
              AND ($2::TEXT IS NULL OR LOWER(sr.name) = LOWER($2))
            ORDER BY s.score DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(days_back.clamp(0, i64::from(i32::MAX)) as i32)
            .bind(subreddit)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn subreddit_stats(&self, name: &str) -> Result<Option<SubredditStats>, DatabaseError> {
        let Some(row) = sqlx::query(
            r#"
            SELECT
                sr.name,
                sr.last_scraped_at,
                (SELECT COUNT(*) FROM submissions s WHERE s.subreddit_id = sr.id) AS total_submissions,
                (SELECT COUNT(*) FROM comments c WHERE c.subreddit_id = sr.id) AS total_comments,
                (SELECT COALESCE(AVG(s.score), 0)::DOUBLE PRECISION
                    FROM submissions s WHERE s.subreddit_id = sr.id) AS avg_score,
                (SELECT COALESCE(MAX(s.score), 0)
                    FROM submissions s WHERE s.subreddit_id = sr.id) AS max_score,
                (SELECT COUNT(DISTINCT s.author)
                    FROM submissions s WHERE s.subreddit_id = sr.id) AS unique_authors,
                (SELECT COUNT(*) FROM submissions s
                    WHERE s.subreddit_id = sr.id
                      AND s.created_utc >= NOW() - INTERVAL '7 days') AS recent_submissions
            FROM subreddits sr
            WHERE LOWER(sr.name) = LOWER($1)
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        Ok(Some(SubredditStats {
            name: row.get("name"),
            total_submissions: row.get("total_submissions"),
            total_comments: row.get("total_comments"),
            avg_submission_score: row.get("avg_score"),
            max_submission_score: row.get("max_score"),
            unique_authors: row.get("unique_authors"),
            submissions_last_7_days: row.get("recent_submissions"),
            last_scraped_at: row.get("last_scraped_at"),
        }))
    }

    /// Most recent scrape sessions.
    pub async fn session_history(
        &self,
        subreddit: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SessionRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT ss.id, sr.name AS subreddit, ss.task_id, ss.task_type, ss.category,
                   ss.n_results, ss.keywords, ss.time_filter, ss.status, ss.started_at,
                   ss.completed_at, ss.duration_seconds, ss.submissions_found,
                   ss.submissions_scraped, ss.comments_scraped, ss.error_message
            FROM scrape_sessions ss
            JOIN subreddits sr ON sr.id = ss.subreddit_id
            WHERE ($1::TEXT IS NULL OR LOWER(sr.name) = LOWER($1))
            ORDER BY ss.started_at DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(subreddit)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Submissions and comments written by `author`, newest first.
    pub async fn content_by_author(
        &self,
        author: &str,
        limit: i64,
    ) -> Result<AuthorContent, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {SUBMISSION_COLUMNS}
            FROM submissions s
            JOIN subreddits sr ON sr.id = s.subreddit_id
            WHERE s.author = $1
            ORDER BY s.created_utc DESC
            LIMIT $2
            "#
        );
        let submissions = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(author)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let comments = sqlx::query_as::<_, AuthorComment>(
            r#"
            SELECT c.reddit_id, c.body, c.score, c.created_utc,
                   s.title AS submission_title, sr.name AS subreddit
            FROM comments c
            JOIN submissions s ON s.id = c.submission_id
            JOIN subreddits sr ON sr.id = c.subreddit_id
            WHERE c.author = $1
            ORDER BY c.created_utc DESC
            LIMIT $2
            "#,
        )
        .bind(author)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(AuthorContent {
            author: author.to_string(),
            submissions,
            comments,
        })
    }

    pub async fn database_overview(&self) -> Result<DatabaseOverview, DatabaseError> {
        let mut table_counts = BTreeMap::new();
        for table in TABLES {
            // table names come from a fixed list
            let count: i64 = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {}", table))
                .fetch_one(&self.pool)
                .await?
                .get("count");
            table_counts.insert(table.to_string(), count);
        }

        let top_subreddits_by_submissions = self
            .named_counts(
                r#"
                SELECT sr.name, COUNT(s.id) AS count
                FROM subreddits sr
                LEFT JOIN submissions s ON s.subreddit_id = sr.id
                GROUP BY sr.name
                ORDER BY count DESC
                LIMIT 10
                "#,
            )
            .await?;
        let top_subreddits_by_comments = self
            .named_counts(
                r#"
                SELECT sr.name, COUNT(c.id) AS count
                FROM subreddits sr
                LEFT JOIN comments c ON c.subreddit_id = sr.id
                GROUP BY sr.name
                ORDER BY count DESC
                LIMIT 10
                "#,
            )
            .await?;
        let top_comment_authors = self
            .named_counts(
                r#"
                SELECT author AS name, COUNT(*) AS count
                FROM comments
                WHERE author IS NOT NULL AND author <> '[deleted]'
                GROUP BY author
                ORDER BY count DESC
                LIMIT 10
                "#,
            )
            .await?;

        let scores = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(AVG(score), 0)::DOUBLE PRECISION FROM submissions) AS submission_avg,
                (SELECT COALESCE(AVG(score), 0)::DOUBLE PRECISION FROM comments) AS comment_avg
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseOverview {
            table_counts,
            top_subreddits_by_submissions,
            top_subreddits_by_comments,
            top_comment_authors,
            avg_submission_score: scores.get("submission_avg"),
            avg_comment_score: scores.get("comment_avg"),
        })
    }

    async fn named_counts(&self, sql: &str) -> Result<Vec<NamedCount>, DatabaseError> {
        Ok(sqlx::query_as::<_, NamedCount>(sql)
            .fetch_all(&self.pool)
            .await?)
    }
}

/// `%keyword%` patterns for `ILIKE ANY`. Blank keywords are dropped and
/// LIKE wildcards in the input are escaped.
pub fn like_patterns(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            let escaped = k
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{}%", escaped)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_patterns() {
        let keywords = vec![
            "cashback".to_string(),
            "  ".to_string(),
            "100%_off".to_string(),
        ];
        assert_eq!(
            like_patterns(&keywords),
            vec!["%cashback%".to_string(), "%100\\%\\_off%".to_string()]
        );
    }

    #[test]
    fn test_like_patterns_empty() {
        assert!(like_patterns(&[]).is_empty());
    }

    #[tokio::test]
    #[ignore] // needs DATABASE_URL pointing at a live Postgres
    async fn test_overview_counts_every_table() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let db = Database::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        let overview = RedditDataApi::new(&db).database_overview().await.unwrap();
        assert_eq!(overview.table_counts.len(), TABLES.len());
    }
}
