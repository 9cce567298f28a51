//! The `processing_queue` table: work items for downstream consumers.
//!
//! Every newly stored submission (priority 1) and comment (priority 0) gets a
//! pending item. Consumers claim items with [`ProcessingQueue::mark_processing`]
//! and report back with `mark_completed` / `mark_failed`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::database::DatabaseError;
use super::records::{ContentType, ProcessingStatus};

/// Priority of submission items.
pub const SUBMISSION_PRIORITY: i32 = 1;
/// Priority of comment items.
pub const COMMENT_PRIORITY: i32 = 0;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: Uuid,
    pub content_type: String,
    pub content_id: Uuid,
    pub reddit_id: String,
    pub priority: i32,
    pub processor_name: Option<String>,
    pub retry_count: i32,
    pub queued_at: DateTime<Utc>,
}

/// Inserts a pending item on an open connection or transaction.
pub(crate) async fn enqueue_item(
    conn: &mut PgConnection,
    content_type: ContentType,
    content_id: Uuid,
    reddit_id: &str,
    priority: i32,
) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO processing_queue (id, content_type, content_id, reddit_id, priority)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(content_type.as_str())
    .bind(content_id)
    .bind(reddit_id)
    .bind(priority)
    .execute(conn)
    .await?;
    Ok(id)
}

/// Handle on the downstream processing queue.
#[derive(Clone)]
pub struct ProcessingQueue {
    pool: PgPool,
}

impl ProcessingQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pending items, highest priority first, oldest first within a priority.
    pub async fn pending_items(
        &self,
        processor: Option<&str>,
        content_type: Option<ContentType>,
        limit: i64,
    ) -> Result<Vec<QueueItem>, DatabaseError> {
        let items = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT id, content_type, content_id, reddit_id, priority,
                   processor_name, retry_count, queued_at
            FROM processing_queue
            WHERE processing_status = 'pending'
              AND ($1::TEXT IS NULL OR processor_name = $1)
              AND ($2::TEXT IS NULL OR content_type = $2)
            ORDER BY priority DESC, queued_at ASC
            LIMIT $3
            "#,
        )
        .bind(processor)
        .bind(content_type.map(|c| c.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Claims a pending item. Returns false if it was not pending.
    pub async fn mark_processing(&self, id: Uuid, processor: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE processing_queue
            SET processing_status = 'processing',
                processor_name = $2,
                started_processing_at = NOW()
            WHERE id = $1 AND processing_status = 'pending'
            "#,
        )
        .bind(id)
        .bind(processor)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_completed(
        &self,
        id: Uuid,
        result: Option<&serde_json::Value>,
    ) -> Result<bool, DatabaseError> {
        let outcome = sqlx::query(
            r#"
            UPDATE processing_queue
            SET processing_status = 'completed',
                completed_at = NOW(),
                processing_result = COALESCE($2, processing_result)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Records a failure. The item returns to pending while retries remain,
    /// otherwise it is failed for good. Returns the new status.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<ProcessingStatus, DatabaseError> {
        let row = sqlx::query(
            r#"
            UPDATE processing_queue
            SET retry_count = retry_count + 1,
                error_message = $2,
                processing_status = CASE
                    WHEN retry_count + 1 < max_retries THEN 'pending'
                    ELSE 'failed'
                END,
                completed_at = CASE
                    WHEN retry_count + 1 < max_retries THEN NULL
                    ELSE NOW()
                END
            WHERE id = $1
            RETURNING processing_status
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("processing item {}", id)))?;

        let status: String = row.get("processing_status");
        Ok(status.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities() {
        assert!(SUBMISSION_PRIORITY > COMMENT_PRIORITY);
    }

    #[tokio::test]
    #[ignore] // needs DATABASE_URL pointing at a migrated Postgres
    async fn test_mark_failed_returns_to_pending() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let db = crate::storage::Database::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let id = enqueue_item(&mut conn, ContentType::Comment, Uuid::new_v4(), "zz9", 0)
            .await
            .unwrap();
        drop(conn);

        let queue = ProcessingQueue::new(db.pool().clone());
        assert!(queue.mark_processing(id, "tester").await.unwrap());
        assert!(!queue.mark_processing(id, "tester").await.unwrap());
        assert_eq!(
            queue.mark_failed(id, "boom").await.unwrap(),
            ProcessingStatus::Pending
        );
    }
}
