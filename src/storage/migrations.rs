//! Schema migration runner.
//!
//! Statements from [`schema::all_schema_statements`] are applied one at a
//! time and recorded in `_migrations`, so re-running is a no-op.

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::schema;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration script failed to execute.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Migration runner for applying schema changes.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies every schema statement not yet recorded. Returns how many
    /// were applied.
    pub async fn run_migrations(&self) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;

        let mut applied = 0;
        for (idx, statement) in schema::all_schema_statements().iter().enumerate() {
            let migration_name = migration_name(idx);

            if !self.is_migration_applied(&migration_name).await? {
                debug!(migration = %migration_name, "Applying migration");
                self.apply_migration(&migration_name, statement).await?;
                applied += 1;
            }
        }

        info!(applied, "Migrations complete");
        Ok(applied)
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_migration_applied(&self, name: &str) -> Result<bool, MigrationError> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.is_some())
    }

    async fn apply_migration(&self, name: &str, sql: &str) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", name, e)))?;

        sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Returns a list of applied migrations.
    pub async fn list_applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_migrations_table().await?;

        let migrations: Vec<AppliedMigration> =
            sqlx::query_as("SELECT name, applied_at FROM _migrations ORDER BY applied_at")
                .fetch_all(&self.pool)
                .await?;

        Ok(migrations)
    }

    /// Drops every harvest table and the migration ledger.
    ///
    /// **WARNING**: This will destroy all data!
    pub async fn reset_database(&self) -> Result<(), MigrationError> {
        warn!("Dropping all harvest tables");
        for statement in drop_statements() {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MigrationError::MigrationFailed(format!("Drop failed: {}", e)))?;
        }

        Ok(())
    }
}

fn migration_name(idx: usize) -> String {
    format!("harvest_schema_{:02}", idx)
}

/// DROP statements in reverse dependency order, ledger last.
fn drop_statements() -> Vec<String> {
    schema::TABLES
        .iter()
        .rev()
        .chain(std::iter::once(&"_migrations"))
        .map(|table| format!("DROP TABLE IF EXISTS {} CASCADE", table))
        .collect()
}

/// Record of an applied migration.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    /// Name of the migration.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::MigrationFailed("test error".to_string());
        assert!(err.to_string().contains("test error"));
    }

    #[test]
    fn test_migration_names_are_stable() {
        assert_eq!(migration_name(0), "harvest_schema_00");
        assert_eq!(migration_name(12), "harvest_schema_12");
    }

    #[test]
    fn test_drop_order_is_reverse_of_creation() {
        let drops = drop_statements();
        assert_eq!(drops.len(), schema::TABLES.len() + 1);
        assert!(drops[0].contains("task_metrics"));
        assert!(drops[schema::TABLES.len() - 1].contains("subreddits"));
        assert!(drops.last().unwrap().contains("_migrations"));
    }
}
