//! PostgreSQL connection handling and setup helpers.

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use thiserror::Error;
use tracing::info;

use super::migrations::MigrationRunner;
use super::records::RecordError;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),

    /// A scraped item could not be turned into a row.
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    /// The database URL could not be interpreted.
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    /// Reading a scrape file failed.
    #[error("Scrape file error: {0}")]
    ScrapeFile(#[from] crate::error::ScrapeError),
}

/// PostgreSQL database client.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects to the database and returns a new client.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        info!(url = %redact_database_url(database_url), "Connected to database");
        Ok(Self { pool })
    }

    /// Creates a new database client from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations, returning how many statements were applied.
    pub async fn run_migrations(&self) -> Result<usize, DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        Ok(runner.run_migrations().await?)
    }

    /// Drops all tables. Destroys data.
    pub async fn reset(&self) -> Result<(), DatabaseError> {
        MigrationRunner::new(self.pool.clone())
            .reset_database()
            .await?;
        Ok(())
    }

    /// Round-trips `SELECT 1`.
    pub async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// `SELECT version()`.
    pub async fn server_version(&self) -> Result<String, DatabaseError> {
        let row = sqlx::query("SELECT version() AS version")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("version"))
    }
}

/// Creates the database named in `database_url` if it does not exist, by
/// connecting to the `postgres` maintenance database on the same server.
///
/// Returns true when the database was created.
pub async fn ensure_database_exists(database_url: &str) -> Result<bool, DatabaseError> {
    let (maintenance_url, name) = split_database_name(database_url)?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maintenance_url)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(&name)
        .fetch_optional(&pool)
        .await?
        .is_some();

    if exists {
        info!(database = %name, "Database already exists");
        pool.close().await;
        return Ok(false);
    }

    let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\"\""));
    sqlx::query(&statement).execute(&pool).await?;
    pool.close().await;
    info!(database = %name, "Created database");
    Ok(true)
}

/// Splits a Postgres URL into (URL pointing at `postgres`, database name).
pub fn split_database_name(database_url: &str) -> Result<(String, String), DatabaseError> {
    let (base, query) = match database_url.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (database_url, None),
    };
    let scheme_end = base
        .find("://")
        .map(|i| i + 3)
        .ok_or_else(|| DatabaseError::InvalidUrl("missing scheme".to_string()))?;
    let slash = base[scheme_end..]
        .rfind('/')
        .map(|i| scheme_end + i)
        .ok_or_else(|| DatabaseError::InvalidUrl("missing database name".to_string()))?;
    let name = &base[slash + 1..];
    if name.is_empty() {
        return Err(DatabaseError::InvalidUrl("missing database name".to_string()));
    }

    let mut maintenance = format!("{}/postgres", &base[..slash]);
    if let Some(q) = query {
        maintenance.push('?');
        maintenance.push_str(q);
    }
    Ok((maintenance, name.to_string()))
}

/// Hides credentials: everything after the last `@` becomes `[REDACTED]`.
/// URLs without `@` are returned unchanged.
pub fn redact_database_url(url: &str) -> String {
    match url.rsplit_once('@') {
        Some((prefix, _)) => format!("{}@[REDACTED]", prefix),
        None => url.to_string(),
    }
}
