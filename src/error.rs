//! Error types for subreddit-harvest operations.
//!
//! Errors that belong to a single backend live next to it (`QueueError`,
//! `DatabaseError`, `ConfigError`, ...). This module holds the ones shared by
//! the scraping, archiving, upload and task layers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while driving the URS scraper or reading its output.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Failed to spawn URS command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("URS command is empty")]
    EmptyCommand,

    #[error("URS process did not exit within {0:?}")]
    Timeout(Duration),

    #[error("Invalid category code '{0}' (expected one of h, n, t, r, c, s)")]
    InvalidCategory(String),

    #[error("Invalid time filter '{0}' (expected hour, day, week, month, year or all)")]
    InvalidTimeFilter(String),

    #[error("Invalid scrape target for r/{subreddit}: {reason}")]
    InvalidTarget { subreddit: String, reason: String },

    #[error("Invalid subreddit name '{0}'")]
    InvalidSubreddit(String),

    #[error("Scrape file {path} is malformed: {reason}")]
    MalformedScrapeFile { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while building zip archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Source directory {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("Path {path} is outside the archive root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the R2 object store.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("R2 upload of {key} failed: {message}")]
    UploadFailed { key: String, message: String },

    #[error("R2 listing failed: {0}")]
    ListFailed(String),

    #[error("R2 head_object for {key} failed: {message}")]
    HeadFailed { key: String, message: String },

    #[error("R2 delete of {key} failed: {message}")]
    DeleteFailed { key: String, message: String },

    #[error("Local file {0} does not exist")]
    FileMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while executing a queued task.
///
/// Any of these makes the worker pool schedule a retry (or dead-letter the
/// job once its attempts are spent).
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::storage::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::scheduler::QueueError),

    #[error("Scrapes directory {0} does not exist")]
    ScrapesDirMissing(PathBuf),

    #[error("Invalid config id {id}: {available}")]
    InvalidConfigId { id: usize, available: String },

    #[error("Unknown schedule '{0}'")]
    UnknownSchedule(String),

    #[error("Database integration is not configured (DATABASE_URL unset)")]
    DatabaseUnavailable,

    #[error("Job queue handle is not available to this executor")]
    QueueUnavailable,

    #[error("Failed to upload archive to R2")]
    UploadFailed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
