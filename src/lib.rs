//! subreddit-harvest: scheduled subreddit scraping with URS.
//!
//! Scrape jobs flow through a Redis queue to a worker pool. Each run drives
//! the URS command line, zips the output, uploads it to Cloudflare R2 and
//! indexes submissions and comments in PostgreSQL.

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod objectstore;
pub mod scheduler;
pub mod scraper;
pub mod storage;
pub mod tasks;

// Re-export commonly used error types
pub use config::ConfigError;
pub use error::{ArchiveError, ObjectStoreError, ScrapeError, TaskError};
pub use storage::DatabaseError;
