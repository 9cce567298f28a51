//! The harvest tasks run by workers.
//!
//! - [`Harvester`]: one subreddit scrape through URS, plus paced comment scrapes
//! - [`TaskRunner`]: the [`JobExecutor`](crate::scheduler::JobExecutor) that
//!   maps each [`TaskSpec`](crate::scheduler::TaskSpec) onto scraping,
//!   archiving, uploading and persistence

mod runner;
mod scrape;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use runner::{ArchiveUpload, TaskRunner};
pub use scrape::{pacing_delay, CommentPlan, Harvester};

use crate::config::SubredditConfig;
use crate::scraper::Category;
use crate::storage::ScrapeStatus;

/// Outcome of scraping one subreddit config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub status: ScrapeStatus,
    pub subreddit: String,
    pub category: Category,
    #[serde(default)]
    pub submissions_found: u32,
    #[serde(default)]
    pub comments_scraped: u32,
    #[serde(default)]
    pub scrape_file_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl ScrapeResult {
    fn new(config: &SubredditConfig, status: ScrapeStatus) -> Self {
        Self {
            status,
            subreddit: config.name.clone(),
            category: config.category,
            submissions_found: 0,
            comments_scraped: 0,
            scrape_file_path: None,
            error: None,
            duration_secs: None,
        }
    }

    pub fn skipped(config: &SubredditConfig) -> Self {
        Self::new(config, ScrapeStatus::Skipped)
    }

    pub fn failed(config: &SubredditConfig, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(config, ScrapeStatus::Failed)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ScrapeStatus::Success
    }
}
