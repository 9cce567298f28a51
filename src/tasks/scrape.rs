//! Scraping one subreddit config end to end.

use std::time::{Duration, Instant};

use rand::RngExt;
use tracing::{error, info, warn};

use super::ScrapeResult;
use crate::config::{ScrapeCatalog, SubredditConfig};
use crate::scraper::{extract_submission_urls, Category, ScrapeLayout, UrsRunner};
use crate::storage::ScrapeStatus;

/// Whether and how comments are scraped after a subreddit scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentPlan {
    pub enabled: bool,
    /// Comments per submission; 0 means all.
    pub n_comments: u32,
    /// Inclusive bounds, in seconds, of the pause between submissions.
    pub delay_range: (u64, u64),
}

impl CommentPlan {
    /// Comment scraping as configured in the catalog.
    pub fn from_catalog(catalog: &ScrapeCatalog) -> Self {
        Self {
            enabled: catalog.comment_scraping_active(),
            n_comments: catalog.effective_comment_limit(),
            delay_range: catalog.comments.delay_range,
        }
    }

    /// Every comment of every submission, regardless of catalog flags.
    pub fn all_comments(delay_range: (u64, u64)) -> Self {
        Self {
            enabled: true,
            n_comments: 0,
            delay_range,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            n_comments: 0,
            delay_range: (0, 0),
        }
    }

    /// Search results never get comment scrapes.
    pub fn applies_to(&self, category: Category) -> bool {
        self.enabled && !category.is_search()
    }
}

/// A random pause drawn uniformly from `delay_range` (seconds, inclusive).
pub fn pacing_delay(delay_range: (u64, u64)) -> Duration {
    let (lo, hi) = delay_range;
    let (lo, hi) = (lo.min(hi) as f64, lo.max(hi) as f64);
    let secs: f64 = rand::rng().random_range(lo..=hi);
    Duration::from_secs_f64(secs)
}

/// Runs URS scrapes and reads back their output.
#[derive(Debug, Clone)]
pub struct Harvester {
    urs: UrsRunner,
    layout: ScrapeLayout,
}

impl Harvester {
    pub fn new(urs: UrsRunner, layout: ScrapeLayout) -> Self {
        Self { urs, layout }
    }

    pub fn layout(&self) -> &ScrapeLayout {
        &self.layout
    }

    /// A copy whose URS runs are each limited to `timeout` after the prompt.
    pub fn with_operation_timeout(&self, timeout: Duration) -> Self {
        Self {
            urs: self.urs.clone().with_operation_timeout(timeout),
            layout: self.layout.clone(),
        }
    }

    /// Worst-case wall time of [`Harvester::process_subreddit_config`]: one
    /// subreddit run, file discovery, then a comment run per submission with
    /// the longest pause between them.
    pub fn time_budget(&self, config: &SubredditConfig, comments: &CommentPlan) -> Duration {
        if !config.enabled {
            return Duration::ZERO;
        }
        let posts = if comments.applies_to(config.category) {
            config.n_results.unwrap_or(0)
        } else {
            0
        };
        let pauses = posts.saturating_sub(1);
        let max_delay = Duration::from_secs(comments.delay_range.0.max(comments.delay_range.1));
        self.urs.max_run_time() * (1 + posts)
            + self.layout.discovery_budget()
            + max_delay * pauses
    }

    /// Scrapes `config`, then the comments of every submission found when
    /// `comments` applies to its category.
    ///
    /// Never returns an error: failures are reported in the result.
    pub async fn process_subreddit_config(
        &self,
        config: &SubredditConfig,
        comments: &CommentPlan,
    ) -> ScrapeResult {
        if !config.enabled {
            info!(subreddit = %config.name, "Config disabled, skipping");
            return ScrapeResult::skipped(config);
        }
        let target = match config.target() {
            Ok(target) => target,
            Err(e) => return ScrapeResult::failed(config, e.to_string()),
        };

        info!(config = %config.describe(), "Processing subreddit config");
        let start = Instant::now();

        match self
            .urs
            .scrape_subreddit(
                &config.name,
                config.category,
                &target,
                config.time_filter,
                &config.options,
            )
            .await
        {
            Ok(run) if !run.succeeded() => {
                warn!(subreddit = %config.name, outcome = ?run.outcome, exit_code = ?run.exit_code, "URS run did not finish cleanly");
            }
            Ok(_) => {}
            Err(e) => {
                error!(subreddit = %config.name, error = %e, "URS scrape failed");
                return ScrapeResult::failed(config, e.to_string());
            }
        }

        let Some(scrape_file) = self
            .layout
            .find_scrape_file(&config.name, config.category, &target)
            .await
        else {
            error!(subreddit = %config.name, "Could not find scrape file");
            return ScrapeResult {
                duration_secs: Some(start.elapsed().as_secs_f64()),
                ..ScrapeResult::failed(config, "Could not find scrape file")
            };
        };

        let urls = match extract_submission_urls(&scrape_file) {
            Ok(urls) => urls,
            Err(e) => {
                error!(file = %scrape_file.display(), error = %e, "Error extracting submission URLs");
                return ScrapeResult {
                    scrape_file_path: Some(scrape_file),
                    duration_secs: Some(start.elapsed().as_secs_f64()),
                    ..ScrapeResult::failed(config, e.to_string())
                };
            }
        };
        info!(subreddit = %config.name, submissions = urls.len(), "Found submissions");

        let comments_scraped = if comments.applies_to(config.category) {
            self.scrape_comments(&urls, comments).await
        } else {
            0
        };

        ScrapeResult {
            status: ScrapeStatus::Success,
            subreddit: config.name.clone(),
            category: config.category,
            submissions_found: urls.len() as u32,
            comments_scraped,
            scrape_file_path: Some(scrape_file),
            error: None,
            duration_secs: Some(start.elapsed().as_secs_f64()),
        }
    }

    /// Scrapes comments for each URL, pausing between submissions but not
    /// after the last one. Returns how many scrapes finished cleanly.
    pub async fn scrape_comments(&self, urls: &[String], plan: &CommentPlan) -> u32 {
        let mut scraped = 0;
        for (i, url) in urls.iter().enumerate() {
            info!(submission = i + 1, total = urls.len(), "Scraping comments from submission");
            match self.urs.scrape_comments(url, plan.n_comments).await {
                Ok(run) if run.succeeded() => scraped += 1,
                Ok(run) => warn!(url = %url, outcome = ?run.outcome, exit_code = ?run.exit_code, "Comment scrape did not finish cleanly"),
                Err(e) => warn!(url = %url, error = %e, "Comment scrape failed"),
            }

            if i + 1 < urls.len() {
                let delay = pacing_delay(plan.delay_range);
                info!(delay_secs = format!("{:.1}", delay.as_secs_f64()), "Waiting before next submission");
                tokio::time::sleep(delay).await;
            }
        }
        scraped
    }
}
