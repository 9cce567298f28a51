//! Locating and reading URS output files.
//!
//! URS writes into `{scrapes_dir}/{YYYY-MM-DD}/subreddits/` (local date) with
//! names like `CreditCardsIndia-top-25-results.json`. Comment scrapes land
//! elsewhere under the same day directory and carry the submission id in
//! their file name.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDate};
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::category::{Category, ScrapeTarget};
use crate::error::ScrapeError;

/// How many times discovery looks for a scrape file.
pub const DISCOVERY_ATTEMPTS: u32 = 5;
/// Pause between discovery attempts.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);

/// The directory layout under the scrapes root.
#[derive(Debug, Clone)]
pub struct ScrapeLayout {
    root: PathBuf,
    attempts: u32,
    interval: Duration,
}

impl ScrapeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            attempts: DISCOVERY_ATTEMPTS,
            interval: DISCOVERY_INTERVAL,
        }
    }

    /// Overrides the discovery polling.
    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.interval = interval;
        self
    }

    /// Longest [`ScrapeLayout::find_scrape_file`] keeps polling.
    pub fn discovery_budget(&self) -> Duration {
        self.interval * self.attempts
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{YYYY-MM-DD}`.
    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format("%Y-%m-%d").to_string())
    }

    /// Day directory for the local date, which is what URS uses.
    pub fn today_dir(&self) -> PathBuf {
        self.day_dir(Local::now().date_naive())
    }

    pub fn subreddits_dir(&self, date: NaiveDate) -> PathBuf {
        self.day_dir(date).join("subreddits")
    }

    /// Exact file name URS uses for a listing scrape. Search output has no
    /// fixed name.
    pub fn expected_file_name(
        subreddit: &str,
        category: Category,
        target: &ScrapeTarget,
    ) -> Option<String> {
        match (category.is_search(), target) {
            (false, ScrapeTarget::Count(n)) => Some(format!(
                "{}-{}-{}-results.json",
                subreddit,
                category.file_label(),
                n
            )),
            _ => None,
        }
    }

    /// Finds today's output file for a subreddit scrape, polling while URS
    /// finishes writing it.
    pub async fn find_scrape_file(
        &self,
        subreddit: &str,
        category: Category,
        target: &ScrapeTarget,
    ) -> Option<PathBuf> {
        self.find_scrape_file_on(Local::now().date_naive(), subreddit, category, target)
            .await
    }

    pub async fn find_scrape_file_on(
        &self,
        date: NaiveDate,
        subreddit: &str,
        category: Category,
        target: &ScrapeTarget,
    ) -> Option<PathBuf> {
        let dir = self.subreddits_dir(date);
        info!(dir = %dir.display(), "Looking for scrape file");
        if !dir.exists() {
            return None;
        }

        for attempt in 1..=self.attempts {
            debug!(attempt, max = self.attempts, subreddit = %subreddit, "Checking for scrape file");
            if let Some(path) = locate_once(&dir, subreddit, category, target) {
                return Some(path);
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        None
    }

    /// First JSON file under today's directory whose name contains
    /// `reddit_id`.
    pub fn find_comments_file(&self, reddit_id: &str) -> Option<PathBuf> {
        find_comments_file_in(&self.today_dir(), reddit_id)
    }
}

fn locate_once(
    dir: &Path,
    subreddit: &str,
    category: Category,
    target: &ScrapeTarget,
) -> Option<PathBuf> {
    let prefix = match ScrapeLayout::expected_file_name(subreddit, category, target) {
        Some(name) => {
            let exact = dir.join(&name);
            if exact.is_file() {
                return Some(exact);
            }
            // time-filtered scrapes append a suffix before the extension
            name.trim_end_matches(".json").to_string()
        }
        None => format!("{}-search-", subreddit),
    };
    newest_with_prefix(dir, &prefix)
}

fn newest_with_prefix(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_file())
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

fn find_comments_file_in(dir: &Path, reddit_id: &str) -> Option<PathBuf> {
    if reddit_id.is_empty() {
        return None;
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .find(|e| e.file_name().to_string_lossy().contains(reddit_id))
        .map(|e| e.into_path())
}

/// Reads the post list from a subreddit scrape: the `data` array, or the
/// document itself when it is a bare array.
pub fn load_posts(path: &Path) -> Result<Vec<Value>, ScrapeError> {
    let content = std::fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&content)?;
    let malformed = |reason: &str| ScrapeError::MalformedScrapeFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    match doc {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(malformed("'data' is not an array")),
            None => Err(malformed("missing 'data'")),
        },
        _ => Err(malformed("expected an object or array")),
    }
}

/// Full submission URLs (`https://www.reddit.com{permalink}`) from a scrape
/// file. Entries without a permalink are skipped.
pub fn extract_submission_urls(path: &Path) -> Result<Vec<String>, ScrapeError> {
    let posts = load_posts(path)?;
    Ok(posts
        .iter()
        .filter_map(|p| p.get("permalink").and_then(Value::as_str))
        .map(|permalink| format!("https://www.reddit.com{}", permalink))
        .collect())
}

/// The submission id in a Reddit URL (the segment after `comments`), or an
/// empty string.
pub fn extract_reddit_id(url: &str) -> String {
    let mut parts = url.split('/');
    while let Some(part) = parts.next() {
        if part == "comments" {
            return parts.next().unwrap_or_default().to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_reddit_id() {
        assert_eq!(
            extract_reddit_id("https://www.reddit.com/r/rust/comments/abc123/some_title/"),
            "abc123"
        );
        assert_eq!(extract_reddit_id("https://www.reddit.com/r/rust/"), "");
        assert_eq!(extract_reddit_id("https://www.reddit.com/r/rust/comments"), "");
    }

    #[test]
    fn test_expected_file_name() {
        let name = ScrapeLayout::expected_file_name(
            "CreditCardsIndia",
            Category::Top,
            &ScrapeTarget::Count(25),
        );
        assert_eq!(name.as_deref(), Some("CreditCardsIndia-top-25-results.json"));

        let search = ScrapeLayout::expected_file_name(
            "CreditCardsIndia",
            Category::Search,
            &ScrapeTarget::Keywords("cashback".to_string()),
        );
        assert!(search.is_none());
    }

    #[test]
    fn test_day_dir_format() {
        let layout = ScrapeLayout::new("scrapes");
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(layout.day_dir(date), PathBuf::from("scrapes/2024-05-01"));
        assert_eq!(
            layout.subreddits_dir(date),
            PathBuf::from("scrapes/2024-05-01/subreddits")
        );
    }

    #[test]
    fn test_load_posts_accepts_bare_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.json");
        std::fs::write(&path, r#"[{"permalink": "/r/a/comments/x1/t/"}]"#).unwrap();
        let urls = extract_submission_urls(&path).unwrap();
        assert_eq!(urls, vec!["https://www.reddit.com/r/a/comments/x1/t/"]);
    }

    #[test]
    fn test_load_posts_rejects_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalar.json");
        std::fs::write(&path, "42").unwrap();
        assert!(matches!(
            load_posts(&path),
            Err(ScrapeError::MalformedScrapeFile { .. })
        ));
    }

    #[test]
    fn test_find_comments_file_in_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("comments");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("post-xyz789-all.json"), "{}").unwrap();
        std::fs::write(nested.join("post-xyz789.txt"), "").unwrap();

        let found = find_comments_file_in(dir.path(), "xyz789").unwrap();
        assert!(found.ends_with("post-xyz789-all.json"));
        assert!(find_comments_file_in(dir.path(), "").is_none());
        assert!(find_comments_file_in(dir.path(), "nope").is_none());
    }
}
