//! The scrape catalog: which subreddits are scraped, when and how.
//!
//! The catalog is a YAML document. When the file does not exist the built-in
//! [`ScrapeCatalog::default`] is used, which mirrors the production setup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::env::ConfigError;
use crate::error::ScrapeError;
use crate::scheduler::Schedule;
use crate::scraper::{Category, ScrapeTarget, TimeFilter};

/// Per-scrape URS flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeOptions {
    /// Export as CSV instead of JSON.
    pub csv: bool,
    /// Also fetch subreddit rules.
    pub rules: bool,
    /// Answer the URS confirmation prompt with yes.
    pub auto_confirm: bool,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            csv: false,
            rules: false,
            auto_confirm: true,
        }
    }
}

/// One subreddit scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubredditConfig {
    pub name: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_results: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_filter: Option<TimeFilter>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub options: ScrapeOptions,
}

fn default_true() -> bool {
    true
}

impl SubredditConfig {
    /// A top/hot/new/... scrape of `n_results` posts.
    pub fn listing(name: &str, category: Category, n_results: u32) -> Self {
        Self {
            name: name.to_string(),
            category,
            n_results: Some(n_results),
            keywords: None,
            time_filter: None,
            enabled: true,
            options: ScrapeOptions::default(),
        }
    }

    /// A keyword search.
    pub fn search(name: &str, keywords: &str) -> Self {
        Self {
            name: name.to_string(),
            category: Category::Search,
            n_results: None,
            keywords: Some(keywords.to_string()),
            time_filter: None,
            enabled: true,
            options: ScrapeOptions::default(),
        }
    }

    pub fn with_time_filter(mut self, filter: TimeFilter) -> Self {
        self.time_filter = Some(filter);
        self
    }

    pub fn with_rules(mut self) -> Self {
        self.options.rules = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Resolves `n_results` / `keywords` into a validated target.
    pub fn target(&self) -> Result<ScrapeTarget, ScrapeError> {
        let target = if self.category.is_search() {
            ScrapeTarget::Keywords(self.keywords.clone().unwrap_or_default())
        } else {
            ScrapeTarget::Count(self.n_results.unwrap_or(0))
        };
        target.validate_for(self.category, &self.name)?;
        Ok(target)
    }

    /// Short human description, e.g. `r/rust (t: 25, week)`.
    pub fn describe(&self) -> String {
        let target = match self.target() {
            Ok(t) => t.to_string(),
            Err(_) => "?".to_string(),
        };
        match self.time_filter {
            Some(tf) => format!("r/{} ({}: {}, {})", self.name, self.category, target, tf),
            None => format!("r/{} ({}: {})", self.name, self.category, target),
        }
    }
}

/// A named group of subreddit scrapes sharing a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: Schedule,
    #[serde(default)]
    pub subreddits: Vec<SubredditConfig>,
}

impl ScheduleDefinition {
    pub fn enabled_subreddits(&self) -> impl Iterator<Item = &SubredditConfig> {
        self.subreddits.iter().filter(|c| c.enabled)
    }
}

/// Global on/off switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalFlags {
    pub master_enabled: bool,
    pub scheduled_scraping_enabled: bool,
    pub manual_scraping_enabled: bool,
    pub comment_scraping_globally_enabled: bool,
    pub upload_to_r2_enabled: bool,
    pub create_archives_enabled: bool,
}

impl Default for GlobalFlags {
    fn default() -> Self {
        Self {
            master_enabled: true,
            scheduled_scraping_enabled: true,
            manual_scraping_enabled: true,
            comment_scraping_globally_enabled: true,
            upload_to_r2_enabled: true,
            create_archives_enabled: true,
        }
    }
}

/// Comment scraping settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentConfig {
    /// Comments requested per post; 0 means all.
    pub default_n_comments: u32,
    pub max_comments_per_post: u32,
    /// Inclusive bounds, in seconds, of the pause between comment scrapes.
    pub delay_range: (u64, u64),
    pub enabled: bool,
}

impl Default for CommentConfig {
    fn default() -> Self {
        Self {
            default_n_comments: 0,
            max_comments_per_post: 500,
            delay_range: (3, 8),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Accepted for compatibility with existing catalogs; every run that
    /// archives does so per run, so this has no effect.
    pub create_daily_archives: bool,
    /// Accepted for compatibility with existing catalogs; has no effect.
    pub create_weekly_archives: bool,
    /// Deflate level, 0-9.
    pub compress_level: u8,
    /// Attach the schedule and subreddit list to uploaded scheduled and
    /// manual archives.
    pub include_metadata: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            create_daily_archives: true,
            create_weekly_archives: true,
            compress_level: 6,
            include_metadata: true,
        }
    }
}

/// Retry and concurrency settings for queued tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Limit on each URS run once its prompt is answered.
    pub timeout_secs: u64,
    pub max_concurrent_tasks: usize,
}

impl TaskConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 300,
            timeout_secs: 300,
            max_concurrent_tasks: 2,
        }
    }
}

/// The original single daily scrape-and-upload job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyUploadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: Schedule,
    #[serde(default)]
    pub subreddits: Vec<SubredditConfig>,
}

impl Default for LegacyUploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: Schedule::Daily {
                hour: 23,
                minute: 30,
            },
            subreddits: vec![SubredditConfig::listing("CreditCardsIndia", Category::Top, 25)],
        }
    }
}

/// The complete scrape catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeCatalog {
    pub global: GlobalFlags,
    pub schedules: Vec<ScheduleDefinition>,
    pub manual: Vec<SubredditConfig>,
    pub comments: CommentConfig,
    pub archive: ArchiveConfig,
    pub tasks: TaskConfig,
    pub legacy_upload: LegacyUploadConfig,
}

impl Default for ScrapeCatalog {
    fn default() -> Self {
        let schedules = vec![
            ScheduleDefinition {
                name: "daily_scrapes".to_string(),
                enabled: true,
                schedule: Schedule::Daily {
                    hour: 23,
                    minute: 30,
                },
                subreddits: vec![
                    SubredditConfig::listing("CreditCardsIndia", Category::Top, 25)
                        .with_time_filter(TimeFilter::Day),
                    SubredditConfig::listing("LifeProTips", Category::Top, 25)
                        .with_time_filter(TimeFilter::Day),
                ],
            },
            ScheduleDefinition {
                name: "weekly_scrapes".to_string(),
                enabled: false,
                schedule: Schedule::Weekly {
                    weekday: 1,
                    hour: 2,
                    minute: 0,
                },
                subreddits: vec![
                    SubredditConfig::listing("CreditCardsIndia", Category::Top, 100)
                        .with_time_filter(TimeFilter::Week)
                        .with_rules(),
                    SubredditConfig::listing("IndiaInvestments", Category::Top, 50)
                        .with_time_filter(TimeFilter::Week),
                    SubredditConfig::listing("PersonalFinanceIndia", Category::Top, 50)
                        .with_time_filter(TimeFilter::Week)
                        .disabled(),
                ],
            },
            ScheduleDefinition {
                name: "hourly_hot_scrapes".to_string(),
                enabled: true,
                schedule: Schedule::Hourly { minute: 0 },
                subreddits: vec![SubredditConfig::listing(
                    "CreditCardsIndia",
                    Category::Hot,
                    10,
                )],
            },
            ScheduleDefinition {
                name: "custom_interval_scrapes".to_string(),
                enabled: false,
                schedule: Schedule::Interval {
                    seconds: 6 * 3600,
                },
                subreddits: vec![SubredditConfig::listing(
                    "CreditCardsIndia",
                    Category::New,
                    30,
                )],
            },
        ];

        let manual = vec![
            SubredditConfig::search("CreditCardsIndia", "cashback rewards points")
                .with_time_filter(TimeFilter::Month),
            SubredditConfig::listing("IndiaInvestments", Category::Controversial, 25)
                .with_time_filter(TimeFilter::Week),
            SubredditConfig::listing("PersonalFinanceIndia", Category::Rising, 20).disabled(),
        ];

        Self {
            global: GlobalFlags::default(),
            schedules,
            manual,
            comments: CommentConfig::default(),
            archive: ArchiveConfig::default(),
            tasks: TaskConfig::default(),
            legacy_upload: LegacyUploadConfig::default(),
        }
    }
}

impl ScrapeCatalog {
    /// Loads the catalog from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Catalog file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, path)
    }

    /// Parses and validates catalog YAML. `origin` is only used in errors.
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let catalog: Self =
            serde_yaml::from_str(content).map_err(|e| ConfigError::CatalogParse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Serializes the catalog to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::ValidationFailed(e.to_string()))
    }

    /// Checks schedules and subreddit targets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for def in &self.schedules {
            if !seen.insert(def.name.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate schedule name '{}'",
                    def.name
                )));
            }
            def.schedule
                .validate()
                .map_err(|e| ConfigError::ValidationFailed(format!("{}: {}", def.name, e)))?;
            for config in &def.subreddits {
                validate_subreddit(config)?;
            }
        }
        for config in self.manual.iter().chain(&self.legacy_upload.subreddits) {
            validate_subreddit(config)?;
        }
        self.legacy_upload
            .schedule
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(format!("legacy_upload: {}", e)))?;

        let (lo, hi) = self.comments.delay_range;
        if lo > hi {
            return Err(ConfigError::ValidationFailed(format!(
                "comments.delay_range lower bound {} exceeds upper bound {}",
                lo, hi
            )));
        }
        if self.archive.compress_level > 9 {
            return Err(ConfigError::ValidationFailed(
                "archive.compress_level must be between 0 and 9".to_string(),
            ));
        }
        if self.tasks.max_concurrent_tasks == 0 {
            return Err(ConfigError::ValidationFailed(
                "tasks.max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Looks up a schedule by name.
    pub fn schedule(&self, name: &str) -> Option<&ScheduleDefinition> {
        self.schedules.iter().find(|s| s.name == name)
    }

    pub fn schedule_mut(&mut self, name: &str) -> Option<&mut ScheduleDefinition> {
        self.schedules.iter_mut().find(|s| s.name == name)
    }

    /// Enabled configs of enabled schedules, flattened in catalog order.
    ///
    /// The position in this list is the config id used by the
    /// `schedule` and `modular` commands.
    pub fn enabled_scheduled_configs(&self) -> Vec<(&ScheduleDefinition, &SubredditConfig)> {
        self.schedules
            .iter()
            .filter(|s| s.enabled)
            .flat_map(|s| s.enabled_subreddits().map(move |c| (s, c)))
            .collect()
    }

    pub fn enabled_manual_configs(&self) -> Vec<&SubredditConfig> {
        self.manual.iter().filter(|c| c.enabled).collect()
    }

    /// Whether comment scraping is switched on both globally and in the
    /// comment settings.
    pub fn comment_scraping_active(&self) -> bool {
        self.global.comment_scraping_globally_enabled && self.comments.enabled
    }

    /// Comments to request per post. 0 means all; anything else is capped at
    /// `max_comments_per_post`.
    pub fn effective_comment_limit(&self) -> u32 {
        match self.comments.default_n_comments {
            0 => 0,
            n => n.min(self.comments.max_comments_per_post),
        }
    }
}

fn validate_subreddit(config: &SubredditConfig) -> Result<(), ConfigError> {
    crate::scraper::validate_subreddit_name(&config.name)
        .and_then(|_| config.target().map(|_| ()))
        .map_err(|e| ConfigError::ValidationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = ScrapeCatalog::default();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.schedules.len(), 4);
        assert_eq!(catalog.tasks.max_retries, 3);
        assert_eq!(catalog.tasks.retry_delay_secs, 300);
    }

    #[test]
    fn test_enabled_scheduled_configs_flattening() {
        let catalog = ScrapeCatalog::default();
        let configs = catalog.enabled_scheduled_configs();
        // daily (2) + hourly (1); weekly and custom interval are disabled
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].0.name, "daily_scrapes");
        assert_eq!(configs[0].1.name, "CreditCardsIndia");
        assert_eq!(configs[1].1.name, "LifeProTips");
        assert_eq!(configs[2].0.name, "hourly_hot_scrapes");
    }

    #[test]
    fn test_enabled_manual_configs() {
        let catalog = ScrapeCatalog::default();
        let manual = catalog.enabled_manual_configs();
        assert_eq!(manual.len(), 2);
        assert_eq!(manual[0].category, Category::Search);
    }

    #[test]
    fn test_effective_comment_limit() {
        let mut catalog = ScrapeCatalog::default();
        assert_eq!(catalog.effective_comment_limit(), 0);

        catalog.comments.default_n_comments = 50;
        assert_eq!(catalog.effective_comment_limit(), 50);

        catalog.comments.default_n_comments = 10_000;
        assert_eq!(catalog.effective_comment_limit(), 500);
    }

    #[test]
    fn test_comment_scraping_requires_both_flags() {
        let mut catalog = ScrapeCatalog::default();
        assert!(catalog.comment_scraping_active());

        catalog.comments.enabled = false;
        assert!(!catalog.comment_scraping_active());

        catalog.comments.enabled = true;
        catalog.global.comment_scraping_globally_enabled = false;
        assert!(!catalog.comment_scraping_active());
    }

    #[test]
    fn test_subreddit_target_resolution() {
        let search = SubredditConfig::search("CreditCardsIndia", "cashback");
        assert_eq!(
            search.target().unwrap(),
            ScrapeTarget::Keywords("cashback".to_string())
        );

        let mut broken = SubredditConfig::listing("rust", Category::Hot, 10);
        broken.n_results = None;
        assert!(broken.target().is_err());
    }

    #[test]
    fn test_yaml_minimal_document() {
        let yaml = r#"
global:
  master_enabled: false
schedules:
  - name: nightly
    schedule: { kind: daily, hour: 1, minute: 15 }
    subreddits:
      - name: rust
        category: T
        n_results: 5
        time_filter: week
"#;
        let catalog = ScrapeCatalog::from_yaml(yaml, Path::new("inline.yaml")).unwrap();
        assert!(!catalog.global.master_enabled);
        assert!(catalog.global.upload_to_r2_enabled);
        let nightly = catalog.schedule("nightly").unwrap();
        assert!(nightly.enabled);
        assert_eq!(nightly.subreddits[0].category, Category::Top);
        assert!(nightly.subreddits[0].options.auto_confirm);
        assert!(catalog.manual.is_empty());
    }

    #[test]
    fn test_yaml_rejects_search_without_keywords() {
        let yaml = r#"
manual:
  - name: rust
    category: s
"#;
        let err = ScrapeCatalog::from_yaml(yaml, Path::new("inline.yaml")).unwrap_err();
        assert!(err.to_string().contains("keywords"));
    }

    #[test]
    fn test_yaml_rejects_duplicate_schedule() {
        let yaml = r#"
schedules:
  - name: twice
    schedule: { kind: hourly, minute: 0 }
  - name: twice
    schedule: { kind: hourly, minute: 30 }
"#;
        let err = ScrapeCatalog::from_yaml(yaml, Path::new("inline.yaml")).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_describe() {
        let config = SubredditConfig::listing("rust", Category::Top, 25)
            .with_time_filter(TimeFilter::Week);
        assert_eq!(config.describe(), "r/rust (t: 25, week)");
    }
}
