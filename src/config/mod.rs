//! Configuration: process environment plus the YAML scrape catalog.

mod catalog;
mod editor;
mod env;

pub use catalog::{
    ArchiveConfig, CommentConfig, GlobalFlags, LegacyUploadConfig, ScheduleDefinition,
    ScrapeCatalog, ScrapeOptions, SubredditConfig, TaskConfig,
};
pub use editor::{CatalogEditError, CatalogEditor, EditOutcome, GlobalFlag};
pub use env::{AppConfig, ConfigError, R2Settings, RedditCredentials, RedisSettings, DEFAULT_R2_BUCKET};

pub(crate) use env::parse_env_bool;
