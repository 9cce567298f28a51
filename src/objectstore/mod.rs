//! Archive storage in a Cloudflare R2 bucket.
//!
//! The [`ObjectStore`] trait is the seam between upload tasks / monitoring and
//! the S3-compatible client in [`r2`].

mod monitor;
mod r2;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use monitor::{
    analyze_prefixes, find_naming_conflicts, group_naming_conflicts, recent_uploads,
    PrefixReport, SCRAPE_PREFIXES,
};
pub use r2::R2Store;

use crate::error::ObjectStoreError;

/// Value of the `source` metadata entry on every upload.
pub const UPLOAD_SOURCE: &str = "automated_reddit_scraper";

/// A listed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Size in MiB, rounded to two decimals.
    pub size_mb: f64,
}

impl ObjectSummary {
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            size_mb: size_mb(size),
        }
    }
}

/// Result of a head request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub content_type: String,
}

/// Bucket operations used by the harvester.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads a local file. `metadata` is merged over the standard
    /// `upload_date` / `source` entries.
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ObjectStoreError>;

    /// Objects under `prefix` modified in the last `days_back` days, newest
    /// first.
    async fn list_objects(
        &self,
        prefix: &str,
        days_back: i64,
    ) -> Result<Vec<ObjectSummary>, ObjectStoreError>;

    async fn object_metadata(&self, key: &str) -> Result<ObjectMetadata, ObjectStoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Bucket name, for display.
    fn bucket(&self) -> &str;
}

/// Bytes to MiB, two decimals.
pub fn size_mb(size: u64) -> f64 {
    (size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Metadata attached to an upload at `now`.
pub fn upload_metadata(
    extra: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("upload_date".to_string(), now.to_rfc3339());
    metadata.insert("source".to_string(), UPLOAD_SOURCE.to_string());
    for (k, v) in extra {
        metadata.insert(k.clone(), v.clone());
    }
    metadata
}

/// Keeps objects modified at or after `cutoff`, newest first.
pub fn retain_since(mut objects: Vec<ObjectSummary>, cutoff: DateTime<Utc>) -> Vec<ObjectSummary> {
    objects.retain(|o| o.last_modified >= cutoff);
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    objects
}

/// `daily_scrapes/{date}/reddit_scrapes_{date}.zip`
pub fn legacy_object_key(date: NaiveDate) -> String {
    let date = date.format("%Y-%m-%d");
    format!("daily_scrapes/{}/reddit_scrapes_{}.zip", date, date)
}

/// `{schedule}/{date}/{archive_name}`
pub fn scheduled_object_key(schedule: &str, date: NaiveDate, archive_name: &str) -> String {
    format!("{}/{}/{}", schedule, date.format("%Y-%m-%d"), archive_name)
}

/// `manual_scrapes/{date}/{archive_name}`
pub fn manual_object_key(date: NaiveDate, archive_name: &str) -> String {
    scheduled_object_key("manual_scrapes", date, archive_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_keys() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            legacy_object_key(date),
            "daily_scrapes/2024-05-01/reddit_scrapes_2024-05-01.zip"
        );
        assert_eq!(
            scheduled_object_key("hourly_hot_scrapes", date, "a.zip"),
            "hourly_hot_scrapes/2024-05-01/a.zip"
        );
        assert_eq!(manual_object_key(date, "b.zip"), "manual_scrapes/2024-05-01/b.zip");
    }

    #[test]
    fn test_size_mb_rounding() {
        assert_eq!(size_mb(0), 0.0);
        assert_eq!(size_mb(1024 * 1024), 1.0);
        assert_eq!(size_mb(1_500_000), 1.43);
    }

    #[test]
    fn test_upload_metadata_merges_extra() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap();
        let mut extra = BTreeMap::new();
        extra.insert("subreddit".to_string(), "CreditCardsIndia".to_string());
        let metadata = upload_metadata(&extra, now);
        assert_eq!(metadata["source"], UPLOAD_SOURCE);
        assert!(metadata["upload_date"].starts_with("2024-05-01T23:30:00"));
        assert_eq!(metadata["subreddit"], "CreditCardsIndia");
    }

    #[test]
    fn test_retain_since_sorts_newest_first() {
        let t = |h| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap();
        let objects = vec![
            ObjectSummary::new("old", 1, t(1)),
            ObjectSummary::new("mid", 1, t(5)),
            ObjectSummary::new("new", 1, t(9)),
        ];
        let kept = retain_since(objects, t(4));
        let keys: Vec<_> = kept.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["new", "mid"]);
    }
}
