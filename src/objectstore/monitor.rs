//! Bucket inspection: per-schedule listings, recent uploads, and keys that
//! collide on the same schedule and day.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{retain_since, ObjectStore, ObjectSummary};
use crate::error::ObjectStoreError;

/// Prefixes inspected by [`analyze_prefixes`], with display names.
pub const SCRAPE_PREFIXES: [(&str, &str); 4] = [
    ("daily_scrapes", "Daily Scrapes"),
    ("hourly_hot_scrapes", "Hourly Hot Scrapes"),
    ("weekly_scrapes", "Weekly Scrapes"),
    ("manual_scrapes", "Manual Scrapes"),
];

#[derive(Debug, Clone, Serialize)]
pub struct PrefixReport {
    pub prefix: String,
    pub label: String,
    pub objects: Vec<ObjectSummary>,
}

/// Lists each scrape prefix over the last seven days.
pub async fn analyze_prefixes(
    store: &dyn ObjectStore,
) -> Result<Vec<PrefixReport>, ObjectStoreError> {
    let mut reports = Vec::with_capacity(SCRAPE_PREFIXES.len());
    for (prefix, label) in SCRAPE_PREFIXES {
        reports.push(PrefixReport {
            prefix: prefix.to_string(),
            label: label.to_string(),
            objects: store.list_objects(prefix, 7).await?,
        });
    }
    Ok(reports)
}

/// Objects uploaded in the last `hours` hours.
pub async fn recent_uploads(
    store: &dyn ObjectStore,
    hours: i64,
    now: DateTime<Utc>,
) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
    let objects = store.list_objects("", 2).await?;
    Ok(retain_since(objects, now - Duration::hours(hours)))
}

/// Groups keys by `{schedule minus "_scrapes"}_{date}` and keeps groups
/// holding more than one object.
pub fn group_naming_conflicts(objects: &[ObjectSummary]) -> BTreeMap<String, Vec<ObjectSummary>> {
    let mut groups: BTreeMap<String, Vec<ObjectSummary>> = BTreeMap::new();
    for object in objects {
        let mut parts = object.key.split('/');
        let (Some(schedule), Some(date)) = (parts.next(), parts.next()) else {
            continue;
        };
        let group = format!("{}_{}", schedule.replace("_scrapes", ""), date);
        groups.entry(group).or_default().push(object.clone());
    }
    groups.retain(|_, files| files.len() > 1);
    groups
}

/// Naming conflicts among objects of the last seven days.
pub async fn find_naming_conflicts(
    store: &dyn ObjectStore,
) -> Result<BTreeMap<String, Vec<ObjectSummary>>, ObjectStoreError> {
    let objects = store.list_objects("", 7).await?;
    Ok(group_naming_conflicts(&objects))
}
