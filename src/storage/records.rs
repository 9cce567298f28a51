//! Row-level types and parsing of URS JSON into insertable records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(String),

    #[error("unknown {kind} value '{value}'")]
    UnknownValue { kind: &'static str, value: String },
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = RecordError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(RecordError::UnknownValue { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(
    /// Lifecycle of a scrape session.
    ScrapeStatus, "scrape status" {
        Success => "success",
        Failed => "failed",
        Skipped => "skipped",
        Pending => "pending",
        Running => "running",
    }
);

string_enum!(
    /// What triggered a scrape.
    TaskType, "task type" {
        Scheduled => "scheduled",
        Manual => "manual",
    }
);

string_enum!(
    /// Downstream processing state of a queue item or content row.
    ProcessingStatus, "processing status" {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
    }
);

string_enum!(
    ContentType, "content type" {
        Submission => "submission",
        Comment => "comment",
    }
);

/// A submission parsed from a URS subreddit scrape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionRecord {
    pub reddit_id: String,
    pub subreddit: Option<String>,
    pub title: String,
    pub url: String,
    pub permalink: String,
    pub selftext: String,
    pub author: String,
    pub created_utc: DateTime<Utc>,
    pub score: i32,
    pub upvote_ratio: Option<f64>,
    pub num_comments: i32,
    pub is_self: bool,
    pub is_original_content: bool,
    pub is_nsfw: bool,
    pub is_spoiler: bool,
    pub is_stickied: bool,
    pub is_locked: bool,
    pub distinguished: Option<String>,
    pub link_flair_text: Option<String>,
}

impl SubmissionRecord {
    pub fn from_json(value: &Value) -> Result<Self, RecordError> {
        Ok(Self {
            reddit_id: required_str(value, "id")?,
            subreddit: optional_str(value, "subreddit"),
            title: required_str(value, "title")?,
            url: required_str(value, "url")?,
            permalink: required_str(value, "permalink")?,
            selftext: optional_str(value, "selftext").unwrap_or_default(),
            author: author(value),
            created_utc: required_timestamp(value, "created_utc")?,
            score: int(value, "score"),
            upvote_ratio: value.get("upvote_ratio").and_then(Value::as_f64),
            num_comments: int(value, "num_comments"),
            is_self: flag(value, "is_self"),
            is_original_content: flag(value, "is_original_content"),
            is_nsfw: flag(value, "nsfw") || flag(value, "over_18"),
            is_spoiler: flag(value, "spoiler"),
            is_stickied: flag(value, "stickied"),
            is_locked: flag(value, "locked"),
            distinguished: optional_str(value, "distinguished"),
            link_flair_text: optional_str(value, "link_flair_text"),
        })
    }
}

/// A comment parsed from a URS comment scrape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    pub reddit_id: String,
    pub body: String,
    pub body_html: Option<String>,
    pub author: String,
    pub created_utc: DateTime<Utc>,
    pub score: i32,
    pub parent_id: String,
    pub link_id: String,
    pub depth: i32,
    pub is_submitter: bool,
    pub is_stickied: bool,
    pub distinguished: Option<String>,
    pub edited: Option<DateTime<Utc>>,
}

impl CommentRecord {
    pub fn from_json(value: &Value, depth: i32) -> Result<Self, RecordError> {
        Ok(Self {
            reddit_id: required_str(value, "id")?,
            body: required_str(value, "body")?,
            body_html: optional_str(value, "body_html"),
            author: author(value),
            created_utc: required_timestamp(value, "created_utc")?,
            score: int(value, "score"),
            parent_id: required_str(value, "parent_id")?,
            link_id: required_str(value, "link_id")?,
            depth: value
                .get("depth")
                .and_then(Value::as_i64)
                .map(saturate)
                .unwrap_or(depth),
            is_submitter: flag(value, "is_submitter"),
            is_stickied: flag(value, "stickied"),
            distinguished: optional_str(value, "distinguished"),
            // `edited` is `false` or a timestamp
            edited: value.get("edited").and_then(parse_timestamp),
        })
    }
}

/// Flattens a comment list, following nested `replies` arrays and tracking
/// depth.
pub fn flatten_comments(comments: &[Value]) -> Vec<(&Value, i32)> {
    fn walk<'a>(items: &'a [Value], depth: i32, out: &mut Vec<(&'a Value, i32)>) {
        for item in items {
            out.push((item, depth));
            if let Some(replies) = item.get("replies").and_then(Value::as_array) {
                walk(replies, depth + 1, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(comments, 0, &mut out);
    out
}

/// Parses an ISO-8601 string (with or without offset) or epoch seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0)),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    s.parse::<f64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0))
}

fn required_str(value: &Value, key: &'static str) -> Result<String, RecordError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RecordError::MissingField(key))
}

fn optional_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_timestamp(value: &Value, key: &'static str) -> Result<DateTime<Utc>, RecordError> {
    let raw = value.get(key).ok_or(RecordError::MissingField(key))?;
    parse_timestamp(raw).ok_or_else(|| RecordError::InvalidTimestamp(raw.to_string()))
}

fn author(value: &Value) -> String {
    optional_str(value, "author").unwrap_or_else(|| "[deleted]".to_string())
}

fn int(value: &Value, key: &str) -> i32 {
    saturate(value.get(key).and_then(Value::as_i64).unwrap_or(0))
}

fn saturate(n: i64) -> i32 {
    i32::try_from(n).unwrap_or(if n < 0 { i32::MIN } else { i32::MAX })
}

/// Converts a count to an `INTEGER` column value, capping at `i32::MAX`.
pub(crate) fn count_i32(n: impl TryInto<i32>) -> i32 {
    n.try_into().unwrap_or(i32::MAX)
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enum_round_trip_strings() {
        assert_eq!("running".parse::<ScrapeStatus>().unwrap(), ScrapeStatus::Running);
        assert_eq!(TaskType::Manual.as_str(), "manual");
        assert_eq!(ProcessingStatus::Completed.to_string(), "completed");
        assert!("done".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_submission_from_json_defaults() {
        let value = json!({
            "id": "abc123",
            "title": "Best cashback card?",
            "url": "https://www.reddit.com/r/CreditCardsIndia/comments/abc123/best/",
            "permalink": "/r/CreditCardsIndia/comments/abc123/best/",
            "created_utc": "2024-05-01 10:20:30",
            "score": 42,
            "nsfw": false
        });
        let record = SubmissionRecord::from_json(&value).unwrap();
        assert_eq!(record.reddit_id, "abc123");
        assert_eq!(record.author, "[deleted]");
        assert_eq!(record.selftext, "");
        assert_eq!(record.score, 42);
        assert_eq!(record.num_comments, 0);
        assert_eq!(record.created_utc.to_rfc3339(), "2024-05-01T10:20:30+00:00");
    }

    #[test]
    fn test_submission_missing_title() {
        let value = json!({"id": "x", "url": "u", "permalink": "p", "created_utc": 0});
        assert_eq!(
            SubmissionRecord::from_json(&value).unwrap_err(),
            RecordError::MissingField("title")
        );
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp(&json!(1714558830)).is_some());
        assert!(parse_timestamp(&json!(1714558830.5)).is_some());
        assert!(parse_timestamp(&json!("2024-05-01T10:20:30+05:30")).is_some());
        assert!(parse_timestamp(&json!("2024-05-01T10:20:30.123")).is_some());
        assert!(parse_timestamp(&json!(false)).is_none());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }

    #[test]
    fn test_comment_edited_false() {
        let value = json!({
            "id": "c1",
            "body": "Nice",
            "created_utc": "2024-05-01 11:00:00",
            "parent_id": "t3_abc123",
            "link_id": "t3_abc123",
            "edited": false
        });
        let record = CommentRecord::from_json(&value, 0).unwrap();
        assert!(record.edited.is_none());
        assert_eq!(record.author, "[deleted]");
    }

    #[test]
    fn test_out_of_range_counts_saturate() {
        let value = json!({
            "id": "abc123",
            "title": "Viral",
            "url": "u",
            "permalink": "p",
            "created_utc": 0,
            "score": 3_000_000_000i64,
            "num_comments": -5_000_000_000i64
        });
        let record = SubmissionRecord::from_json(&value).unwrap();
        assert_eq!(record.score, i32::MAX);
        assert_eq!(record.num_comments, i32::MIN);

        assert_eq!(count_i32(7usize), 7);
        assert_eq!(count_i32(u32::MAX), i32::MAX);
        assert_eq!(count_i32(usize::MAX), i32::MAX);
    }

    #[test]
    fn test_flatten_comments_tracks_depth() {
        let comments = vec![json!({
            "id": "a",
            "replies": [{"id": "b", "replies": [{"id": "c"}]}]
        })];
        let flat = flatten_comments(&comments);
        let depths: Vec<_> = flat
            .iter()
            .map(|(v, d)| (v["id"].as_str().unwrap(), *d))
            .collect();
        assert_eq!(depths, vec![("a", 0), ("b", 1), ("c", 2)]);
    }
}
