//! Integration tests for zipping a day of scrape output.

use std::fs::File;
use std::io::Read;

use chrono::{Local, TimeZone};
use subreddit_harvest::archive::{create_archive, sha256_file, ArchiveKind};
use subreddit_harvest::objectstore::{manual_object_key, scheduled_object_key};

#[test]
fn test_archive_entries_are_relative_to_scrapes_root() {
    let dir = tempfile::tempdir().unwrap();
    let day = dir.path().join("scrapes").join("2024-05-01");
    std::fs::create_dir_all(day.join("subreddits")).unwrap();
    std::fs::create_dir_all(day.join("comments")).unwrap();
    let listing = "{\"data\":[]}".repeat(200);
    std::fs::write(day.join("subreddits/rust-top-25-results.json"), &listing).unwrap();
    std::fs::write(day.join("comments/abc123-all.json"), "[]").unwrap();

    let out = dir.path().join("out");
    let summary = create_archive(&day, &out, "reddit_scrapes_2024-05-01.zip", 6).unwrap();

    assert_eq!(summary.file_count, 2);
    assert_eq!(summary.original_size_bytes, listing.len() as u64 + 2);
    assert!(summary.compressed_size_bytes > 0);
    assert!(summary.compression_ratio > 0.0 && summary.compression_ratio < 1.0);
    assert_eq!(summary.file_name(), "reddit_scrapes_2024-05-01.zip");

    let mut zip = zip::ZipArchive::new(File::open(&summary.path).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "2024-05-01/comments/abc123-all.json",
            "2024-05-01/subreddits/rust-top-25-results.json",
        ]
    );

    let mut content = String::new();
    zip.by_name("2024-05-01/subreddits/rust-top-25-results.json")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, listing);
}

#[test]
fn test_empty_day_produces_empty_archive() {
    let dir = tempfile::tempdir().unwrap();
    let day = dir.path().join("2024-05-01");
    std::fs::create_dir_all(&day).unwrap();

    let summary = create_archive(&day, dir.path(), "empty.zip", 6).unwrap();
    assert_eq!(summary.file_count, 0);
    assert_eq!(summary.compression_ratio, 0.0);
    assert!(summary.path.is_file());
}

#[test]
fn test_archive_checksum_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let day = dir.path().join("2024-05-01");
    std::fs::create_dir_all(&day).unwrap();
    std::fs::write(day.join("a.json"), "{}").unwrap();

    let summary = create_archive(&day, &dir.path().join("out"), "a.zip", 9).unwrap();
    let first = sha256_file(&summary.path).unwrap();
    assert_eq!(first, sha256_file(&summary.path).unwrap());
    assert_eq!(first.len(), 64);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_archive_names_and_object_keys_agree() {
    let now = Local.with_ymd_and_hms(2024, 5, 1, 23, 30, 5).unwrap();
    let name = ArchiveKind::Custom("manual_scrape".to_string()).file_name(now);
    assert_eq!(name, "manual_scrape_2024-05-01_23-30-05.zip");

    let date = now.date_naive();
    assert_eq!(
        manual_object_key(date, &name),
        "manual_scrapes/2024-05-01/manual_scrape_2024-05-01_23-30-05.zip"
    );

    let typed = ArchiveKind::Typed("daily".to_string()).file_name(now);
    assert_eq!(typed, "reddit_scrapes_daily_2024-05-01_23-30-05.zip");
    assert_eq!(
        scheduled_object_key("daily_scrapes", date, &typed),
        "daily_scrapes/2024-05-01/reddit_scrapes_daily_2024-05-01_23-30-05.zip"
    );
}
