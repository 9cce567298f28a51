//! End-to-end harvest runs against a scripted stand-in for URS.
//!
//! The script prints the URS confirmation prompt, then writes a result file
//! for subreddit scrapes and logs comment scrapes, so the full path from
//! task to uploaded archive runs without network access.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use subreddit_harvest::config::{AppConfig, ScrapeCatalog, ScrapeOptions};
use subreddit_harvest::objectstore::{ObjectMetadata, ObjectStore, ObjectSummary};
use subreddit_harvest::scheduler::TaskSpec;
use subreddit_harvest::scraper::{Category, PromptOutcome, ScrapeLayout, ScrapeTarget, UrsRunner};
use subreddit_harvest::tasks::TaskRunner;
use subreddit_harvest::ObjectStoreError;

#[derive(Default)]
struct RecordingStore {
    keys: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), ObjectStoreError> {
        assert!(path.is_file(), "archive must exist at upload time");
        self.keys
            .lock()
            .unwrap()
            .push((key.to_string(), metadata.clone()));
        Ok(())
    }

    async fn list_objects(
        &self,
        _prefix: &str,
        _days_back: i64,
    ) -> Result<Vec<ObjectSummary>, ObjectStoreError> {
        Ok(Vec::new())
    }

    async fn object_metadata(&self, _key: &str) -> Result<ObjectMetadata, ObjectStoreError> {
        Ok(ObjectMetadata::default())
    }

    async fn delete_object(&self, _key: &str) -> Result<(), ObjectStoreError> {
        Ok(())
    }

    fn bucket(&self) -> &str {
        "recording"
    }
}

const SCRAPE_JSON: &str = r#"{"scrape_settings":{},"data":[{"permalink":"/r/rust/comments/abc123/first/"},{"permalink":"/r/rust/comments/def456/second/"}]}"#;

/// Writes a fake URS that drops its results into `out_dir` and appends
/// every comment URL to `comment_log`.
fn write_fake_urs(dir: &Path, out_dir: &Path, comment_log: &Path) -> PathBuf {
    let script = format!(
        r#"printf 'Continue? [Y/N] '
read answer
[ "$answer" = "y" ] || exit 2
case "$1" in
  -r)
    mkdir -p '{out}'
    printf '%s' '{json}' > '{out}/'"$2"'-hot-'"$4"'-results.json'
    ;;
  -c)
    echo "$2" >> '{log}'
    ;;
esac
"#,
        out = out_dir.display(),
        json = SCRAPE_JSON,
        log = comment_log.display(),
    );
    let path = dir.join("fake_urs.sh");
    std::fs::write(&path, script).unwrap();
    path
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn test_urs_prompt_is_answered() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "prompt.sh",
        "printf 'Confirm? [Y/N] '\nread a\n[ \"$a\" = \"y\" ] || exit 1\necho \"got $a\"\n",
    );
    let runner = UrsRunner::new(&format!("sh {}", script.display()), dir.path()).unwrap();

    let run = runner.run(&[], true).await.unwrap();
    assert_eq!(run.outcome, PromptOutcome::Answered);
    assert_eq!(run.exit_code, Some(0));
    assert!(run.succeeded());

    let declined = runner.run(&[], false).await.unwrap();
    assert_eq!(declined.outcome, PromptOutcome::Answered);
    assert_eq!(declined.exit_code, Some(1));
    assert!(!declined.succeeded());
}

#[tokio::test]
async fn test_urs_without_prompt_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "quiet.sh", "echo 'nothing to confirm'\n");
    let runner = UrsRunner::new(&format!("sh {}", script.display()), dir.path()).unwrap();

    let run = runner.run(&[], true).await.unwrap();
    assert_eq!(run.outcome, PromptOutcome::EndedBeforePrompt);
    assert!(run.succeeded());
}

#[tokio::test]
async fn test_urs_prompt_timeout_kills_process() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "hang.sh", "sleep 30\n");
    let runner = UrsRunner::new(&format!("sh {}", script.display()), dir.path())
        .unwrap()
        .with_timeouts(Duration::from_millis(200), Duration::from_secs(1));

    let run = runner.run(&[], true).await.unwrap();
    assert_eq!(run.outcome, PromptOutcome::TimedOut);
    assert_eq!(run.exit_code, None);
    assert!(!run.succeeded());
    assert!(run.duration < Duration::from_secs(10));
}

#[tokio::test]
async fn test_manual_scrape_archives_and_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let scrapes = dir.path().join("scrapes");
    let archives = dir.path().join("archives");
    let catalog_path = dir.path().join("catalog.yaml");
    let comment_log = dir.path().join("comments.log");

    let out_dir = ScrapeLayout::new(&scrapes).subreddits_dir(Local::now().date_naive());
    let script = write_fake_urs(dir.path(), &out_dir, &comment_log);

    let mut catalog = ScrapeCatalog::default();
    catalog.comments.delay_range = (0, 0);
    catalog.save(&catalog_path).unwrap();

    let config = AppConfig::new()
        .with_urs_command(format!("sh {}", script.display()))
        .with_urs_dir(dir.path())
        .with_scrapes_dir(&scrapes)
        .with_archive_dir(&archives)
        .with_catalog_path(&catalog_path);
    let store = Arc::new(RecordingStore::default());
    let runner = TaskRunner::new(config)
        .unwrap()
        .with_object_store(store.clone());

    let task = TaskSpec::ManualScrape {
        subreddit: "rust".to_string(),
        category: Category::Hot,
        target: ScrapeTarget::Count(2),
        time_filter: None,
        options: ScrapeOptions::default(),
        scrape_comments: true,
    };
    let output = runner.run_task("job-1", &task).await.unwrap();

    assert_eq!(output["status"], "success", "output: {}", output);
    assert_eq!(output["result"]["submissions_found"], 2);
    assert_eq!(output["result"]["comments_scraped"], 2);

    let logged = std::fs::read_to_string(&comment_log).unwrap();
    let urls: Vec<&str> = logged.lines().collect();
    assert_eq!(
        urls,
        vec![
            "https://www.reddit.com/r/rust/comments/abc123/first/",
            "https://www.reddit.com/r/rust/comments/def456/second/",
        ]
    );

    let archive = &output["archive"];
    assert_eq!(archive["status"], "uploaded", "archive: {}", archive);
    assert_eq!(archive["uploaded"], true);
    assert_eq!(archive["deleted_locally"], true);
    let key = archive["object_key"].as_str().unwrap();
    assert!(key.starts_with("manual_scrapes/"), "key: {}", key);
    assert!(key.contains("manual_scrape_"));

    let uploads = store.keys.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, key);
    assert_eq!(uploads[0].1["file_count"], "1");
    assert_eq!(uploads[0].1["sha256"].len(), 64);

    let leftover: Vec<_> = std::fs::read_dir(&archives).unwrap().collect();
    assert!(leftover.is_empty(), "archive should be removed after upload");
}

#[tokio::test]
async fn test_manual_scrape_keeps_archive_when_upload_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let scrapes = dir.path().join("scrapes");
    let archives = dir.path().join("archives");
    let catalog_path = dir.path().join("catalog.yaml");
    let comment_log = dir.path().join("comments.log");

    let out_dir = ScrapeLayout::new(&scrapes).subreddits_dir(Local::now().date_naive());
    let script = write_fake_urs(dir.path(), &out_dir, &comment_log);

    let mut catalog = ScrapeCatalog::default();
    catalog.global.upload_to_r2_enabled = false;
    catalog.save(&catalog_path).unwrap();

    let config = AppConfig::new()
        .with_urs_command(format!("sh {}", script.display()))
        .with_urs_dir(dir.path())
        .with_scrapes_dir(&scrapes)
        .with_archive_dir(&archives)
        .with_catalog_path(&catalog_path);
    let runner = TaskRunner::new(config).unwrap();

    let task = TaskSpec::ManualScrape {
        subreddit: "rust".to_string(),
        category: Category::Hot,
        target: ScrapeTarget::Count(2),
        time_filter: None,
        options: ScrapeOptions::default(),
        scrape_comments: false,
    };
    let output = runner.run_task("job-2", &task).await.unwrap();

    assert_eq!(output["status"], "success");
    assert_eq!(output["result"]["comments_scraped"], 0);
    assert!(!comment_log.exists());

    let archive = &output["archive"];
    assert_eq!(archive["status"], "archived");
    assert_eq!(archive["uploaded"], false);
    let path = PathBuf::from(archive["archive_path"].as_str().unwrap());
    assert!(path.is_file());
    assert!(path.starts_with(&archives));
}
