//! Periodic enqueueing of scheduled scrapes.
//!
//! The beat keeps one entry per enabled catalog schedule plus the legacy
//! daily upload. It sleeps until the earliest entry is due, enqueues that
//! entry's job and computes its next run. All times are UTC.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::job::{Job, TaskSpec};
use super::queue::JobQueue;
use crate::config::{ScrapeCatalog, TaskConfig};

/// When a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Every day at `hour:minute`.
    Daily { hour: u32, minute: u32 },
    /// Every week on `weekday` (0 = Sunday) at `hour:minute`.
    Weekly { weekday: u32, hour: u32, minute: u32 },
    /// Every hour at `minute`.
    Hourly { minute: u32 },
    /// Every `seconds`, counted from when the beat starts.
    Interval { seconds: u64 },
}

impl Schedule {
    pub fn validate(&self) -> Result<(), String> {
        let check = |value: u32, max: u32, field: &str| {
            if value < max {
                Ok(())
            } else {
                Err(format!("{} must be below {}, got {}", field, max, value))
            }
        };
        match *self {
            Schedule::Daily { hour, minute } => {
                check(hour, 24, "hour")?;
                check(minute, 60, "minute")
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => {
                check(weekday, 7, "weekday")?;
                check(hour, 24, "hour")?;
                check(minute, 60, "minute")
            }
            Schedule::Hourly { minute } => check(minute, 60, "minute"),
            Schedule::Interval { seconds: 0 } => Err("interval must be positive".to_string()),
            Schedule::Interval { .. } => Ok(()),
        }
    }

    /// The first firing time strictly after `after`.
    ///
    /// Invalid field values are clamped to their range.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Daily { hour, minute } => {
                let candidate = at_time(after, hour, minute);
                if candidate > after {
                    candidate
                } else {
                    candidate + ChronoDuration::days(1)
                }
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let today = after.weekday().num_days_from_sunday();
                let ahead = (weekday.min(6) + 7 - today) % 7;
                let candidate = at_time(after, hour, minute) + ChronoDuration::days(ahead as i64);
                if candidate > after {
                    candidate
                } else {
                    candidate + ChronoDuration::days(7)
                }
            }
            Schedule::Hourly { minute } => {
                let top_of_hour = after
                    .with_minute(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(after);
                let candidate = top_of_hour + ChronoDuration::minutes(minute.min(59) as i64);
                if candidate > after {
                    candidate
                } else {
                    candidate + ChronoDuration::hours(1)
                }
            }
            Schedule::Interval { seconds } => {
                after + ChronoDuration::seconds(seconds.max(1) as i64)
            }
        }
    }
}

/// `after`'s date at `hour:minute:00` UTC.
fn at_time(after: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&after.date_naive().and_time(time))
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const DAYS: [&str; 7] = [
            "Sunday",
            "Monday",
            "Tuesday",
            "Wednesday",
            "Thursday",
            "Friday",
            "Saturday",
        ];
        match *self {
            Schedule::Daily { hour, minute } => write!(f, "daily at {:02}:{:02} UTC", hour, minute),
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => write!(
                f,
                "weekly on {} at {:02}:{:02} UTC",
                DAYS.get(weekday as usize).unwrap_or(&"?"),
                hour,
                minute
            ),
            Schedule::Hourly { minute } => write!(f, "hourly at :{:02}", minute),
            Schedule::Interval { seconds } => write!(f, "every {}s", seconds),
        }
    }
}

/// One periodic job.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatEntry {
    pub name: String,
    pub schedule: Schedule,
    pub task: TaskSpec,
    pub next_run: DateTime<Utc>,
}

/// Beat entries for `catalog`, each first due after `now`.
///
/// Enabled schedules only get entries while both `master_enabled` and
/// `scheduled_scraping_enabled` are on; the legacy upload is listed
/// whenever it is enabled.
pub fn beat_entries(catalog: &ScrapeCatalog, now: DateTime<Utc>) -> Vec<BeatEntry> {
    let mut entries = Vec::new();
    if catalog.global.master_enabled && catalog.global.scheduled_scraping_enabled {
        for def in catalog.schedules.iter().filter(|s| s.enabled) {
            entries.push(BeatEntry {
                name: def.name.clone(),
                schedule: def.schedule,
                task: TaskSpec::ScheduledScrape {
                    schedule: def.name.clone(),
                },
                next_run: def.schedule.next_after(now),
            });
        }
    }
    if catalog.legacy_upload.enabled {
        entries.push(BeatEntry {
            name: "scrape_and_upload".to_string(),
            schedule: catalog.legacy_upload.schedule,
            task: TaskSpec::ScrapeAndUpload,
            next_run: catalog.legacy_upload.schedule.next_after(now),
        });
    }
    entries
}

/// Enqueues scheduled jobs as they come due.
pub struct Beat {
    queue: Arc<JobQueue>,
    entries: Vec<BeatEntry>,
    policy: TaskConfig,
}

impl Beat {
    pub fn new(queue: Arc<JobQueue>, catalog: &ScrapeCatalog) -> Self {
        Self {
            queue,
            entries: beat_entries(catalog, Utc::now()),
            policy: catalog.tasks.clone(),
        }
    }

    pub fn entries(&self) -> &[BeatEntry] {
        &self.entries
    }

    /// Earliest upcoming run, if any entry exists.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.next_run).min()
    }

    /// Tasks due at `now`. Each due entry is advanced to its next run.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<(String, TaskSpec)> {
        let mut due = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| e.next_run <= now) {
            due.push((entry.name.clone(), entry.task.clone()));
            entry.next_run = entry.schedule.next_after(now);
        }
        due
    }

    /// Runs until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        for entry in &self.entries {
            info!(entry = %entry.name, schedule = %entry.schedule, next_run = %entry.next_run, "Beat entry");
        }
        if self.entries.is_empty() {
            info!("No beat entries enabled, waiting for shutdown");
        }

        loop {
            let wait = match self.next_due() {
                Some(at) => (at - Utc::now()).to_std().unwrap_or_default(),
                // nothing to schedule: just idle until shutdown
                None => std::time::Duration::from_secs(3600),
            };
            debug!(wait_secs = wait.as_secs(), "Beat sleeping");

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Beat received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            for (name, task) in self.take_due(Utc::now()) {
                let job = Job::for_task(task, &self.policy);
                match self.queue.enqueue(job).await {
                    Ok(job_id) => info!(entry = %name, job_id = %job_id, "Enqueued scheduled job"),
                    Err(e) => error!(entry = %name, error = %e, "Failed to enqueue scheduled job"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_daily_next_after() {
        let schedule = Schedule::Daily {
            hour: 23,
            minute: 30,
        };
        assert_eq!(
            schedule.next_after(utc(2024, 5, 1, 10, 0, 0)),
            utc(2024, 5, 1, 23, 30, 0)
        );
        // strictly after
        assert_eq!(
            schedule.next_after(utc(2024, 5, 1, 23, 30, 0)),
            utc(2024, 5, 2, 23, 30, 0)
        );
    }

    #[test]
    fn test_weekly_next_after() {
        // 2024-05-01 is a Wednesday
        let monday = Schedule::Weekly {
            weekday: 1,
            hour: 2,
            minute: 0,
        };
        assert_eq!(
            monday.next_after(utc(2024, 5, 1, 12, 0, 0)),
            utc(2024, 5, 6, 2, 0, 0)
        );
        assert_eq!(
            monday.next_after(utc(2024, 5, 6, 2, 0, 0)),
            utc(2024, 5, 13, 2, 0, 0)
        );

        let sunday = Schedule::Weekly {
            weekday: 0,
            hour: 0,
            minute: 0,
        };
        assert_eq!(
            sunday.next_after(utc(2024, 5, 4, 23, 59, 59)),
            utc(2024, 5, 5, 0, 0, 0)
        );
    }

    #[test]
    fn test_hourly_next_after() {
        let schedule = Schedule::Hourly { minute: 0 };
        assert_eq!(
            schedule.next_after(utc(2024, 5, 1, 10, 0, 0)),
            utc(2024, 5, 1, 11, 0, 0)
        );
        let quarter = Schedule::Hourly { minute: 15 };
        assert_eq!(
            quarter.next_after(utc(2024, 5, 1, 10, 14, 59)),
            utc(2024, 5, 1, 10, 15, 0)
        );
        assert_eq!(
            quarter.next_after(utc(2024, 12, 31, 23, 20, 0)),
            utc(2025, 1, 1, 0, 15, 0)
        );
    }

    #[test]
    fn test_interval_first_run_is_start_plus_interval() {
        let schedule = Schedule::Interval { seconds: 6 * 3600 };
        assert_eq!(
            schedule.next_after(utc(2024, 5, 1, 10, 0, 0)),
            utc(2024, 5, 1, 16, 0, 0)
        );
    }

    #[test]
    fn test_validate() {
        assert!(Schedule::Daily { hour: 23, minute: 59 }.validate().is_ok());
        assert!(Schedule::Daily { hour: 24, minute: 0 }.validate().is_err());
        assert!(Schedule::Weekly {
            weekday: 7,
            hour: 0,
            minute: 0
        }
        .validate()
        .is_err());
        assert!(Schedule::Hourly { minute: 60 }.validate().is_err());
        assert!(Schedule::Interval { seconds: 0 }.validate().is_err());
    }

    #[test]
    fn test_schedule_yaml_shape() {
        let schedule: Schedule =
            serde_yaml::from_str("kind: weekly\nweekday: 1\nhour: 2\nminute: 0\n").unwrap();
        assert_eq!(
            schedule,
            Schedule::Weekly {
                weekday: 1,
                hour: 2,
                minute: 0
            }
        );
        assert_eq!(schedule.to_string(), "weekly on Monday at 02:00 UTC");
    }

    #[test]
    fn test_beat_entries_follow_flags() {
        let now = utc(2024, 5, 1, 12, 0, 0);
        let mut catalog = ScrapeCatalog::default();

        let names: Vec<_> = beat_entries(&catalog, now)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(
            names,
            vec!["daily_scrapes", "hourly_hot_scrapes", "scrape_and_upload"]
        );

        catalog.global.scheduled_scraping_enabled = false;
        let entries = beat_entries(&catalog, now);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task, TaskSpec::ScrapeAndUpload);

        catalog.global.scheduled_scraping_enabled = true;
        catalog.global.master_enabled = false;
        assert_eq!(beat_entries(&catalog, now).len(), 1);
    }

    #[test]
    fn test_entries_produce_scheduled_scrape_tasks() {
        let entries = beat_entries(&ScrapeCatalog::default(), utc(2024, 5, 1, 12, 0, 0));
        assert_eq!(
            entries[0].task,
            TaskSpec::ScheduledScrape {
                schedule: "daily_scrapes".to_string()
            }
        );
        assert_eq!(entries[0].next_run, utc(2024, 5, 1, 23, 30, 0));
        assert_eq!(entries[1].next_run, utc(2024, 5, 1, 13, 0, 0));
    }
}
