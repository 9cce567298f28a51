//! In-place edits of the scrape catalog file.
//!
//! Every write first copies the current file to `{file}.backup`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use super::catalog::ScrapeCatalog;
use super::env::ConfigError;

#[derive(Debug, Error)]
pub enum CatalogEditError {
    #[error("Unknown global setting '{0}'")]
    UnknownFlag(String),

    #[error("Schedule '{0}' not found")]
    UnknownSchedule(String),

    #[error("Subreddit r/{subreddit} not found in schedule '{schedule}'")]
    UnknownSubreddit { schedule: String, subreddit: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A global switch in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalFlag {
    Master,
    ScheduledScraping,
    ManualScraping,
    CommentScraping,
    UploadToR2,
    CreateArchives,
}

impl GlobalFlag {
    pub const ALL: [GlobalFlag; 6] = [
        GlobalFlag::Master,
        GlobalFlag::ScheduledScraping,
        GlobalFlag::ManualScraping,
        GlobalFlag::CommentScraping,
        GlobalFlag::UploadToR2,
        GlobalFlag::CreateArchives,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            GlobalFlag::Master => "master_enabled",
            GlobalFlag::ScheduledScraping => "scheduled_scraping_enabled",
            GlobalFlag::ManualScraping => "manual_scraping_enabled",
            GlobalFlag::CommentScraping => "comment_scraping_globally_enabled",
            GlobalFlag::UploadToR2 => "upload_to_r2_enabled",
            GlobalFlag::CreateArchives => "create_archives_enabled",
        }
    }

    fn slot<'a>(&self, catalog: &'a mut ScrapeCatalog) -> &'a mut bool {
        let g = &mut catalog.global;
        match self {
            GlobalFlag::Master => &mut g.master_enabled,
            GlobalFlag::ScheduledScraping => &mut g.scheduled_scraping_enabled,
            GlobalFlag::ManualScraping => &mut g.manual_scraping_enabled,
            GlobalFlag::CommentScraping => &mut g.comment_scraping_globally_enabled,
            GlobalFlag::UploadToR2 => &mut g.upload_to_r2_enabled,
            GlobalFlag::CreateArchives => &mut g.create_archives_enabled,
        }
    }

    pub fn get(&self, catalog: &ScrapeCatalog) -> bool {
        let g = &catalog.global;
        match self {
            GlobalFlag::Master => g.master_enabled,
            GlobalFlag::ScheduledScraping => g.scheduled_scraping_enabled,
            GlobalFlag::ManualScraping => g.manual_scraping_enabled,
            GlobalFlag::CommentScraping => g.comment_scraping_globally_enabled,
            GlobalFlag::UploadToR2 => g.upload_to_r2_enabled,
            GlobalFlag::CreateArchives => g.create_archives_enabled,
        }
    }
}

impl fmt::Display for GlobalFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for GlobalFlag {
    type Err = CatalogEditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GlobalFlag::ALL
            .into_iter()
            .find(|f| f.key() == s)
            .ok_or_else(|| CatalogEditError::UnknownFlag(s.to_string()))
    }
}

/// Result of an edit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The file was rewritten; a backup was taken if one existed.
    Updated { backup: Option<PathBuf> },
    /// The value already matched; nothing was written.
    AlreadySet,
}

/// Applies toggles to a catalog file.
pub struct CatalogEditor {
    path: PathBuf,
}

impl CatalogEditor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backup location for the catalog file.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    pub fn load(&self) -> Result<ScrapeCatalog, CatalogEditError> {
        Ok(ScrapeCatalog::load(&self.path)?)
    }

    pub fn set_global(
        &self,
        flag: GlobalFlag,
        enabled: bool,
    ) -> Result<EditOutcome, CatalogEditError> {
        self.edit(|catalog| {
            let slot = flag.slot(catalog);
            let changed = *slot != enabled;
            *slot = enabled;
            Ok(changed)
        })
    }

    pub fn set_schedule(&self, name: &str, enabled: bool) -> Result<EditOutcome, CatalogEditError> {
        self.edit(|catalog| {
            let schedule = catalog
                .schedule_mut(name)
                .ok_or_else(|| CatalogEditError::UnknownSchedule(name.to_string()))?;
            let changed = schedule.enabled != enabled;
            schedule.enabled = enabled;
            Ok(changed)
        })
    }

    /// Toggles every config for `subreddit` inside `schedule`.
    pub fn set_subreddit(
        &self,
        schedule: &str,
        subreddit: &str,
        enabled: bool,
    ) -> Result<EditOutcome, CatalogEditError> {
        self.edit(|catalog| {
            let def = catalog
                .schedule_mut(schedule)
                .ok_or_else(|| CatalogEditError::UnknownSchedule(schedule.to_string()))?;
            let mut found = false;
            let mut changed = false;
            for config in def
                .subreddits
                .iter_mut()
                .filter(|c| c.name.eq_ignore_ascii_case(subreddit))
            {
                found = true;
                changed |= config.enabled != enabled;
                config.enabled = enabled;
            }
            if !found {
                return Err(CatalogEditError::UnknownSubreddit {
                    schedule: schedule.to_string(),
                    subreddit: subreddit.to_string(),
                });
            }
            Ok(changed)
        })
    }

    /// Writes the defaults to the catalog path (backing up any existing file).
    pub fn init(&self) -> Result<EditOutcome, CatalogEditError> {
        let backup = self.backup()?;
        ScrapeCatalog::default().save(&self.path)?;
        Ok(EditOutcome::Updated { backup })
    }

    /// Flag values and schedule states, for display.
    pub fn list_settings(&self) -> Result<Vec<(String, bool)>, CatalogEditError> {
        let catalog = self.load()?;
        let mut settings: Vec<(String, bool)> = GlobalFlag::ALL
            .iter()
            .map(|f| (f.key().to_string(), f.get(&catalog)))
            .collect();
        settings.extend(
            catalog
                .schedules
                .iter()
                .map(|s| (format!("schedule:{}", s.name), s.enabled)),
        );
        Ok(settings)
    }

    fn edit<F>(&self, apply: F) -> Result<EditOutcome, CatalogEditError>
    where
        F: FnOnce(&mut ScrapeCatalog) -> Result<bool, CatalogEditError>,
    {
        let mut catalog = self.load()?;
        if !apply(&mut catalog)? {
            return Ok(EditOutcome::AlreadySet);
        }
        let backup = self.backup()?;
        catalog.save(&self.path)?;
        tracing::info!(path = %self.path.display(), "Catalog updated");
        Ok(EditOutcome::Updated { backup })
    }

    fn backup(&self) -> Result<Option<PathBuf>, CatalogEditError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let backup = self.backup_path();
        std::fs::copy(&self.path, &backup)?;
        Ok(Some(backup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flag_parse() {
        assert_eq!(
            "upload_to_r2_enabled".parse::<GlobalFlag>().unwrap(),
            GlobalFlag::UploadToR2
        );
        assert!(matches!(
            "turbo_mode".parse::<GlobalFlag>(),
            Err(CatalogEditError::UnknownFlag(_))
        ));
    }

    #[test]
    fn test_backup_path() {
        let editor = CatalogEditor::new("config/scrape_catalog.yaml");
        assert_eq!(
            editor.backup_path(),
            PathBuf::from("config/scrape_catalog.yaml.backup")
        );
    }

    #[test]
    fn test_set_global_writes_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        let editor = CatalogEditor::new(&path);
        editor.init().unwrap();

        let outcome = editor.set_global(GlobalFlag::Master, false).unwrap();
        assert!(matches!(outcome, EditOutcome::Updated { backup: Some(_) }));
        assert!(editor.backup_path().exists());
        assert!(!editor.load().unwrap().global.master_enabled);

        let again = editor.set_global(GlobalFlag::Master, false).unwrap();
        assert_eq!(again, EditOutcome::AlreadySet);
    }

    #[test]
    fn test_set_schedule_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let editor = CatalogEditor::new(dir.path().join("catalog.yaml"));
        let err = editor.set_schedule("fortnightly", true).unwrap_err();
        assert!(matches!(err, CatalogEditError::UnknownSchedule(_)));
    }

    #[test]
    fn test_set_subreddit() {
        let dir = tempfile::tempdir().unwrap();
        let editor = CatalogEditor::new(dir.path().join("catalog.yaml"));

        editor
            .set_subreddit("weekly_scrapes", "PersonalFinanceIndia", true)
            .unwrap();
        let catalog = editor.load().unwrap();
        let weekly = catalog.schedule("weekly_scrapes").unwrap();
        assert!(weekly.subreddits.iter().all(|c| c.enabled));

        let err = editor
            .set_subreddit("weekly_scrapes", "NotThere", false)
            .unwrap_err();
        assert!(matches!(err, CatalogEditError::UnknownSubreddit { .. }));
    }

    #[test]
    fn test_list_settings_contains_flags_and_schedules() {
        let dir = tempfile::tempdir().unwrap();
        let editor = CatalogEditor::new(dir.path().join("missing.yaml"));
        let settings = editor.list_settings().unwrap();
        assert!(settings.contains(&("master_enabled".to_string(), true)));
        assert!(settings.contains(&("schedule:weekly_scrapes".to_string(), false)));
    }
}
