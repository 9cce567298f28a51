//! Driving the URS scraper and reading what it writes.
//!
//! URS is an external program; this module builds its command lines, answers
//! its confirmation prompt, and locates and parses the JSON files it leaves
//! under the dated scrapes directory.

mod category;
mod files;
mod urs;

use std::sync::OnceLock;

use regex::Regex;

pub use category::{Category, ScrapeTarget, TimeFilter};
pub use files::{
    extract_reddit_id, extract_submission_urls, load_posts, ScrapeLayout, DISCOVERY_ATTEMPTS,
    DISCOVERY_INTERVAL,
};
pub use urs::{PromptOutcome, PromptScanner, UrsRun, UrsRunner, CONFIRM_PROMPT};

use crate::error::ScrapeError;

static SUBREDDIT_NAME: OnceLock<Option<Regex>> = OnceLock::new();

/// Checks a subreddit name against Reddit's naming rules.
pub fn validate_subreddit_name(name: &str) -> Result<(), ScrapeError> {
    let re = SUBREDDIT_NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{2,21}$").ok());
    if re.as_ref().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(ScrapeError::InvalidSubreddit(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_subreddit_name() {
        assert!(validate_subreddit_name("CreditCardsIndia").is_ok());
        assert!(validate_subreddit_name("rust").is_ok());
        assert!(validate_subreddit_name("r").is_err());
        assert!(validate_subreddit_name("bad name").is_err());
        assert!(validate_subreddit_name("../etc").is_err());
    }
}
