//! Listing categories, time filters and scrape targets understood by URS.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// A subreddit listing category, identified by its single-letter URS code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    Hot,
    New,
    Top,
    Rising,
    Controversial,
    Search,
}

impl Category {
    /// All categories in URS code order.
    pub const ALL: [Category; 6] = [
        Category::Hot,
        Category::New,
        Category::Top,
        Category::Rising,
        Category::Controversial,
        Category::Search,
    ];

    /// The lower-case code passed on the URS command line.
    pub fn code(&self) -> &'static str {
        match self {
            Category::Hot => "h",
            Category::New => "n",
            Category::Top => "t",
            Category::Rising => "r",
            Category::Controversial => "c",
            Category::Search => "s",
        }
    }

    /// The word URS uses in result file names.
    pub fn file_label(&self) -> &'static str {
        match self {
            Category::Hot => "hot",
            Category::New => "new",
            Category::Top => "top",
            Category::Rising => "rising",
            Category::Controversial => "controversial",
            Category::Search => "search",
        }
    }

    /// Whether URS accepts a time filter for this category.
    pub fn accepts_time_filter(&self) -> bool {
        matches!(
            self,
            Category::Top | Category::Controversial | Category::Search
        )
    }

    pub fn is_search(&self) -> bool {
        matches!(self, Category::Search)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Category {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "h" | "hot" => Ok(Category::Hot),
            "n" | "new" => Ok(Category::New),
            "t" | "top" => Ok(Category::Top),
            "r" | "rising" => Ok(Category::Rising),
            "c" | "controversial" => Ok(Category::Controversial),
            "s" | "search" => Ok(Category::Search),
            _ => Err(ScrapeError::InvalidCategory(s.to_string())),
        }
    }
}

impl TryFrom<String> for Category {
    type Error = ScrapeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.code().to_string()
    }
}

/// Time window applied to top, controversial and search listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFilter {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" => Ok(TimeFilter::Hour),
            "day" => Ok(TimeFilter::Day),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            "year" => Ok(TimeFilter::Year),
            "all" => Ok(TimeFilter::All),
            _ => Err(ScrapeError::InvalidTimeFilter(s.to_string())),
        }
    }
}

/// What a subreddit scrape asks for: a result count, or search keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeTarget {
    Count(u32),
    Keywords(String),
}

impl ScrapeTarget {
    /// Parses a CLI argument for the given category.
    ///
    /// Search takes the raw text as keywords; every other category needs a
    /// positive integer.
    pub fn parse_for(
        category: Category,
        subreddit: &str,
        raw: &str,
    ) -> Result<Self, ScrapeError> {
        let target = if category.is_search() {
            ScrapeTarget::Keywords(raw.trim().to_string())
        } else {
            let n = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ScrapeError::InvalidTarget {
                    subreddit: subreddit.to_string(),
                    reason: format!("'{}' is not a result count", raw),
                })?;
            ScrapeTarget::Count(n)
        };
        target.validate_for(category, subreddit)?;
        Ok(target)
    }

    /// Checks the target is usable with `category`.
    pub fn validate_for(&self, category: Category, subreddit: &str) -> Result<(), ScrapeError> {
        let invalid = |reason: &str| ScrapeError::InvalidTarget {
            subreddit: subreddit.to_string(),
            reason: reason.to_string(),
        };
        match (category.is_search(), self) {
            (true, ScrapeTarget::Keywords(k)) if !k.trim().is_empty() => Ok(()),
            (true, ScrapeTarget::Keywords(_)) => Err(invalid("search keywords cannot be empty")),
            (true, ScrapeTarget::Count(_)) => Err(invalid("search requires keywords")),
            (false, ScrapeTarget::Count(0)) => Err(invalid("n_results must be positive")),
            (false, ScrapeTarget::Count(_)) => Ok(()),
            (false, ScrapeTarget::Keywords(_)) => {
                Err(invalid("only search accepts keywords, use n_results"))
            }
        }
    }

    /// The value placed on the URS command line after the category code.
    pub fn as_arg(&self) -> String {
        match self {
            ScrapeTarget::Count(n) => n.to_string(),
            ScrapeTarget::Keywords(k) => k.clone(),
        }
    }

    pub fn count(&self) -> Option<u32> {
        match self {
            ScrapeTarget::Count(n) => Some(*n),
            ScrapeTarget::Keywords(_) => None,
        }
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeTarget::Count(n) => write!(f, "{}", n),
            ScrapeTarget::Keywords(k) => write!(f, "\"{}\"", k),
        }
    }
}
