//! Command-line interface for subreddit-harvest.
//!
//! Runs the worker and beat services, enqueues scrape jobs, edits the scrape
//! catalog and inspects the database and the R2 bucket.

mod commands;
mod inspect;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
