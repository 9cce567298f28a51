//! Text rendering of a stored post and its comments.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Serialize;

use super::queries::{CommentRow, SubmissionWithComments};

/// Score distribution of a comment thread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommentStats {
    pub total_comments: usize,
    /// Score of 10 or more.
    pub high_score_comments: usize,
    /// Score from 1 to 9.
    pub medium_score_comments: usize,
    /// Score below 1.
    pub low_score_comments: usize,
    pub highest_score: i32,
    pub lowest_score: i32,
    pub average_score: f64,
}

impl CommentStats {
    pub fn from_comments(comments: &[CommentRow]) -> Self {
        Self::from_scores(comments.iter().map(|c| c.score))
    }

    pub fn from_scores(scores: impl IntoIterator<Item = i32>) -> Self {
        let scores: Vec<i32> = scores.into_iter().collect();
        let total = scores.len();
        let sum: i64 = scores.iter().map(|&s| s as i64).sum();
        Self {
            total_comments: total,
            high_score_comments: scores.iter().filter(|&&s| s >= 10).count(),
            medium_score_comments: scores.iter().filter(|&&s| (1..10).contains(&s)).count(),
            low_score_comments: scores.iter().filter(|&&s| s < 1).count(),
            highest_score: scores.iter().copied().max().unwrap_or(0),
            lowest_score: scores.iter().copied().min().unwrap_or(0),
            average_score: if total == 0 {
                0.0
            } else {
                sum as f64 / total as f64
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Post, summary and every comment.
    #[default]
    Detailed,
    /// Post and summary only.
    Simple,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detailed" => Ok(Self::Detailed),
            "simple" => Ok(Self::Simple),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid format '{}', use 'detailed', 'simple' or 'json'",
                other
            )),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    post: &'a SubmissionWithComments,
    comment_stats: CommentStats,
}

const BODY_PREVIEW_CHARS: usize = 500;

/// Renders `post` in `format`.
pub fn render_post(
    post: &SubmissionWithComments,
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    let stats = CommentStats::from_comments(&post.comments);
    if format == ReportFormat::Json {
        return serde_json::to_string_pretty(&JsonReport {
            post,
            comment_stats: stats,
        });
    }

    let sub = &post.submission;
    let rule = "=".repeat(80);
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "POST: {}", sub.title);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Subreddit:  r/{}", sub.subreddit);
    let _ = writeln!(out, "Reddit ID:  {}", sub.reddit_id);
    let _ = writeln!(out, "Author:     {}", sub.author.as_deref().unwrap_or("[deleted]"));
    let _ = writeln!(out, "Posted:     {}", sub.created_utc.format("%Y-%m-%d %H:%M:%S UTC"));
    match sub.upvote_ratio {
        Some(ratio) => {
            let _ = writeln!(out, "Score:      {} ({:.1}% upvoted)", sub.score, ratio * 100.0);
        }
        None => {
            let _ = writeln!(out, "Score:      {}", sub.score);
        }
    }
    let _ = writeln!(out, "Comments:   {}", stats.total_comments);
    let _ = writeln!(out, "URL:        {}", sub.url);
    if let Some(flair) = &sub.link_flair_text {
        let _ = writeln!(out, "Flair:      {}", flair);
    }

    if let Some(text) = sub.selftext.as_deref().filter(|t| !t.is_empty()) {
        let _ = writeln!(out, "\nContent:\n{}", "-".repeat(60));
        let _ = writeln!(out, "{}", preview(text, BODY_PREVIEW_CHARS));
        let _ = writeln!(out, "{}", "-".repeat(60));
    }

    if stats.total_comments > 0 {
        let _ = writeln!(out, "\nComments summary:");
        let _ = writeln!(out, "  High scoring (>=10): {}", stats.high_score_comments);
        let _ = writeln!(out, "  Medium scoring (1-9): {}", stats.medium_score_comments);
        let _ = writeln!(out, "  Low scoring (<1):    {}", stats.low_score_comments);
        let _ = writeln!(
            out,
            "  Score range: {} to {}",
            stats.lowest_score, stats.highest_score
        );
        let _ = writeln!(out, "  Average score: {:.1}", stats.average_score);
    }

    if format == ReportFormat::Simple {
        return Ok(out);
    }

    let _ = writeln!(out, "\nALL COMMENTS ({}):\n{}", post.comments.len(), rule);
    for (i, comment) in post.comments.iter().enumerate() {
        let _ = writeln!(
            out,
            "\n{:3}. {} | score {} | {}",
            i + 1,
            comment.author.as_deref().unwrap_or("[deleted]"),
            comment.score,
            comment.created_utc.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "     id {}", comment.reddit_id);
        if !comment.parent_id.starts_with("t3_") {
            let _ = writeln!(out, "     reply to {}", comment.parent_id);
        }
        let indent = "  ".repeat(comment.depth.max(0) as usize);
        for line in comment.body.lines() {
            let _ = writeln!(out, "     {}{}", indent, line);
        }
        let _ = writeln!(out, "     {}", "-".repeat(70));
    }
    Ok(out)
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
