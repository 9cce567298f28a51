//! URS subprocess runner.
//!
//! URS asks for confirmation (`[Y/N]`) before it starts scraping. The runner
//! watches stdout for that prompt, answers it, then waits for the process to
//! finish. Output is forwarded line by line at debug level.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::category::{Category, ScrapeTarget, TimeFilter};
use crate::config::{AppConfig, ScrapeOptions};
use crate::error::ScrapeError;

/// The confirmation marker URS prints.
pub const CONFIRM_PROMPT: &[u8] = b"[Y/N]";

const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// Incremental search for [`CONFIRM_PROMPT`] in a byte stream.
///
/// Handles the marker being split across reads and collects complete lines
/// for logging.
#[derive(Debug, Default)]
pub struct PromptScanner {
    tail: Vec<u8>,
    line: Vec<u8>,
}

impl PromptScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk. Returns true once the prompt has been seen in the
    /// stream so far (counting bytes carried over from previous chunks).
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        self.log_lines(chunk);

        self.tail.extend_from_slice(chunk);
        let found = self
            .tail
            .windows(CONFIRM_PROMPT.len())
            .any(|w| w == CONFIRM_PROMPT);
        let keep = CONFIRM_PROMPT.len() - 1;
        if self.tail.len() > keep {
            self.tail.drain(..self.tail.len() - keep);
        }
        found
    }

    /// Logs whatever partial line is still buffered.
    pub fn flush(&mut self) {
        if !self.line.is_empty() {
            debug!(target: "urs", "{}", String::from_utf8_lossy(&self.line).trim_end());
            self.line.clear();
        }
    }

    fn log_lines(&mut self, chunk: &[u8]) {
        for &b in chunk {
            if b == b'\n' {
                debug!(target: "urs", "{}", String::from_utf8_lossy(&self.line).trim_end());
                self.line.clear();
            } else {
                self.line.push(b);
            }
        }
    }
}

/// How the confirmation phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The prompt appeared and was answered.
    Answered,
    /// The process closed stdout without prompting.
    EndedBeforePrompt,
    /// No prompt within the prompt timeout; the process was killed.
    TimedOut,
}

/// Summary of one URS invocation.
#[derive(Debug, Clone)]
pub struct UrsRun {
    pub outcome: PromptOutcome,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl UrsRun {
    pub fn succeeded(&self) -> bool {
        self.outcome != PromptOutcome::TimedOut && self.exit_code.unwrap_or(0) == 0
    }
}

/// Launches URS with a fixed command prefix and working directory.
#[derive(Debug, Clone)]
pub struct UrsRunner {
    program: String,
    base_args: Vec<String>,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
    prompt_timeout: Duration,
    completion_timeout: Duration,
}

impl UrsRunner {
    /// Creates a runner from a whitespace-separated command line such as
    /// `poetry run python Urs.py`.
    pub fn new(command_line: &str, working_dir: impl Into<PathBuf>) -> Result<Self, ScrapeError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(ScrapeError::EmptyCommand)?;
        Ok(Self {
            program,
            base_args: parts.collect(),
            working_dir: working_dir.into(),
            env: Vec::new(),
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        })
    }

    /// Creates a runner from process configuration, passing the Reddit
    /// credentials through the environment.
    pub fn from_config(config: &AppConfig) -> Result<Self, ScrapeError> {
        let mut runner = Self::new(&config.urs_command, &config.urs_dir)?;
        runner.env = config
            .reddit
            .env_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Ok(runner)
    }

    pub fn with_timeouts(mut self, prompt: Duration, completion: Duration) -> Self {
        self.prompt_timeout = prompt;
        self.completion_timeout = completion;
        self
    }

    /// Limits how long a run may take once its prompt is answered.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Longest a single invocation can last before it is killed.
    pub fn max_run_time(&self) -> Duration {
        self.prompt_timeout + self.completion_timeout
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Arguments for a subreddit scrape:
    /// `-r {sub} {cat} {n|keywords} [time_filter] [--csv] [--rules]`.
    pub fn subreddit_args(
        subreddit: &str,
        category: Category,
        target: &ScrapeTarget,
        time_filter: Option<TimeFilter>,
        options: &ScrapeOptions,
    ) -> Vec<String> {
        let mut args = vec![
            "-r".to_string(),
            subreddit.to_string(),
            category.code().to_string(),
            target.as_arg(),
        ];
        if let Some(tf) = time_filter {
            args.push(tf.as_str().to_string());
        }
        if options.csv {
            args.push("--csv".to_string());
        }
        if options.rules {
            args.push("--rules".to_string());
        }
        args
    }

    /// Arguments for a comment scrape: `-c {url} {n_comments}`.
    pub fn comment_args(url: &str, n_comments: u32) -> Vec<String> {
        vec!["-c".to_string(), url.to_string(), n_comments.to_string()]
    }

    pub async fn scrape_subreddit(
        &self,
        subreddit: &str,
        category: Category,
        target: &ScrapeTarget,
        time_filter: Option<TimeFilter>,
        options: &ScrapeOptions,
    ) -> Result<UrsRun, ScrapeError> {
        info!(
            subreddit = %subreddit,
            category = %category,
            target = %target,
            "Scraping subreddit"
        );
        let args = Self::subreddit_args(subreddit, category, target, time_filter, options);
        self.run(&args, options.auto_confirm).await
    }

    /// Scrapes the comments of one submission. `n_comments` 0 means all.
    pub async fn scrape_comments(&self, url: &str, n_comments: u32) -> Result<UrsRun, ScrapeError> {
        info!(url = %url, n_comments, "Scraping comments");
        self.run(&Self::comment_args(url, n_comments), true).await
    }

    /// Runs URS with `args`, answering the prompt with `y` or `n`.
    pub async fn run(&self, args: &[String], auto_confirm: bool) -> Result<UrsRun, ScrapeError> {
        let start = Instant::now();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let command_line = format!("{} {}", self.program, args.join(" "));
        debug!(command = %command_line, dir = %self.working_dir.display(), "Spawning URS");

        let mut child = cmd.spawn().map_err(|source| ScrapeError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }
        let Some(mut stdout) = child.stdout.take() else {
            return Err(ScrapeError::Io(std::io::Error::other("URS stdout not captured")));
        };

        let mut scanner = PromptScanner::new();
        let outcome =
            match tokio::time::timeout(self.prompt_timeout, wait_for_prompt(&mut stdout, &mut scanner))
                .await
            {
                Ok(Ok(true)) => {
                    let answer: &[u8] = if auto_confirm { b"y\n" } else { b"n\n" };
                    debug!(auto_confirm, "Answering URS confirmation prompt");
                    if let Some(mut stdin) = child.stdin.take() {
                        stdin.write_all(answer).await?;
                        stdin.flush().await?;
                    }
                    PromptOutcome::Answered
                }
                Ok(Ok(false)) => {
                    warn!(command = %command_line, "URS ended before confirmation prompt");
                    PromptOutcome::EndedBeforePrompt
                }
                Ok(Err(e)) => return Err(ScrapeError::Io(e)),
                Err(_) => {
                    warn!(
                        command = %command_line,
                        timeout = ?self.prompt_timeout,
                        "Timed out waiting for URS prompt"
                    );
                    child.kill().await.ok();
                    PromptOutcome::TimedOut
                }
            };

        let exit_code = if outcome == PromptOutcome::TimedOut {
            None
        } else {
            self.wait_for_exit(&mut child, &mut stdout, &mut scanner).await?
        };

        Ok(UrsRun {
            outcome,
            exit_code,
            duration: start.elapsed(),
        })
    }

    async fn wait_for_exit<R>(
        &self,
        child: &mut Child,
        stdout: &mut R,
        scanner: &mut PromptScanner,
    ) -> Result<Option<i32>, ScrapeError>
    where
        R: AsyncRead + Unpin,
    {
        let finish = async {
            drain(stdout, scanner).await?;
            child.wait().await
        };
        match tokio::time::timeout(self.completion_timeout, finish).await {
            Ok(Ok(status)) => {
                debug!(code = ?status.code(), "URS exited");
                Ok(status.code())
            }
            Ok(Err(e)) => Err(ScrapeError::Io(e)),
            Err(_) => {
                child.kill().await.ok();
                Err(ScrapeError::Timeout(self.completion_timeout))
            }
        }
    }
}

/// Reads until the prompt appears (`true`) or stdout closes (`false`).
async fn wait_for_prompt<R>(stdout: &mut R, scanner: &mut PromptScanner) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            scanner.flush();
            return Ok(false);
        }
        if scanner.feed(&buf[..n]) {
            return Ok(true);
        }
    }
}

async fn drain<R>(stdout: &mut R, scanner: &mut PromptScanner) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            scanner.flush();
            return Ok(());
        }
        scanner.feed(&buf[..n]);
    }
}

async fn forward_stderr<R>(mut stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut scanner = PromptScanner::new();
    let mut buf = [0u8; 4096];
    while let Ok(n) = stderr.read(&mut buf).await {
        if n == 0 {
            break;
        }
        scanner.feed(&buf[..n]);
    }
    scanner.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_finds_prompt_in_one_chunk() {
        let mut scanner = PromptScanner::new();
        assert!(!scanner.feed(b"Scraping r/rust\n"));
        assert!(scanner.feed(b"Confirm options? [Y/N] "));
    }

    #[test]
    fn test_scanner_finds_split_prompt() {
        let mut scanner = PromptScanner::new();
        assert!(!scanner.feed(b"Continue? [Y"));
        assert!(!scanner.feed(b"/"));
        assert!(scanner.feed(b"N] "));
    }

    #[test]
    fn test_scanner_ignores_lowercase() {
        let mut scanner = PromptScanner::new();
        assert!(!scanner.feed(b"[y/n]"));
    }

    #[test]
    fn test_subreddit_args() {
        let options = ScrapeOptions {
            csv: true,
            rules: true,
            auto_confirm: true,
        };
        let args = UrsRunner::subreddit_args(
            "CreditCardsIndia",
            Category::Top,
            &ScrapeTarget::Count(25),
            Some(TimeFilter::Day),
            &options,
        );
        assert_eq!(
            args,
            vec!["-r", "CreditCardsIndia", "t", "25", "day", "--csv", "--rules"]
        );
    }

    #[test]
    fn test_search_args_keep_keywords_as_single_argument() {
        let args = UrsRunner::subreddit_args(
            "CreditCardsIndia",
            Category::Search,
            &ScrapeTarget::Keywords("cashback rewards points".to_string()),
            None,
            &ScrapeOptions::default(),
        );
        assert_eq!(args.len(), 4);
        assert_eq!(args[3], "cashback rewards points");
    }

    #[test]
    fn test_comment_args() {
        let args = UrsRunner::comment_args("https://www.reddit.com/r/x/comments/abc/t/", 0);
        assert_eq!(args, vec!["-c", "https://www.reddit.com/r/x/comments/abc/t/", "0"]);
    }

    #[test]
    fn test_new_splits_command_line() {
        let runner = UrsRunner::new("poetry run python Urs.py", "urs").unwrap();
        assert_eq!(runner.program, "poetry");
        assert_eq!(runner.base_args, vec!["run", "python", "Urs.py"]);
        assert_eq!(runner.max_run_time(), Duration::from_secs(180));
        let runner = runner.with_operation_timeout(Duration::from_secs(300));
        assert_eq!(runner.max_run_time(), Duration::from_secs(360));
        assert!(matches!(
            UrsRunner::new("   ", "urs"),
            Err(ScrapeError::EmptyCommand)
        ));
    }

    #[test]
    fn test_from_config_passes_credentials() {
        let mut config = AppConfig::default();
        config.reddit.client_id = Some("abc".to_string());
        let runner = UrsRunner::from_config(&config).unwrap();
        assert!(runner
            .env
            .contains(&("CLIENT_ID".to_string(), "abc".to_string())));
        assert_eq!(runner.working_dir(), Path::new("urs"));
    }
}
