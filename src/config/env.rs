//! Process configuration read from the environment.
//!
//! Connection settings for Redis, Postgres and R2, the Reddit credentials
//! forwarded to URS, and the local directory layout all come from environment
//! variables (optionally seeded from a `.env` file by the binary).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The scrape catalog file could not be parsed.
    #[error("Catalog parse error in {path}: {message}")]
    CatalogParse { path: PathBuf, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bucket used when `R2_BUCKET_NAME` is unset.
pub const DEFAULT_R2_BUCKET: &str = "creditcardsindia";

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Full connection URL from `REDIS_URL`; takes precedence over the
    /// host, port and password.
    pub url: Option<String>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            url: None,
        }
    }
}

impl RedisSettings {
    /// Builds the connection URL.
    ///
    /// A password implies a managed instance reached over TLS; certificate
    /// verification is skipped there (`#insecure`). The password is
    /// percent-encoded so `@`, `/` or `#` in it cannot change the target.
    pub fn url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "rediss://:{}@{}:{}/#insecure",
                urlencoding::encode(password),
                self.host,
                self.port
            ),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// Credentials for the S3-compatible R2 bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct R2Settings {
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: String,
}

impl R2Settings {
    /// Returns true when endpoint and both keys are present.
    pub fn is_complete(&self) -> bool {
        [
            &self.endpoint_url,
            &self.access_key_id,
            &self.secret_access_key,
        ]
        .iter()
        .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

/// Reddit API credentials handed to the URS subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedditCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: Option<String>,
}

impl RedditCredentials {
    /// Environment pairs to set on the URS process.
    pub fn env_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(ref id) = self.client_id {
            pairs.push(("CLIENT_ID", id.clone()));
        }
        if let Some(ref secret) = self.client_secret {
            pairs.push(("CLIENT_SECRET", secret.clone()));
        }
        if let Some(ref agent) = self.user_agent {
            pairs.push(("USER_AGENT", agent.clone()));
        }
        pairs
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis: RedisSettings,
    /// Postgres URL. `None` disables database integration.
    pub database_url: Option<String>,
    pub r2: R2Settings,
    pub reddit: RedditCredentials,
    /// Directory URS runs in.
    pub urs_dir: PathBuf,
    /// Command line that launches URS (split on whitespace).
    pub urs_command: String,
    /// Root of the dated scrape output (`{scrapes_dir}/{YYYY-MM-DD}/...`).
    pub scrapes_dir: PathBuf,
    /// Where archives are written before upload.
    pub archive_dir: PathBuf,
    /// Path of the YAML scrape catalog.
    pub catalog_path: PathBuf,
    /// Redis queue name.
    pub queue_name: String,
    /// Worker count override; `None` means the catalog's `max_concurrent_tasks`.
    pub workers: Option<usize>,
    /// How long job results stay readable in Redis.
    pub result_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisSettings::default(),
            database_url: None,
            r2: R2Settings {
                bucket: DEFAULT_R2_BUCKET.to_string(),
                ..Default::default()
            },
            reddit: RedditCredentials::default(),
            urs_dir: PathBuf::from("urs"),
            urs_command: "poetry run python Urs.py".to_string(),
            scrapes_dir: PathBuf::from("scrapes"),
            archive_dir: PathBuf::from("."),
            catalog_path: PathBuf::from("config/scrape_catalog.yaml"),
            queue_name: "reddit_harvest".to_string(),
            workers: None,
            result_ttl: Duration::from_secs(3600),
        }
    }
}

impl AppConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_HOST` / `REDIS_PORT` / `REDIS_PASSWORD`, or `REDIS_URL`
    /// - `DATABASE_URL` (optional)
    /// - `R2_ENDPOINT_URL`, `R2_ACCESS_KEY_ID`, `R2_SECRET_ACCESS_KEY`, `R2_BUCKET_NAME`
    /// - `REDDIT_CLIENT_ID`, `REDDIT_CLIENT_SECRET`, `REDDIT_USER_AGENT`
    /// - `HARVEST_URS_DIR`, `HARVEST_URS_COMMAND`, `HARVEST_SCRAPES_DIR`,
    ///   `HARVEST_ARCHIVE_DIR`, `HARVEST_CATALOG`, `HARVEST_QUEUE`,
    ///   `HARVEST_WORKERS`, `HARVEST_RESULT_TTL_SECS`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = env_opt("REDIS_HOST") {
            config.redis.host = val;
        }
        if let Some(val) = env_opt("REDIS_PORT") {
            config.redis.port = parse_env_value(&val, "REDIS_PORT")?;
        }
        config.redis.password = env_opt("REDIS_PASSWORD");
        if let Some(val) = env_opt("REDIS_URL") {
            config.redis.url = Some(parse_redis_url(&val)?);
        }

        config.database_url = env_opt("DATABASE_URL");

        config.r2.endpoint_url = env_opt("R2_ENDPOINT_URL");
        config.r2.access_key_id = env_opt("R2_ACCESS_KEY_ID");
        config.r2.secret_access_key = env_opt("R2_SECRET_ACCESS_KEY");
        if let Some(val) = env_opt("R2_BUCKET_NAME") {
            config.r2.bucket = val;
        }

        config.reddit = RedditCredentials {
            client_id: env_opt("REDDIT_CLIENT_ID"),
            client_secret: env_opt("REDDIT_CLIENT_SECRET"),
            user_agent: env_opt("REDDIT_USER_AGENT"),
        };

        if let Some(val) = env_opt("HARVEST_URS_DIR") {
            config.urs_dir = PathBuf::from(val);
        }
        if let Some(val) = env_opt("HARVEST_URS_COMMAND") {
            config.urs_command = val;
        }
        if let Some(val) = env_opt("HARVEST_SCRAPES_DIR") {
            config.scrapes_dir = PathBuf::from(val);
        }
        if let Some(val) = env_opt("HARVEST_ARCHIVE_DIR") {
            config.archive_dir = PathBuf::from(val);
        }
        if let Some(val) = env_opt("HARVEST_CATALOG") {
            config.catalog_path = PathBuf::from(val);
        }
        if let Some(val) = env_opt("HARVEST_QUEUE") {
            config.queue_name = val;
        }
        if let Some(val) = env_opt("HARVEST_WORKERS") {
            config.workers = Some(parse_env_value(&val, "HARVEST_WORKERS")?);
        }
        if let Some(val) = env_opt("HARVEST_RESULT_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "HARVEST_RESULT_TTL_SECS")?;
            config.result_ttl = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.host.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis host cannot be empty".to_string(),
            ));
        }

        if self.redis.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "redis port must be greater than 0".to_string(),
            ));
        }

        if self.urs_command.split_whitespace().next().is_none() {
            return Err(ConfigError::ValidationFailed(
                "urs_command cannot be empty".to_string(),
            ));
        }

        if self.queue_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        if self.workers == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.result_ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "result_ttl must be greater than 0".to_string(),
            ));
        }

        if self.r2.bucket.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "r2 bucket cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the Redis connection URL.
    pub fn redis_url(&self) -> String {
        self.redis.url()
    }

    /// Returns the R2 settings if they are usable for an upload.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` when any credential is missing.
    pub fn r2(&self) -> Result<&R2Settings, ConfigError> {
        if self.r2.is_complete() {
            Ok(&self.r2)
        } else {
            Err(ConfigError::ValidationFailed(
                "R2 configuration is incomplete. Please check R2_ENDPOINT_URL, \
                 R2_ACCESS_KEY_ID and R2_SECRET_ACCESS_KEY"
                    .to_string(),
            ))
        }
    }

    /// Builder method to set Redis settings.
    pub fn with_redis(mut self, redis: RedisSettings) -> Self {
        self.redis = redis;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Builder method to set R2 settings.
    pub fn with_r2(mut self, r2: R2Settings) -> Self {
        self.r2 = r2;
        self
    }

    /// Builder method to set the URS directory.
    pub fn with_urs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.urs_dir = dir.into();
        self
    }

    /// Builder method to set the URS command line.
    pub fn with_urs_command(mut self, command: impl Into<String>) -> Self {
        self.urs_command = command.into();
        self
    }

    /// Builder method to set the scrapes root.
    pub fn with_scrapes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scrapes_dir = dir.into();
        self
    }

    /// Builder method to set the archive output directory.
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = dir.into();
        self
    }

    /// Builder method to set the catalog path.
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = path.into();
        self
    }

    /// Builder method to set the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Builder method to set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
}

/// Reads an environment variable, treating an empty value as unset.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Accepts `redis://` and `rediss://` URLs.
fn parse_redis_url(value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.starts_with("redis://") || value.starts_with("rediss://") {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidValue {
            key: "REDIS_URL".to_string(),
            message: format!("expected a redis:// or rediss:// URL, got '{}'", value),
        })
    }
}

/// Parse an environment variable value into a type.
pub(crate) fn parse_env_value<T: std::str::FromStr>(
    value: &str,
    key: &str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse a value as a boolean.
pub(crate) fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.redis.host, "localhost");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.r2.bucket, DEFAULT_R2_BUCKET);
        assert_eq!(config.scrapes_dir, PathBuf::from("scrapes"));
        assert_eq!(config.result_ttl, Duration::from_secs(3600));
        assert!(config.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_url_without_password() {
        let settings = RedisSettings {
            host: "cache.internal".to_string(),
            port: 6380,
            ..Default::default()
        };
        assert_eq!(settings.url(), "redis://cache.internal:6380");
    }

    #[test]
    fn test_redis_url_with_password() {
        let settings = RedisSettings {
            host: "managed.example.com".to_string(),
            port: 25061,
            password: Some("s3cret".to_string()),
            url: None,
        };
        let url = settings.url();
        assert!(url.starts_with("rediss://:s3cret@managed.example.com:25061"));
        assert!(url.ends_with("#insecure"));
    }

    #[test]
    fn test_redis_url_encodes_password() {
        let settings = RedisSettings {
            host: "managed.example.com".to_string(),
            port: 25061,
            password: Some("p@ss/w#rd%1".to_string()),
            url: None,
        };
        assert_eq!(
            settings.url(),
            "rediss://:p%40ss%2Fw%23rd%251@managed.example.com:25061/#insecure"
        );
    }

    #[test]
    fn test_explicit_redis_url_wins() {
        let settings = RedisSettings {
            password: Some("ignored".to_string()),
            url: Some("redis://queue.internal:6390/2".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.url(), "redis://queue.internal:6390/2");

        assert_eq!(
            parse_redis_url(" rediss://:pw@host:1/#insecure ").unwrap(),
            "rediss://:pw@host:1/#insecure"
        );
        let err = parse_redis_url("http://host:6379").unwrap_err();
        assert!(err.to_string().contains("REDIS_URL"));
    }

    #[test]
    fn test_redis_url_empty_password_is_plain() {
        let settings = RedisSettings {
            password: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(settings.url(), "redis://localhost:6379");
    }

    #[test]
    fn test_r2_incomplete() {
        let config = AppConfig::default().with_r2(R2Settings {
            endpoint_url: Some("https://acct.r2.cloudflarestorage.com".to_string()),
            access_key_id: Some("key".to_string()),
            secret_access_key: None,
            bucket: "bucket".to_string(),
        });
        let err = config.r2().unwrap_err();
        assert!(err.to_string().contains("R2 configuration is incomplete"));
    }

    #[test]
    fn test_r2_complete() {
        let config = AppConfig::default().with_r2(R2Settings {
            endpoint_url: Some("https://acct.r2.cloudflarestorage.com".to_string()),
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            bucket: "bucket".to_string(),
        });
        assert_eq!(config.r2().unwrap().bucket, "bucket");
    }

    #[test]
    fn test_validation_failures() {
        let config = AppConfig::default().with_urs_command("   ");
        assert!(config.validate().unwrap_err().to_string().contains("urs_command"));

        let config = AppConfig::default().with_workers(0);
        assert!(config.validate().unwrap_err().to_string().contains("workers"));

        let config = AppConfig::default().with_queue_name("");
        assert!(config.validate().unwrap_err().to_string().contains("queue_name"));
    }

    #[test]
    fn test_reddit_env_pairs() {
        let creds = RedditCredentials {
            client_id: Some("id".to_string()),
            client_secret: None,
            user_agent: Some("agent".to_string()),
        };
        let pairs = creds.env_pairs();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("CLIENT_ID", "id".to_string())));
        assert!(pairs.contains(&("USER_AGENT", "agent".to_string())));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("ON", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(!parse_env_bool("no", "test").unwrap());
        assert!(parse_env_bool("maybe", "test").is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let port: u16 = parse_env_value(" 6379 ", "REDIS_PORT").unwrap();
        assert_eq!(port, 6379);
        let err = parse_env_value::<u16>("abc", "REDIS_PORT").unwrap_err();
        assert!(err.to_string().contains("REDIS_PORT"));
    }
}
