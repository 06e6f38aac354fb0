//! Typed tunables for the outbox dispatcher.
//!
//! This crate only holds the validated, in-memory config bundle. Parsing the
//! process's command line into one is `dispatchbox-cli`'s job.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Validation(String),
}

/// Default values mirror `dispatchbox.config`'s `DEFAULT_*` constants.
pub const DEFAULT_BATCH_SIZE: i64 = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_PARALLEL: usize = 10;
pub const DEFAULT_RETRY_BACKOFF_SECONDS: i64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
pub const DEFAULT_NUM_WORKERS: usize = 1;
pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// The `tracing`/`EnvFilter` directive this level maps to.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::parse(s)
            .ok_or_else(|| ConfigError::Validation(format!("unknown log level: {s}")))
    }
}

/// The full set of tunables for a dispatcher run: poll/batch/retry
/// parameters (consumed by `dispatchbox-worker`), fleet size (consumed by
/// `dispatchbox-supervisor`), and the admin bind address (consumed by
/// `dispatchbox-admin`).
#[derive(Debug, Clone)]
pub struct Config {
    pub dsn: String,
    pub num_workers: usize,
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub max_parallel: usize,
    pub retry_backoff_seconds: i64,
    pub max_attempts: i32,
    pub log_level: LogLevel,
    pub http_host: String,
    pub http_port: u16,
    pub disable_http: bool,
    /// Per-handler dispatch deadline. `None` (the default) preserves
    /// unbounded handler execution.
    pub handler_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            num_workers: DEFAULT_NUM_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_parallel: DEFAULT_MAX_PARALLEL,
            retry_backoff_seconds: DEFAULT_RETRY_BACKOFF_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            log_level: LogLevel::default(),
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            disable_http: false,
            handler_timeout: None,
        }
    }
}

impl Config {
    /// Mirrors the source's constructor-time `ValueError`s: bad values are
    /// programming errors, raised once at startup, never touching the DB.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dsn.trim().is_empty() {
            return Err(ConfigError::Validation("dsn cannot be empty".to_string()));
        }
        if self.num_workers < 1 {
            return Err(ConfigError::Validation(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.batch_size < 1 {
            return Err(ConfigError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_parallel < 1 {
            return Err(ConfigError::Validation(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.max_attempts < 1 {
            return Err(ConfigError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_backoff_seconds < 0 {
            return Err(ConfigError::Validation(
                "retry_backoff_seconds must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_backoff_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_match_source_constants() {
        let cfg = Config {
            dsn: "postgres://x".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.max_parallel, 10);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.num_workers, 1);
        assert_eq!(cfg.retry_backoff_seconds, 30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_dsn_rejected() {
        let cfg = Config::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn batch_size_zero_rejected() {
        let cfg = Config {
            dsn: "postgres://x".to_string(),
            batch_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("bogus"), None);
    }
}
