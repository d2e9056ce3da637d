//! Configuration types for the alert loop.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::mailbox::SearchQuery;

/// Sleep after a successful iteration (24 h).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Sleep after a failed iteration.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RESULTS: usize = 20;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// When to clear the unread flag on a processed message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkReadPolicy {
    /// Mark read once delivery was attempted, even if it failed.
    #[default]
    AfterAttempt,
    /// Mark read only after the notifier accepted the alert; failed
    /// deliveries stay unread and are retried on the next poll.
    AfterDelivery,
}

impl MarkReadPolicy {
    pub fn should_mark(self, delivered: bool) -> bool {
        match self {
            Self::AfterAttempt => true,
            Self::AfterDelivery => delivered,
        }
    }
}

impl std::str::FromStr for MarkReadPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attempted" | "attempt" => Ok(Self::AfterAttempt),
            "delivered" | "delivery" => Ok(Self::AfterDelivery),
            other => Err(ConfigError::InvalidValue {
                key: "JOB_ALERT_MARK_READ".into(),
                message: format!("expected 'attempted' or 'delivered', got '{other}'"),
            }),
        }
    }
}

/// Alert loop configuration.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Sleep after a successful iteration.
    pub poll_interval: Duration,
    /// Sleep after a failed iteration.
    pub error_backoff: Duration,
    /// Candidates listed per iteration.
    pub max_results: usize,
    /// Server-side search.
    pub query: SearchQuery,
    /// Apply the local keyword classifier before summarizing.
    pub local_filter: bool,
    pub mark_read: MarkReadPolicy,
    /// Request timeout for every HTTP client.
    pub http_timeout: Duration,
    /// Also write daily-rolled log files here.
    pub log_dir: Option<PathBuf>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            max_results: DEFAULT_MAX_RESULTS,
            query: SearchQuery::default(),
            local_filter: true,
            mark_read: MarkReadPolicy::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            log_dir: None,
        }
    }
}

impl AlertConfig {
    /// Read `JOB_ALERT_*` variables. Unparsable numbers fall back to defaults;
    /// an unknown mark-read policy is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = env_parse::<u64>("JOB_ALERT_POLL_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let error_backoff = env_parse::<u64>("JOB_ALERT_ERROR_BACKOFF_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.error_backoff);

        let max_results = env_parse::<usize>("JOB_ALERT_MAX_RESULTS")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_results);

        let http_timeout = env_parse::<u64>("JOB_ALERT_HTTP_TIMEOUT_SECS")
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let query = match std::env::var("JOB_ALERT_QUERY_KEYWORDS") {
            Ok(raw) => SearchQuery {
                unread_only: true,
                keywords: split_list(&raw),
            },
            Err(_) => defaults.query,
        };

        let local_filter = match std::env::var("JOB_ALERT_LOCAL_FILTER") {
            Ok(raw) => parse_bool("JOB_ALERT_LOCAL_FILTER", &raw)?,
            Err(_) => defaults.local_filter,
        };

        let mark_read = match std::env::var("JOB_ALERT_MARK_READ") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.mark_read,
        };

        let log_dir = std::env::var("JOB_ALERT_LOG_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            poll_interval,
            error_backoff,
            max_results,
            query,
            local_filter,
            mark_read,
            http_timeout,
            log_dir,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Comma-separated list, blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
