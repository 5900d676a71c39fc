//! Runtime configuration for the sync core.
//!
//! `ClientConfig` is assembled from `TIDEMARK_*` environment variables. Parsing
//! goes through [`ClientConfig::from_lookup`] so tests can feed a plain map
//! instead of mutating the process environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry queue tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Attempts before an item is moved to the failed store.
    pub max_retries: u32,
    /// Maximum number of pending items kept on disk.
    pub capacity: usize,
    /// First backoff step; doubled per retry of the worst remaining item.
    pub backoff_base: Duration,
    /// Upper bound for the backoff delay.
    pub backoff_cap: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            capacity: 1_000,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Diff synchronizer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffSyncConfig {
    /// Days before "now" included in the local enumeration window.
    pub window_past_days: i64,
    /// Days after "now" included in the local enumeration window.
    pub window_future_days: i64,
    /// Guard applied to every local-store call.
    pub local_timeout: Duration,
}

impl Default for DiffSyncConfig {
    fn default() -> Self {
        Self {
            window_past_days: 30,
            window_future_days: 7,
            local_timeout: Duration::from_secs(15),
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Minimum spacing between two non-forced `sync_all` runs.
    pub debounce: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(15),
        }
    }
}

/// Sliding-window budget for one call category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub max_calls: usize,
    pub window: Duration,
}

impl WindowLimit {
    pub const fn per_minute(max_calls: usize) -> Self {
        Self {
            max_calls,
            window: Duration::from_secs(60),
        }
    }
}

/// Per-method budgets for outbound calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub limits: HashMap<String, WindowLimit>,
    /// Budget for methods without an explicit entry.
    pub fallback: WindowLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits = [
            ("POST", WindowLimit::per_minute(10)),
            ("GET", WindowLimit::per_minute(30)),
            ("DELETE", WindowLimit::per_minute(5)),
            ("PUT", WindowLimit::per_minute(10)),
        ]
        .into_iter()
        .map(|(method, limit)| (method.to_string(), limit))
        .collect();

        Self {
            limits,
            fallback: WindowLimit::per_minute(20),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, method: &str) -> WindowLimit {
        self.limits
            .get(&method.to_ascii_uppercase())
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Longest window across all categories, used for stale-key cleanup.
    pub fn longest_window(&self) -> Duration {
        self.limits
            .values()
            .map(|limit| limit.window)
            .chain(std::iter::once(self.fallback.window))
            .max()
            .unwrap_or(self.fallback.window)
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub queue: QueueConfig,
    pub diff_sync: DiffSyncConfig,
    pub orchestrator: OrchestratorConfig,
    pub rate_limit: RateLimitConfig,
    pub conflict_history_limit: usize,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .field("queue", &self.queue)
            .field("diff_sync", &self.diff_sync)
            .field("orchestrator", &self.orchestrator)
            .field("rate_limit", &self.rate_limit)
            .field("conflict_history_limit", &self.conflict_history_limit)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = required_trimmed(&lookup, "TIDEMARK_API_BASE_URL")?;
        if !is_http_url(&api_base_url) {
            return Err(ConfigError::Invalid(
                "TIDEMARK_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }
        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        let api_key = normalize_text_option(lookup("TIDEMARK_API_KEY"));

        let request_timeout_secs =
            parse_in_range(&lookup, "TIDEMARK_REQUEST_TIMEOUT_SECS", 30, 1..=300)?;

        let max_retries = parse_in_range(&lookup, "TIDEMARK_QUEUE_MAX_RETRIES", 5, 1..=50)?;
        let capacity = parse_in_range(&lookup, "TIDEMARK_QUEUE_CAPACITY", 1_000, 1..=100_000)?;
        let backoff_base_secs =
            parse_in_range(&lookup, "TIDEMARK_QUEUE_BACKOFF_BASE_SECS", 5, 1..=600)?;
        let backoff_cap_secs =
            parse_in_range(&lookup, "TIDEMARK_QUEUE_BACKOFF_CAP_SECS", 60, 1..=3_600)?;
        if backoff_cap_secs < backoff_base_secs {
            return Err(ConfigError::Invalid(
                "TIDEMARK_QUEUE_BACKOFF_CAP_SECS must be >= TIDEMARK_QUEUE_BACKOFF_BASE_SECS"
                    .to_string(),
            ));
        }

        let debounce_secs = parse_in_range(&lookup, "TIDEMARK_SYNC_DEBOUNCE_SECS", 15, 0..=3_600)?;
        let local_timeout_secs =
            parse_in_range(&lookup, "TIDEMARK_LOCAL_STORE_TIMEOUT_SECS", 15, 1..=300)?;
        let window_past_days =
            parse_in_range(&lookup, "TIDEMARK_SYNC_WINDOW_PAST_DAYS", 30, 0..=365)?;
        let window_future_days =
            parse_in_range(&lookup, "TIDEMARK_SYNC_WINDOW_FUTURE_DAYS", 7, 0..=365)?;
        let conflict_history_limit =
            parse_in_range(&lookup, "TIDEMARK_CONFLICT_HISTORY_LIMIT", 50, 1..=1_000)?;

        Ok(Self {
            api_base_url,
            api_key,
            request_timeout: Duration::from_secs(request_timeout_secs),
            queue: QueueConfig {
                max_retries: u32::try_from(max_retries).unwrap_or(u32::MAX),
                capacity: usize::try_from(capacity).unwrap_or(usize::MAX),
                backoff_base: Duration::from_secs(backoff_base_secs),
                backoff_cap: Duration::from_secs(backoff_cap_secs),
            },
            diff_sync: DiffSyncConfig {
                window_past_days: i64::try_from(window_past_days).unwrap_or(30),
                window_future_days: i64::try_from(window_future_days).unwrap_or(7),
                local_timeout: Duration::from_secs(local_timeout_secs),
            },
            orchestrator: OrchestratorConfig {
                debounce: Duration::from_secs(debounce_secs),
            },
            rate_limit: RateLimitConfig::default(),
            conflict_history_limit: usize::try_from(conflict_history_limit).unwrap_or(50),
        })
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    normalize_text_option(lookup(name)).ok_or(ConfigError::MissingVar(name))
}
