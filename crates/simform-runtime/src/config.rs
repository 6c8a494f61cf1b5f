#![forbid(unsafe_code)]

//! Client configuration.
//!
//! # Environment
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `SIMFORM_BASE_URL` | Backend root URL | `http://localhost:8000` |
//! | `SIMFORM_APP_NAME` | Application (simulation type) name | `myapp` |
//! | `SIMFORM_POLL_INTERVAL_MS` | Delay between report polls | `500` |
//! | `SIMFORM_REQUEST_TIMEOUT_MS` | Per-request timeout | `30000` |
//! | `SIMFORM_RETRY_MAX_ATTEMPTS` | Attempts per call, including the first | `3` |
//!
//! Parsing is deterministic and order-independent. Unparseable numbers fall
//! back to their default with a warning.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default backend root.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
/// Default application name.
pub const DEFAULT_APP_NAME: &str = "myapp";
/// Default delay between polls of a pending or running report.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The base URL is not an `http(s)://` URL.
    BaseUrl(String),
    /// The application name is empty or contains a `/`.
    AppName(String),
    /// The HTTP client could not be built.
    HttpClient(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaseUrl(url) => write!(f, "base URL {url:?} is not an http(s) URL"),
            Self::AppName(name) => write!(f, "invalid application name {name:?}"),
            Self::HttpClient(msg) => write!(f, "failed to build HTTP client: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings shared by the API client and the report poller.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub app_name: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Duration {
            match lookup(key) {
                None => default,
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(ms) => Duration::from_millis(ms),
                    Err(_) => {
                        tracing::warn!(key, value = %raw, "ignoring unparseable duration");
                        default
                    }
                },
            }
        };

        let max_attempts = match lookup("SIMFORM_RETRY_MAX_ATTEMPTS") {
            None => defaults.retry.max_attempts,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(
                        key = "SIMFORM_RETRY_MAX_ATTEMPTS",
                        value = %raw,
                        "ignoring invalid attempt count"
                    );
                    defaults.retry.max_attempts
                }
            },
        };

        Self {
            base_url: lookup("SIMFORM_BASE_URL").unwrap_or(defaults.base_url),
            app_name: lookup("SIMFORM_APP_NAME").unwrap_or(defaults.app_name),
            poll_interval: millis("SIMFORM_POLL_INTERVAL_MS", defaults.poll_interval),
            request_timeout: millis("SIMFORM_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            retry: RetryPolicy {
                max_attempts,
                ..defaults.retry
            },
        }
    }

    /// Set the backend root URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the delay between report polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check the values a transport depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::BaseUrl(self.base_url.clone()));
        }
        if self.app_name.is_empty() || self.app_name.contains('/') {
            return Err(ConfigError::AppName(self.app_name.clone()));
        }
        Ok(())
    }
}
