#![forbid(unsafe_code)]

//! Tracing subscriber installation.
//!
//! # Environment
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `SIMFORM_LOG` | `EnvFilter` directives | `info` |
//! | `SIMFORM_LOG_FORMAT` | `compact`, `pretty` or `json` | `compact` |
//!
//! Parsing is deterministic and order-independent. Unknown formats fall
//! back to `compact`.
//!
//! # Usage
//!
//! ```ignore
//! simform::logging::LogConfig::from_env().install()?;
//! ```

use std::env;
use std::fmt;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directives.
pub const DEFAULT_FILTER: &str = "info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors that can occur during logging setup.
#[derive(Debug)]
pub enum LogError {
    /// A global tracing subscriber is already installed.
    SubscriberAlreadySet,
    /// The filter directives do not parse.
    Filter(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubscriberAlreadySet => {
                write!(f, "a global tracing subscriber is already set")
            }
            Self::Filter(msg) => write!(f, "invalid log filter: {msg}"),
        }
    }
}

impl std::error::Error for LogError {}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup("SIMFORM_LOG")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = match lookup("SIMFORM_LOG_FORMAT") {
            None => LogFormat::default(),
            Some(raw) => LogFormat::parse(&raw).unwrap_or_default(),
        };
        Self { filter, format }
    }

    /// Set the filter directives.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Build the filter without installing anything.
    pub fn env_filter(&self) -> Result<EnvFilter, LogError> {
        EnvFilter::try_new(&self.filter).map_err(|e| LogError::Filter(e.to_string()))
    }

    /// Install a global fmt subscriber.
    ///
    /// Fails with [`LogError::SubscriberAlreadySet`] instead of replacing an
    /// existing global subscriber.
    pub fn install(&self) -> Result<(), LogError> {
        let filter = self.env_filter()?;
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let result = match self.format {
            LogFormat::Compact => builder.compact().finish().try_init(),
            LogFormat::Pretty => builder.pretty().finish().try_init(),
            LogFormat::Json => builder.json().finish().try_init(),
        };
        if result.is_err() {
            return Err(LogError::SubscriberAlreadySet);
        }
        tracing::debug!(filter = %self.filter, format = ?self.format, "logging installed");
        Ok(())
    }
}
