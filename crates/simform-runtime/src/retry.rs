#![forbid(unsafe_code)]

//! Exponential backoff for transient backend failures.

use std::fmt;
use std::time::Duration;

use crate::api::ApiError;
use crate::stop::StopSignal;

/// How often and how patiently to retry a failed call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retrying.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Factor applied to the delay after each failure.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The stop signal fired before a successful attempt.
    Stopped,
    /// The last attempt failed, either permanently or with attempts exhausted.
    Failed { attempts: u32, source: ApiError },
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped before the call succeeded"),
            Self::Failed { attempts, source } => {
                write!(f, "{source} (after {attempts} attempt(s))")
            }
        }
    }
}

impl std::error::Error for RetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stopped => None,
            Self::Failed { source, .. } => Some(source),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `stop` fires. Backoff waits wake early on stop.
    pub fn run<T>(
        &self,
        stop: &StopSignal,
        mut op: impl FnMut() -> Result<T, ApiError>,
    ) -> Result<T, RetryError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if stop.is_stopped() {
                return Err(RetryError::Stopped);
            }
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(source) if !source.is_transient() || attempt >= max_attempts => {
                    return Err(RetryError::Failed {
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(
                        path = source.path(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "transient backend failure, retrying"
                    );
                    if stop.wait_timeout(delay) {
                        return Err(RetryError::Stopped);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(2),
        }
    }

    fn transient() -> ApiError {
        ApiError::Status {
            path: "/run-simulation".into(),
            status: 502,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(30), Duration::from_secs(5));
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = Cell::new(0);
        let result = fast().run(&StopSignal::never(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(transient()) } else { Ok(7) }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast().run(&StopSignal::never(), || {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert!(matches!(result, Err(RetryError::Failed { attempts: 3, .. })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast().run(&StopSignal::never(), || {
            calls.set(calls.get() + 1);
            Err(ApiError::Status {
                path: "/x".into(),
                status: 404,
            })
        });
        assert!(matches!(result, Err(RetryError::Failed { attempts: 1, .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn stopped_signal_prevents_calls() {
        let (signal, trigger) = StopSignal::new();
        trigger.stop();
        let result: Result<(), _> = fast().run(&signal, || panic!("must not be called"));
        assert_eq!(result, Err(RetryError::Stopped));
    }
}
