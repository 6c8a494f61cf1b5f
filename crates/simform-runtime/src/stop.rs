#![forbid(unsafe_code)]

//! Cooperative cancellation for background poll chains.
//!
//! A chain checks its [`StopSignal`] at every suspension point (before a
//! request, after a response, while waiting out the poll interval) and exits
//! as soon as the owning side fires the matching [`StopTrigger`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type Shared = Arc<(Mutex<bool>, Condvar)>;

fn lock(inner: &Shared) -> MutexGuard<'_, bool> {
    inner.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receiving half: polled by the worker.
#[derive(Clone)]
pub struct StopSignal {
    inner: Shared,
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl StopSignal {
    /// Create a new stop signal pair (signal, trigger).
    #[must_use]
    pub fn new() -> (Self, StopTrigger) {
        let inner: Shared = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Self {
            inner: Arc::clone(&inner),
        };
        (signal, StopTrigger { inner })
    }

    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self::new().0
    }

    /// Check if the stop signal has been triggered.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *lock(&self.inner)
    }

    /// Wait for either the stop signal or a timeout.
    ///
    /// Returns `true` if stopped, `false` if the full duration elapsed.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (_, cvar) = &*self.inner;
        let mut stopped = lock(&self.inner);
        if *stopped {
            return true;
        }

        let start = Instant::now();
        let mut remaining = duration;
        loop {
            let (guard, result) = cvar
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
            if *stopped {
                return true;
            }
            if result.timed_out() {
                return false;
            }
            // Spurious wakeup.
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return false;
            }
            remaining = duration - elapsed;
        }
    }
}

/// Sending half: held by the owner of the chain.
#[derive(Debug)]
pub struct StopTrigger {
    inner: Shared,
}

impl StopTrigger {
    /// Signal the worker to stop. Idempotent.
    pub fn stop(&self) {
        let (_, cvar) = &*self.inner;
        let mut stopped = lock(&self.inner);
        *stopped = true;
        cvar.notify_all();
    }
}
