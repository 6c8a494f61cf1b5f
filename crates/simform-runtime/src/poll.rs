#![forbid(unsafe_code)]

//! Report polling with token-based staleness prevention.
//!
//! A report is computed by the backend asynchronously. The client asks for
//! it with `POST /run-simulation` and keeps asking while the reported state
//! is `pending` or `running`. Each logical request is a *poll chain*.
//!
//! # Chain states
//!
//! ```text
//! Idle ─▶ Requesting ─┬─▶ Pending ──┐
//!                     ├─▶ Running ──┴─▶ Requesting (after the poll interval)
//!                     ├─▶ Completed
//!                     └─▶ Failed
//! any non-terminal ─────▶ Superseded
//! ```
//!
//! A `running` response carries intermediate data that is delivered right
//! away, and the chain keeps polling.
//!
//! # Staleness
//!
//! Every chain gets a fresh monotonic [`PollToken`]. Starting a chain stops
//! the previous one (its worker exits at the next suspension point) and any
//! of its messages still in flight are discarded on arrival because their
//! token no longer matches the current one. Only the current chain's updates
//! are ever applied.
//!
//! # Components
//!
//! - [`PollChain`]: pure per-chain state machine
//! - [`PollCoordinator`]: token issuing, apply/discard decisions, [`PollTrace`]
//! - [`ReportPoller`]: runs chains on worker threads and feeds the coordinator

use std::collections::VecDeque;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::api::{ApiClient, ApiError, RunSimulationRequest};
use crate::config::ClientConfig;
use crate::retry::{RetryError, RetryPolicy};
use crate::stop::{StopSignal, StopTrigger};

// ---------------------------------------------------------------------------
// PollToken
// ---------------------------------------------------------------------------

/// Monotonic identifier of one poll chain.
///
/// Token 0 is reserved for "no chain".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PollToken(u64);

impl PollToken {
    /// The null token.
    pub const NONE: Self = Self(0);

    /// Create a token from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is the null token.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PollToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poll#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Terminal failure of a poll chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The backend reported a state outside the known set.
    UnexpectedState(String),
    /// The response has no usable `state` field.
    MalformedResponse(String),
    /// The backend reported `state: "error"`.
    BackendError(String),
    /// The backend reported `state: "canceled"`.
    BackendCanceled,
    /// The backend reported `state: "missing"`.
    SimulationMissing,
    /// The request kept failing.
    Transport { attempts: u32, source: ApiError },
    /// The chain was stopped locally.
    Cancelled,
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedState(state) => write!(f, "unexpected report state {state:?}"),
            Self::MalformedResponse(body) => write!(f, "report response has no state: {body}"),
            Self::BackendError(msg) => write!(f, "report failed: {msg}"),
            Self::BackendCanceled => write!(f, "report computation was canceled"),
            Self::SimulationMissing => write!(f, "simulation is missing on the backend"),
            Self::Transport { attempts, source } => {
                write!(f, "{source} (after {attempts} attempt(s))")
            }
            Self::Cancelled => write!(f, "polling was cancelled"),
        }
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<RetryError> for PollError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Stopped => Self::Cancelled,
            RetryError::Failed { attempts, source } => Self::Transport { attempts, source },
        }
    }
}

// ---------------------------------------------------------------------------
// Response classification
// ---------------------------------------------------------------------------

/// Meaning of one successful `/run-simulation` response.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Queued; nothing to show yet.
    Pending,
    /// In progress with intermediate data.
    Running(Value),
    /// Finished with the final data.
    Completed(Value),
}

/// Interpret a `/run-simulation` response by its `state` field.
pub fn classify(response: &Value) -> Result<PollOutcome, PollError> {
    let Some(state) = response.get("state").and_then(Value::as_str) else {
        return Err(PollError::MalformedResponse(response.to_string()));
    };
    match state {
        "pending" => Ok(PollOutcome::Pending),
        "running" => Ok(PollOutcome::Running(response.clone())),
        "completed" => Ok(PollOutcome::Completed(response.clone())),
        "error" => Err(PollError::BackendError(
            response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        )),
        "canceled" => Err(PollError::BackendCanceled),
        "missing" => Err(PollError::SimulationMissing),
        other => Err(PollError::UnexpectedState(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// PollChain
// ---------------------------------------------------------------------------

/// Where a chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollPhase {
    Idle,
    Requesting,
    Pending,
    Running,
    Completed,
    Failed,
    Superseded,
}

impl PollPhase {
    /// Whether the chain has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Superseded)
    }
}

/// What the worker does after a response.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Wait out the interval and poll again.
    Repoll,
    /// Deliver intermediate data, then wait and poll again.
    Progress(Value),
    /// Deliver the final data and end the chain.
    Finished(Value),
}

/// State machine of one poll chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollChain {
    token: PollToken,
    phase: PollPhase,
    requests: u32,
}

impl PollChain {
    /// A chain that has not sent anything yet.
    #[must_use]
    pub fn new(token: PollToken) -> Self {
        Self {
            token,
            phase: PollPhase::Idle,
            requests: 0,
        }
    }

    /// The chain's token.
    #[must_use]
    pub fn token(&self) -> PollToken {
        self.token
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// Requests issued so far.
    #[must_use]
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Enter `Requesting`. Returns `false` once the chain has ended.
    pub fn begin_request(&mut self) -> bool {
        match self.phase {
            PollPhase::Idle | PollPhase::Pending | PollPhase::Running => {
                self.phase = PollPhase::Requesting;
                self.requests += 1;
                true
            }
            PollPhase::Requesting => true,
            PollPhase::Completed | PollPhase::Failed | PollPhase::Superseded => false,
        }
    }

    /// Apply a response to the chain.
    pub fn on_response(&mut self, response: &Value) -> Result<PollStep, PollError> {
        if self.phase.is_terminal() {
            return Err(PollError::Cancelled);
        }
        match classify(response) {
            Ok(PollOutcome::Pending) => {
                self.phase = PollPhase::Pending;
                Ok(PollStep::Repoll)
            }
            Ok(PollOutcome::Running(data)) => {
                self.phase = PollPhase::Running;
                Ok(PollStep::Progress(data))
            }
            Ok(PollOutcome::Completed(data)) => {
                self.phase = PollPhase::Completed;
                Ok(PollStep::Finished(data))
            }
            Err(e) => {
                self.phase = PollPhase::Failed;
                Err(e)
            }
        }
    }

    /// End the chain after a transport failure.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = PollPhase::Failed;
        }
    }

    /// End the chain because a newer one replaced it.
    pub fn supersede(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = PollPhase::Superseded;
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Something a chain reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    /// Intermediate data from a `running` response.
    Progress(Value),
    /// Final data from a `completed` response.
    Completed(Value),
    /// The chain failed.
    Failed(PollError),
}

impl PollUpdate {
    /// Whether this update ends its chain.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }

    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

/// A [`PollUpdate`] tagged with the chain it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PollMessage {
    pub token: PollToken,
    pub report: String,
    pub update: PollUpdate,
}

// ---------------------------------------------------------------------------
// PollTrace
// ---------------------------------------------------------------------------

/// A coordinator event, recorded for debugging and determinism checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PollEvent {
    /// A chain started.
    Started { token: PollToken },
    /// A chain was replaced before it finished.
    Superseded {
        token: PollToken,
        superseded_by: PollToken,
    },
    /// A chain was stopped without a replacement.
    Stopped { token: PollToken },
    /// An update was applied.
    Applied { token: PollToken, kind: &'static str },
    /// An update from an old or closed chain was dropped.
    StaleDiscarded {
        token: PollToken,
        current_token: PollToken,
        kind: &'static str,
    },
}

impl PollEvent {
    /// Token associated with this event.
    #[must_use]
    pub fn token(&self) -> PollToken {
        match self {
            Self::Started { token }
            | Self::Superseded { token, .. }
            | Self::Stopped { token }
            | Self::Applied { token, .. }
            | Self::StaleDiscarded { token, .. } => *token,
        }
    }

    /// Event type name for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Superseded { .. } => "superseded",
            Self::Stopped { .. } => "stopped",
            Self::Applied { .. } => "applied",
            Self::StaleDiscarded { .. } => "stale_discarded",
        }
    }
}

/// Events kept by a default trace before the oldest are dropped.
pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// Ordered log of the most recent coordinator events.
///
/// The log is bounded: once `capacity` events are held, each push drops the
/// oldest one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTrace {
    events: VecDeque<PollEvent>,
    capacity: usize,
    /// Latest start among dropped events; the baseline for invariant checks.
    base: PollToken,
    last_started: PollToken,
}

impl Default for PollTrace {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACE_CAPACITY)
    }
}

impl PollTrace {
    /// An empty trace keeping at most `capacity` events (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_TRACE_CAPACITY)),
            capacity,
            base: PollToken::NONE,
            last_started: PollToken::NONE,
        }
    }

    /// Append an event, dropping the oldest one when full.
    pub fn push(&mut self, event: PollEvent) {
        if let PollEvent::Started { token } = &event {
            self.last_started = *token;
        }
        if self.events.len() == self.capacity {
            if let Some(PollEvent::Started { token }) = self.events.pop_front() {
                self.base = token;
            }
        }
        self.events.push_back(event);
    }

    /// Drop every event. Invariant checks continue from the latest start.
    pub fn clear(&mut self) {
        self.events.clear();
        self.base = self.last_started;
    }

    /// Maximum number of events kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &PollEvent> {
        self.events.iter()
    }

    /// Whether an event of the given type exists for a token.
    #[must_use]
    pub fn contains_event_type(&self, token: PollToken, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.token() == token && e.event_type() == event_type)
    }

    /// Order-sensitive checksum for golden comparisons.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for event in &self.events {
            event.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trace is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Check structural invariants; returns one line per violation.
    ///
    /// 1. Start tokens are strictly increasing.
    /// 2. Applied updates belong to the most recently started chain.
    /// 3. Discarded updates never belong to the current chain.
    #[must_use]
    pub fn verify_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut latest = self.base;
        for event in &self.events {
            match event {
                PollEvent::Started { token } => {
                    if *token <= latest {
                        violations.push(format!("non-monotonic start: {token} after {latest}"));
                    }
                    latest = *token;
                }
                PollEvent::Applied { token, .. } if *token != latest => {
                    violations.push(format!("applied {token} while {latest} is current"));
                }
                PollEvent::StaleDiscarded {
                    token,
                    current_token,
                    ..
                } if token == current_token => {
                    violations.push(format!("discarded current update for {token}"));
                }
                _ => {}
            }
        }
        violations
    }
}

// ---------------------------------------------------------------------------
// PollCoordinator
// ---------------------------------------------------------------------------

/// Issues tokens and decides which updates are applied.
#[derive(Debug, Default)]
pub struct PollCoordinator {
    last_token: u64,
    current: PollToken,
    open: bool,
    trace: PollTrace,
}

impl PollCoordinator {
    /// A coordinator with no chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a chain, superseding the current one.
    pub fn start(&mut self) -> PollToken {
        self.last_token += 1;
        let token = PollToken(self.last_token);
        if self.open {
            self.trace.push(PollEvent::Superseded {
                token: self.current,
                superseded_by: token,
            });
        }
        self.current = token;
        self.open = true;
        self.trace.push(PollEvent::Started { token });
        token
    }

    /// Stop the current chain without starting another.
    pub fn stop(&mut self) {
        if self.open {
            self.trace.push(PollEvent::Stopped {
                token: self.current,
            });
        }
        self.current = PollToken::NONE;
        self.open = false;
    }

    /// Token of the chain whose updates are applied.
    #[must_use]
    pub fn current_token(&self) -> PollToken {
        self.current
    }

    /// Whether the current chain may still deliver updates.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Apply a message if it belongs to the current chain.
    ///
    /// Returns the message when applied, `None` when discarded as stale.
    pub fn accept(&mut self, message: PollMessage) -> Option<PollMessage> {
        let kind = message.update.kind();
        if message.token != self.current || !self.open {
            // A closed chain accepts nothing, so no token is current.
            let current_token = if self.open { self.current } else { PollToken::NONE };
            tracing::debug!(
                token = %message.token,
                current = %current_token,
                kind,
                "discarding stale poll update"
            );
            self.trace.push(PollEvent::StaleDiscarded {
                token: message.token,
                current_token,
                kind,
            });
            return None;
        }
        if message.update.is_terminal() {
            self.open = false;
        }
        self.trace.push(PollEvent::Applied {
            token: message.token,
            kind,
        });
        Some(message)
    }

    /// A coordinator whose trace keeps at most `capacity` events.
    #[must_use]
    pub fn with_trace_capacity(capacity: usize) -> Self {
        Self {
            trace: PollTrace::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Event trace.
    #[must_use]
    pub fn trace(&self) -> &PollTrace {
        &self.trace
    }

    /// Drop the recorded events. Token issuing and gating are unaffected.
    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }
}

// ---------------------------------------------------------------------------
// ReportPoller
// ---------------------------------------------------------------------------

struct ActiveChain {
    token: PollToken,
    trigger: StopTrigger,
}

/// Runs poll chains on worker threads.
///
/// The owner calls [`start`](Self::start) whenever the report's inputs
/// change and drains updates with [`try_next`](Self::try_next) or
/// [`next_timeout`](Self::next_timeout).
pub struct ReportPoller {
    api: ApiClient,
    interval: Duration,
    retry: RetryPolicy,
    coordinator: PollCoordinator,
    active: Option<ActiveChain>,
    tx: mpsc::Sender<PollMessage>,
    rx: mpsc::Receiver<PollMessage>,
}

impl fmt::Debug for ReportPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportPoller")
            .field("interval", &self.interval)
            .field("current_token", &self.coordinator.current_token())
            .field("trace_events", &self.coordinator.trace().len())
            .finish_non_exhaustive()
    }
}

impl ReportPoller {
    /// Create a poller using the interval and retry policy from `config`.
    #[must_use]
    pub fn new(api: ApiClient, config: &ClientConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            api,
            interval: config.poll_interval,
            retry: config.retry.clone(),
            coordinator: PollCoordinator::new(),
            active: None,
            tx,
            rx,
        }
    }

    /// Start polling a report, superseding any running chain.
    pub fn start(&mut self, request: RunSimulationRequest) -> PollToken {
        self.halt_worker();
        let token = self.coordinator.start();
        let (signal, trigger) = StopSignal::new();
        tracing::debug!(report = %request.report, %token, "poll chain started");

        let api = self.api.clone();
        let interval = self.interval;
        let retry = self.retry.clone();
        let tx = self.tx.clone();
        // Detached: a stopped worker exits at its next suspension point.
        thread::spawn(move || run_chain(&api, &request, token, interval, &retry, &signal, &tx));
        self.active = Some(ActiveChain { token, trigger });
        token
    }

    /// Stop the current chain. Its late updates are discarded.
    pub fn stop(&mut self) {
        self.halt_worker();
        self.coordinator.stop();
    }

    fn halt_worker(&mut self) {
        if let Some(chain) = self.active.take() {
            tracing::trace!(token = %chain.token, "stopping poll worker");
            chain.trigger.stop();
        }
    }

    /// Application the reports belong to.
    #[must_use]
    pub fn app_name(&self) -> &str {
        self.api.app_name()
    }

    /// Token of the current chain, [`PollToken::NONE`] if stopped.
    #[must_use]
    pub fn current_token(&self) -> PollToken {
        self.coordinator.current_token()
    }

    /// Whether the current chain may still deliver updates.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.coordinator.is_open()
    }

    fn accept(&mut self, message: PollMessage) -> Option<PollMessage> {
        let applied = self.coordinator.accept(message)?;
        if applied.update.is_terminal() {
            self.active = None;
        }
        Some(applied)
    }

    /// The next applied update, if one is already waiting.
    pub fn try_next(&mut self) -> Option<PollMessage> {
        while let Ok(message) = self.rx.try_recv() {
            if let Some(applied) = self.accept(message) {
                return Some(applied);
            }
        }
        None
    }

    /// Wait up to `timeout` for the next applied update.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<PollMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = self.rx.recv_timeout(remaining).ok()?;
            if let Some(applied) = self.accept(message) {
                return Some(applied);
            }
        }
    }

    /// Every applied update already waiting.
    pub fn drain(&mut self) -> Vec<PollMessage> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Coordinator event trace.
    #[must_use]
    pub fn trace(&self) -> &PollTrace {
        self.coordinator.trace()
    }

    /// Drop the recorded coordinator events.
    pub fn clear_trace(&mut self) {
        self.coordinator.clear_trace();
    }
}

impl Drop for ReportPoller {
    fn drop(&mut self) {
        self.halt_worker();
    }
}

fn run_chain(
    api: &ApiClient,
    request: &RunSimulationRequest,
    token: PollToken,
    interval: Duration,
    retry: &RetryPolicy,
    stop: &StopSignal,
    tx: &mpsc::Sender<PollMessage>,
) {
    let span = tracing::debug_span!("poll_chain", report = %request.report, %token);
    let _guard = span.enter();
    let send = |update: PollUpdate| {
        tx.send(PollMessage {
            token,
            report: request.report.clone(),
            update,
        })
        .is_ok()
    };

    let mut chain = PollChain::new(token);
    while chain.begin_request() {
        let response = match retry.run(stop, || api.run_simulation(request)) {
            Ok(response) => response,
            Err(RetryError::Stopped) => {
                chain.supersede();
                break;
            }
            Err(e) => {
                chain.fail();
                tracing::warn!(error = %e, "report request failed");
                send(PollUpdate::Failed(e.into()));
                break;
            }
        };
        if stop.is_stopped() {
            chain.supersede();
            break;
        }

        match chain.on_response(&response) {
            Ok(PollStep::Repoll) => {}
            Ok(PollStep::Progress(data)) => {
                if !send(PollUpdate::Progress(data)) {
                    break;
                }
            }
            Ok(PollStep::Finished(data)) => {
                send(PollUpdate::Completed(data));
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "report chain failed");
                send(PollUpdate::Failed(e));
                break;
            }
        }

        if stop.wait_timeout(interval) {
            chain.supersede();
            break;
        }
    }
    tracing::debug!(phase = ?chain.phase(), requests = chain.requests(), "poll chain ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(token: PollToken, update: PollUpdate) -> PollMessage {
        PollMessage {
            token,
            report: "beamAnimation".into(),
            update,
        }
    }

    #[test]
    fn classify_known_states() {
        assert_eq!(classify(&json!({"state": "pending"})), Ok(PollOutcome::Pending));
        assert!(matches!(
            classify(&json!({"state": "running", "frameCount": 3})),
            Ok(PollOutcome::Running(_))
        ));
        assert!(matches!(
            classify(&json!({"state": "completed"})),
            Ok(PollOutcome::Completed(_))
        ));
    }

    #[test]
    fn classify_failures() {
        assert_eq!(
            classify(&json!({"state": "error", "error": "bad lattice"})),
            Err(PollError::BackendError("bad lattice".into()))
        );
        assert_eq!(classify(&json!({"state": "canceled"})), Err(PollError::BackendCanceled));
        assert_eq!(classify(&json!({"state": "missing"})), Err(PollError::SimulationMissing));
        assert_eq!(
            classify(&json!({"state": "exploded"})),
            Err(PollError::UnexpectedState("exploded".into()))
        );
        assert!(matches!(
            classify(&json!({"frames": []})),
            Err(PollError::MalformedResponse(_))
        ));
    }

    #[test]
    fn chain_follows_pending_running_completed() {
        let mut chain = PollChain::new(PollToken::from_raw(1));
        assert_eq!(chain.phase(), PollPhase::Idle);

        assert!(chain.begin_request());
        assert_eq!(
            chain.on_response(&json!({"state": "pending"})),
            Ok(PollStep::Repoll)
        );
        assert_eq!(chain.phase(), PollPhase::Pending);

        assert!(chain.begin_request());
        let running = json!({"state": "running", "percentComplete": 40});
        assert_eq!(chain.on_response(&running), Ok(PollStep::Progress(running.clone())));
        assert_eq!(chain.phase(), PollPhase::Running);

        assert!(chain.begin_request());
        let done = json!({"state": "completed", "x": [1]});
        assert_eq!(chain.on_response(&done), Ok(PollStep::Finished(done.clone())));
        assert_eq!(chain.phase(), PollPhase::Completed);
        assert!(!chain.begin_request());
        assert_eq!(chain.requests(), 3);
    }

    #[test]
    fn unexpected_state_fails_the_chain() {
        let mut chain = PollChain::new(PollToken::from_raw(1));
        chain.begin_request();
        assert!(chain.on_response(&json!({"state": "??"})).is_err());
        assert_eq!(chain.phase(), PollPhase::Failed);
        assert!(!chain.begin_request());
    }

    #[test]
    fn superseded_chain_ignores_responses() {
        let mut chain = PollChain::new(PollToken::from_raw(1));
        chain.begin_request();
        chain.supersede();
        assert_eq!(
            chain.on_response(&json!({"state": "completed"})),
            Err(PollError::Cancelled)
        );
        assert_eq!(chain.phase(), PollPhase::Superseded);
    }

    #[test]
    fn coordinator_discards_older_chain() {
        let mut coordinator = PollCoordinator::new();
        let t1 = coordinator.start();
        let t2 = coordinator.start();
        assert!(t1 < t2);

        // T1's response arrives after T2 started.
        assert!(coordinator
            .accept(message(t1, PollUpdate::Completed(json!({"v": 1}))))
            .is_none());
        let applied = coordinator
            .accept(message(t2, PollUpdate::Completed(json!({"v": 2}))))
            .unwrap();
        assert_eq!(applied.update, PollUpdate::Completed(json!({"v": 2})));

        let trace = coordinator.trace();
        assert!(trace.contains_event_type(t1, "superseded"));
        assert!(trace.contains_event_type(t1, "stale_discarded"));
        assert!(trace.contains_event_type(t2, "applied"));
        assert!(trace.verify_invariants().is_empty());
    }

    #[test]
    fn progress_keeps_chain_open_and_terminal_closes_it() {
        let mut coordinator = PollCoordinator::new();
        let t = coordinator.start();
        assert!(coordinator.accept(message(t, PollUpdate::Progress(json!(1)))).is_some());
        assert!(coordinator.is_open());
        assert!(coordinator
            .accept(message(t, PollUpdate::Failed(PollError::BackendCanceled)))
            .is_some());
        assert!(!coordinator.is_open());
        assert!(coordinator.accept(message(t, PollUpdate::Progress(json!(2)))).is_none());
    }

    #[test]
    fn stop_discards_everything_after() {
        let mut coordinator = PollCoordinator::new();
        let t = coordinator.start();
        coordinator.stop();
        assert_eq!(coordinator.current_token(), PollToken::NONE);
        assert!(coordinator.accept(message(t, PollUpdate::Progress(json!(1)))).is_none());
        assert!(coordinator.trace().contains_event_type(t, "stopped"));
    }

    #[test]
    fn trace_checksum_is_deterministic() {
        let run = || {
            let mut c = PollCoordinator::new();
            let a = c.start();
            let b = c.start();
            c.accept(message(a, PollUpdate::Progress(json!(0))));
            c.accept(message(b, PollUpdate::Completed(json!(0))));
            c.trace().checksum()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn invariant_checker_flags_violations() {
        let mut trace = PollTrace::default();
        trace.push(PollEvent::Started {
            token: PollToken::from_raw(2),
        });
        trace.push(PollEvent::Started {
            token: PollToken::from_raw(1),
        });
        trace.push(PollEvent::Applied {
            token: PollToken::from_raw(2),
            kind: "completed",
        });
        assert_eq!(trace.verify_invariants().len(), 2);
    }

    #[test]
    fn trace_keeps_a_bounded_window() {
        let mut coordinator = PollCoordinator::with_trace_capacity(8);
        let mut last = PollToken::NONE;
        for _ in 0..100 {
            last = coordinator.start();
            coordinator.accept(message(last, PollUpdate::Progress(json!(0))));
        }
        let trace = coordinator.trace();
        assert_eq!(trace.len(), 8);
        assert_eq!(trace.capacity(), 8);
        assert!(trace.contains_event_type(last, "applied"));
        assert!(!trace.contains_event_type(PollToken::from_raw(1), "started"));
        assert!(trace.verify_invariants().is_empty());
    }

    #[test]
    fn clear_trace_leaves_gating_intact() {
        let mut coordinator = PollCoordinator::new();
        let old = coordinator.start();
        let t = coordinator.start();
        coordinator.clear_trace();
        assert!(coordinator.trace().is_empty());

        assert!(coordinator.accept(message(old, PollUpdate::Progress(json!(0)))).is_none());
        assert!(coordinator.accept(message(t, PollUpdate::Progress(json!(1)))).is_some());
        assert_eq!(coordinator.trace().len(), 2);
        // The applied update is checked against the start recorded before the clear.
        assert!(coordinator.trace().verify_invariants().is_empty());
    }
}
