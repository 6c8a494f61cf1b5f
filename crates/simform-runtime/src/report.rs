#![forbid(unsafe_code)]

//! Reports that recompute whenever their inputs change.
//!
//! An [`AutoRunReport`] watches a vector of dependency values taken from
//! the canonical model store. Each [`observe`](AutoRunReport::observe) call
//! compares the current vector with the one the running chain was started
//! for and restarts the poller only when they differ.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use simform_core::{
    Dependency, DependencyError, EditSession, ModelSerializeError, ReportConfig, ViewConfig,
};

use crate::api::{ApiClient, RunSimulationRequest};
use crate::config::ClientConfig;
use crate::poll::{PollMessage, PollToken, ReportPoller};

/// Why a report could not be (re)started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// A dependency reference is malformed.
    Dependency(DependencyError),
    /// The models could not be prepared for the request body.
    Serialize(ModelSerializeError),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependency(e) => write!(f, "bad report dependency: {e}"),
            Self::Serialize(e) => write!(f, "cannot build report request: {e}"),
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dependency(e) => Some(e),
            Self::Serialize(e) => Some(e),
        }
    }
}

impl From<DependencyError> for ReportError {
    fn from(e: DependencyError) -> Self {
        Self::Dependency(e)
    }
}

impl From<ModelSerializeError> for ReportError {
    fn from(e: ModelSerializeError) -> Self {
        Self::Serialize(e)
    }
}

/// What an [`observe`](AutoRunReport::observe) call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// Inputs are unchanged; the running chain continues.
    Unchanged,
    /// A new chain was started with this token.
    Restarted(PollToken),
}

/// One auto-run report panel.
#[derive(Debug)]
pub struct AutoRunReport {
    report: String,
    dependencies: Vec<Dependency>,
    last_values: Option<Vec<Value>>,
    poller: ReportPoller,
}

impl AutoRunReport {
    /// Create a report watching `report_dependencies` followed by
    /// `form_dependencies`. Duplicates are kept once, first occurrence wins.
    pub fn new(
        api: ApiClient,
        config: &ClientConfig,
        report: impl Into<String>,
        report_dependencies: &[String],
        form_dependencies: &[Dependency],
    ) -> Result<Self, ReportError> {
        let mut dependencies: Vec<Dependency> = Vec::new();
        let parsed = report_dependencies
            .iter()
            .map(|r| Dependency::parse(r))
            .collect::<Result<Vec<_>, _>>()?;
        for dep in parsed.into_iter().chain(form_dependencies.iter().cloned()) {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
        Ok(Self {
            report: report.into(),
            dependencies,
            last_values: None,
            poller: ReportPoller::new(api, config),
        })
    }

    /// Build one driver per report declared in a view.
    pub fn for_view(
        api: &ApiClient,
        config: &ClientConfig,
        view: &ViewConfig,
    ) -> Result<Vec<Self>, ReportError> {
        let form_dependencies = view.form_dependencies()?;
        view.reports()
            .into_iter()
            .map(|ReportConfig { report, dependencies }| {
                Self::new(api.clone(), config, report, dependencies, &form_dependencies)
            })
            .collect()
    }

    /// Report name.
    #[must_use]
    pub fn report(&self) -> &str {
        &self.report
    }

    /// Watched dependencies, report-specific first.
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// The value vector the current chain was started for.
    #[must_use]
    pub fn last_values(&self) -> Option<&[Value]> {
        self.last_values.as_deref()
    }

    /// Restart the poller if the dependency values changed since the last
    /// start. The first call always starts.
    pub fn observe(
        &mut self,
        session: &EditSession,
        simulation_id: &str,
    ) -> Result<ObserveOutcome, ReportError> {
        let values = session.dependency_values(&self.dependencies);
        if self.last_values.as_ref() == Some(&values) {
            return Ok(ObserveOutcome::Unchanged);
        }
        let request = RunSimulationRequest {
            models: session.serialized_models()?,
            force_run: false,
            report: self.report.clone(),
            simulation_id: simulation_id.to_string(),
            simulation_type: self.poller.app_name().to_string(),
        };
        let token = self.poller.start(request);
        tracing::debug!(report = %self.report, %token, "report inputs changed");
        self.last_values = Some(values);
        Ok(ObserveOutcome::Restarted(token))
    }

    /// Stop polling. The next `observe` starts afresh.
    pub fn stop(&mut self) {
        self.poller.stop();
        self.last_values = None;
    }

    /// The next update of the current chain, if already available.
    pub fn try_next(&mut self) -> Option<PollMessage> {
        self.poller.try_next()
    }

    /// Wait up to `timeout` for the next update of the current chain.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<PollMessage> {
        self.poller.next_timeout(timeout)
    }

    /// The underlying poller.
    #[must_use]
    pub fn poller(&self) -> &ReportPoller {
        &self.poller
    }
}
