#![forbid(unsafe_code)]

//! Simulation bootstrap and save.
//!
//! Loading follows the backend's guest flow: log in, list the app's
//! simulations, take the first, fetch its source and seed the canonical
//! store with every returned model.

use std::fmt;

use serde_json::{Map, Value};
use simform_core::{EditSession, ModelSerializeError};

use crate::api::{ApiClient, ApiError};
use crate::retry::{RetryError, RetryPolicy};
use crate::stop::StopSignal;

/// Failure while loading or saving a simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// A backend call failed.
    Api(RetryError),
    /// The backend lists no simulation for the app.
    NoSimulations,
    /// A listed simulation has no `simulationId`.
    MissingId,
    /// The source document has no `models` object.
    MissingModels,
    /// The committed models could not be prepared for saving.
    Serialize(ModelSerializeError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(e) => write!(f, "{e}"),
            Self::NoSimulations => write!(f, "no simulations available"),
            Self::MissingId => write!(f, "simulation entry has no simulationId"),
            Self::MissingModels => write!(f, "simulation source has no models"),
            Self::Serialize(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Api(e) => Some(e),
            Self::Serialize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RetryError> for SimulationError {
    fn from(e: RetryError) -> Self {
        Self::Api(e)
    }
}

impl From<ModelSerializeError> for SimulationError {
    fn from(e: ModelSerializeError) -> Self {
        Self::Serialize(e)
    }
}

/// A loaded simulation document.
///
/// The raw JSON is kept whole so saving round-trips fields this crate does
/// not interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationInfo {
    simulation_id: String,
    raw: Map<String, Value>,
}

impl SimulationInfo {
    /// Wrap a source document, injecting `simulationId`.
    #[must_use]
    pub fn new(simulation_id: impl Into<String>, mut raw: Map<String, Value>) -> Self {
        let simulation_id = simulation_id.into();
        raw.insert("simulationId".to_string(), Value::String(simulation_id.clone()));
        Self { simulation_id, raw }
    }

    /// Backend simulation id.
    #[must_use]
    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    /// The document as received, plus `simulationId`.
    #[must_use]
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// The document's `models` object, if any.
    #[must_use]
    pub fn models(&self) -> Option<&Map<String, Value>> {
        self.raw.get("models").and_then(Value::as_object)
    }
}

/// Runs the bootstrap sequence against one app.
#[derive(Debug, Clone)]
pub struct SimulationLoader {
    api: ApiClient,
    retry: RetryPolicy,
}

impl SimulationLoader {
    /// A loader retrying transient failures with `retry`.
    #[must_use]
    pub fn new(api: ApiClient, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    fn call<T>(&self, op: impl FnMut() -> Result<T, ApiError>) -> Result<T, RetryError> {
        self.retry.run(&StopSignal::never(), op)
    }

    /// Load the app's first simulation into `session`.
    ///
    /// Schema models the source lacks are filled from defaults, then form
    /// state is seeded for every schema model.
    pub fn load(&self, session: &mut EditSession) -> Result<SimulationInfo, SimulationError> {
        let span = tracing::debug_span!("load_simulation", app = %self.api.app_name());
        let _guard = span.enter();

        self.call(|| self.api.guest_login())?;
        let list = self.call(|| self.api.simulation_list())?;
        let first = list.first().ok_or(SimulationError::NoSimulations)?;
        let simulation_id = first
            .get("simulationId")
            .and_then(Value::as_str)
            .ok_or(SimulationError::MissingId)?
            .to_string();

        let source = self.call(|| self.api.simulation_source(&simulation_id, 0))?;
        let Value::Object(raw) = source else {
            return Err(SimulationError::MissingModels);
        };
        let info = SimulationInfo::new(simulation_id, raw);
        let models = info.models().ok_or(SimulationError::MissingModels)?;

        let loaded = session.load_models(models);
        let defaulted = session.fill_missing_defaults();
        session.initialize_form_state();
        tracing::info!(
            simulation = %info.simulation_id(),
            loaded,
            defaulted,
            "simulation loaded"
        );
        Ok(info)
    }

    /// Post `info` back with `models` replaced by the committed models.
    pub fn save(
        &self,
        info: &SimulationInfo,
        session: &EditSession,
    ) -> Result<Value, SimulationError> {
        let body = save_body(info, session)?;
        let response = self.call(|| self.api.save_simulation(&body))?;
        tracing::info!(simulation = %info.simulation_id(), "simulation saved");
        Ok(response)
    }
}

/// The body of a save request: the loaded document with its `models`
/// replaced by the session's committed, wire-serialized models.
pub fn save_body(info: &SimulationInfo, session: &EditSession) -> Result<Value, SimulationError> {
    let mut raw = info.raw().clone();
    raw.insert("models".to_string(), Value::Object(session.serialized_models()?));
    Ok(Value::Object(raw))
}
