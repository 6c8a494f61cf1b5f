#![forbid(unsafe_code)]

//! Simform public facade crate.
//!
//! Re-exports the form engine and the backend runtime behind one name, adds
//! a top-level [`Error`] and a prelude, and owns logging setup.

use std::fmt;

pub mod logging;

// --- Core re-exports -------------------------------------------------------

pub use simform_core::{
    CommitSummary, ComputeSource, Dependency, DependencyCollector, DependencyError, EditSession,
    FieldState, FieldType, FieldTypeRegistry, FieldView, FormController, FormError,
    FormStateStore, InterpolateError, Layout, Model, ModelRevision, ModelSerializeError,
    ModelStore, RenderHint, ResolveError, ResolvedField, Schema, SchemaError, SessionId,
    ViewConfig, interpolate,
};

// --- Runtime re-exports ----------------------------------------------------

#[cfg(feature = "runtime")]
pub use simform_runtime::{
    ApiClient, ApiError, AutoRunReport, ClientConfig, ComputeError, ComputedOptionsClient,
    ConfigError, FileFieldClient, PollError,
    PollMessage, PollToken, PollUpdate, ReportError, ReportPoller, RetryError, RetryPolicy,
    SimulationError, SimulationInfo, SimulationLoader,
};

pub use logging::{LogConfig, LogError, LogFormat};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for simform applications.
#[derive(Debug)]
pub enum Error {
    /// The schema document is invalid.
    Schema(SchemaError),
    /// A form operation failed.
    Form(FormError),
    /// A templated string references an unknown field.
    Interpolate(InterpolateError),
    /// Logging could not be set up.
    Log(LogError),
    /// Client configuration is invalid.
    #[cfg(feature = "runtime")]
    Config(ConfigError),
    /// A backend call failed.
    #[cfg(feature = "runtime")]
    Api(ApiError),
    /// A report could not be polled.
    #[cfg(feature = "runtime")]
    Report(ReportError),
    /// Loading or saving a simulation failed.
    #[cfg(feature = "runtime")]
    Simulation(SimulationError),
    /// Computed field options could not be fetched.
    #[cfg(feature = "runtime")]
    Compute(ComputeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(e) => write!(f, "{e}"),
            Self::Form(e) => write!(f, "{e}"),
            Self::Interpolate(e) => write!(f, "{e}"),
            Self::Log(e) => write!(f, "{e}"),
            #[cfg(feature = "runtime")]
            Self::Config(e) => write!(f, "{e}"),
            #[cfg(feature = "runtime")]
            Self::Api(e) => write!(f, "{e}"),
            #[cfg(feature = "runtime")]
            Self::Report(e) => write!(f, "{e}"),
            #[cfg(feature = "runtime")]
            Self::Simulation(e) => write!(f, "{e}"),
            #[cfg(feature = "runtime")]
            Self::Compute(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Schema(e) => Some(e),
            Self::Form(e) => Some(e),
            Self::Interpolate(e) => Some(e),
            Self::Log(e) => Some(e),
            #[cfg(feature = "runtime")]
            Self::Config(e) => Some(e),
            #[cfg(feature = "runtime")]
            Self::Api(e) => Some(e),
            #[cfg(feature = "runtime")]
            Self::Report(e) => Some(e),
            #[cfg(feature = "runtime")]
            Self::Simulation(e) => Some(e),
            #[cfg(feature = "runtime")]
            Self::Compute(e) => Some(e),
        }
    }
}

macro_rules! impl_from {
    ($($(#[$meta:meta])* $variant:ident($ty:ty)),* $(,)?) => {
        $(
            $(#[$meta])*
            impl From<$ty> for Error {
                fn from(err: $ty) -> Self {
                    Self::$variant(err)
                }
            }
        )*
    };
}

impl_from!(
    Schema(SchemaError),
    Form(FormError),
    Interpolate(InterpolateError),
    Log(LogError),
    #[cfg(feature = "runtime")]
    Config(ConfigError),
    #[cfg(feature = "runtime")]
    Api(ApiError),
    #[cfg(feature = "runtime")]
    Report(ReportError),
    #[cfg(feature = "runtime")]
    Simulation(SimulationError),
    #[cfg(feature = "runtime")]
    Compute(ComputeError),
);

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        Self::Form(FormError::from(err))
    }
}

/// Standard result type for simform APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Dependency, EditSession, Error, FieldType, FormController, LogConfig, Result, Schema,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{ApiClient, AutoRunReport, ClientConfig, PollUpdate, SimulationLoader};

    pub use crate::core;
    #[cfg(feature = "runtime")]
    pub use crate::runtime;
}

pub use simform_core as core;
#[cfg(feature = "runtime")]
pub use simform_runtime as runtime;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error as _;

    #[test]
    fn errors_convert_and_keep_sources() {
        let err: Error = Schema::from_value(json!({ "models": 3 })).unwrap_err().into();
        assert!(matches!(err, Error::Schema(_)));
        assert!(err.source().is_some());

        let err: Error = Dependency::parse("nodot")
            .map_err(ResolveError::from)
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Form(FormError::Resolve(_))));
    }

    #[cfg(feature = "runtime")]
    #[test]
    fn runtime_errors_convert() {
        let err: Error = ClientConfig::default()
            .with_base_url("nope")
            .validate()
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn prelude_covers_a_session() {
        use crate::prelude::*;
        let schema = Schema::from_value(json!({
            "models": { "m": { "f": { "displayName": "F", "type": "String" } } }
        }))
        .unwrap();
        let mut session = EditSession::new(std::sync::Arc::new(schema));
        let mut controller = FormController::new();
        let dep: Dependency = controller.hook(&mut session, "m.f").unwrap();
        assert!(controller.get_field(&session, &dep).is_ok());
    }
}
