#![forbid(unsafe_code)]

//! Simform Core
//!
//! The form-state reconciliation engine behind simulation configuration
//! panels. Nothing in this crate performs I/O.
//!
//! # Key Components
//!
//! - [`Dependency`] - `"model.field"` reference parsed into its parts
//! - [`FieldType`] - Closed set of field kinds with validation and wire rules
//! - [`FieldTypeRegistry`] - Type names used by schemas
//! - [`Schema`] - Compiled models, field definitions and view layouts
//! - [`ModelStore`] - Canonical, revisioned model values
//! - [`FormStateStore`] - Per-field transient editing state
//! - [`DependencyCollector`] - Resolves references against a schema
//! - [`FormController`] - Binds fields, edits, commits and rolls back
//! - [`EditSession`] - Owns one schema and its two stores
//!
//! # Data flow
//! A view's field references are resolved by the collector, bound by a
//! controller (which seeds form state from canonical values), edited in the
//! form-state store, and finally committed back into the model store.

pub mod collector;
pub mod controller;
pub mod dependency;
pub mod field_type;
pub mod form_state;
pub mod interpolate;
pub mod model_store;
pub mod registry;
pub mod schema;
pub mod session;

pub use collector::{DependencyCollector, ResolveError, ResolvedField};
pub use controller::{CommitSummary, FieldView, FormController, FormError};
pub use dependency::{Dependency, DependencyError};
pub use field_type::{
    Align, ComputeSource, EnumEntry, FieldType, FilePattern, InputKind, RenderHint,
    SerializeError, ValidationError, ValidationResult, value_text,
};
pub use form_state::{FieldState, FormStateStore, ModelFormState, form_state_from_model};
pub use interpolate::{InterpolateError, interpolate, placeholders};
pub use model_store::{Model, ModelChange, ModelRevision, ModelStore};
pub use registry::FieldTypeRegistry;
pub use schema::{
    DEFAULT_VIEW_KIND, FieldDef, Layout, ModelSchema, ReportConfig, Schema, SchemaError,
    TabConfig, TableRow, ViewConfig,
};
pub use session::{EditSession, ModelSerializeError, SessionId};
