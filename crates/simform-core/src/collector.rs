#![forbid(unsafe_code)]

//! Resolution of view field references against a compiled schema.

use std::fmt;
use std::sync::Arc;

use crate::dependency::{Dependency, DependencyError};
use crate::field_type::FieldType;
use crate::schema::{Schema, ViewConfig};

/// Errors raised while resolving a field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The reference is not `"model.field"`.
    Dependency(DependencyError),
    /// The schema has no such model.
    UnknownModel(String),
    /// The model has no such field.
    UnknownField(Dependency),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependency(e) => write!(f, "{e}"),
            Self::UnknownModel(m) => write!(f, "schema has no model {m:?}"),
            Self::UnknownField(d) => write!(f, "schema has no field {d}"),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dependency(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DependencyError> for ResolveError {
    fn from(e: DependencyError) -> Self {
        Self::Dependency(e)
    }
}

/// A field reference resolved to its schema definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    /// The field's location.
    pub dependency: Dependency,
    /// Validation/serialization rules.
    pub field_type: FieldType,
    /// Label.
    pub display_name: String,
    /// Tooltip text.
    pub description: Option<String>,
}

impl ResolvedField {
    /// Model the field belongs to.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.dependency.model_name()
    }

    /// Field name within the model.
    #[must_use]
    pub fn field_name(&self) -> &str {
        self.dependency.field_name()
    }
}

/// Resolves field references against one schema.
///
/// Resolution is pure: the same reference always yields an equal
/// [`ResolvedField`].
#[derive(Debug, Clone)]
pub struct DependencyCollector {
    schema: Arc<Schema>,
}

impl DependencyCollector {
    /// Create a collector over a schema.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// The schema references are resolved against.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Parse and resolve a `"model.field"` reference.
    pub fn resolve(&self, reference: &str) -> Result<ResolvedField, ResolveError> {
        self.resolve_dependency(&Dependency::parse(reference)?)
    }

    /// Resolve an already parsed dependency.
    pub fn resolve_dependency(&self, dependency: &Dependency) -> Result<ResolvedField, ResolveError> {
        let model = self
            .schema
            .model(dependency.model_name())
            .ok_or_else(|| ResolveError::UnknownModel(dependency.model_name().to_string()))?;
        let def = model
            .field(dependency.field_name())
            .ok_or_else(|| ResolveError::UnknownField(dependency.clone()))?;
        Ok(ResolvedField {
            dependency: dependency.clone(),
            field_type: def.field_type.clone(),
            display_name: def.display_name.clone(),
            description: def.description.clone(),
        })
    }

    /// Resolve every form field of a view, deduplicated in document order.
    pub fn resolve_view(&self, view: &ViewConfig) -> Result<Vec<ResolvedField>, ResolveError> {
        view.form_dependencies()?
            .iter()
            .map(|dep| self.resolve_dependency(dep))
            .collect()
    }
}
