#![forbid(unsafe_code)]

//! Transient per-field editing state.
//!
//! A [`FieldState`] is derived from a canonical value and then mutated by UI
//! edits until the form is committed or cancelled. `valid` is never set
//! directly; every constructor and mutator recomputes it from `value` with
//! the field's type, so it cannot drift from the value it describes.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::dependency::Dependency;
use crate::field_type::FieldType;
use crate::model_store::Model;
use crate::schema::ModelSchema;

/// Editing state of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    value: Value,
    valid: bool,
    touched: bool,
    active: bool,
}

impl FieldState {
    /// Fresh, untouched, active state for a canonical value.
    ///
    /// A missing canonical value is represented as `null`.
    #[must_use]
    pub fn seeded(canonical: Option<&Value>, field_type: &FieldType) -> Self {
        let value = canonical.cloned().unwrap_or(Value::Null);
        Self {
            valid: field_type.validate(&value),
            value,
            touched: false,
            active: true,
        }
    }

    /// The state after a user edit. `active` is carried over.
    #[must_use]
    pub fn edited(&self, value: Value, field_type: &FieldType) -> Self {
        Self {
            valid: field_type.validate(&value),
            value,
            touched: true,
            active: self.active,
        }
    }

    /// Current raw value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether `value` passes the field's validator.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether the user has edited this field since the last reseed.
    #[must_use]
    pub fn is_touched(&self) -> bool {
        self.touched
    }

    /// Whether the field participates in the form aggregates.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Include or exclude the field from the form aggregates.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Counts toward `is_form_state_dirty`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.active && self.touched
    }

    /// Counts against `is_form_state_valid`.
    #[must_use]
    pub fn blocks_submit(&self) -> bool {
        self.active && !self.valid
    }
}

/// Editing state of every field of one model.
pub type ModelFormState = BTreeMap<String, FieldState>;

/// Seed form state for every schema field of a model from its canonical value.
#[must_use]
pub fn form_state_from_model(model: Option<&Model>, schema: &ModelSchema) -> ModelFormState {
    schema
        .fields()
        .map(|(name, def)| {
            let canonical = model.and_then(|m| m.get(name));
            (
                name.to_string(),
                FieldState::seeded(canonical, &def.field_type),
            )
        })
        .collect()
}

/// Store of model name → per-field editing state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormStateStore {
    models: BTreeMap<String, ModelFormState>,
}

impl FormStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole form state of one model.
    pub fn replace_model(&mut self, name: impl Into<String>, state: ModelFormState) {
        self.models.insert(name.into(), state);
    }

    /// Form state of one model.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelFormState> {
        self.models.get(name)
    }

    /// Form state of one field.
    #[must_use]
    pub fn field(&self, dependency: &Dependency) -> Option<&FieldState> {
        self.models
            .get(dependency.model_name())?
            .get(dependency.field_name())
    }

    /// Mutable form state of one field.
    pub fn field_mut(&mut self, dependency: &Dependency) -> Option<&mut FieldState> {
        self.models
            .get_mut(dependency.model_name())?
            .get_mut(dependency.field_name())
    }

    /// Set the state of one field, creating its model entry if needed.
    pub fn set_field(&mut self, dependency: &Dependency, state: FieldState) {
        self.models
            .entry(dependency.model_name().to_string())
            .or_default()
            .insert(dependency.field_name().to_string(), state);
    }

    /// Drop the form state of one model.
    pub fn remove_model(&mut self, name: &str) -> Option<ModelFormState> {
        self.models.remove(name)
    }

    /// Iterate models in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelFormState)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of models with form state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
