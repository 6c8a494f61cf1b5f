#![forbid(unsafe_code)]

//! The editing context: one schema, one canonical store, one form-state store.
//!
//! Stores are owned by an [`EditSession`] and passed explicitly to the code
//! that needs them. Two sessions never share state, so independent editors
//! (or tests) can run side by side without cross-talk.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::collector::DependencyCollector;
use crate::dependency::Dependency;
use crate::field_type::SerializeError;
use crate::form_state::{FieldState, FormStateStore, ModelFormState, form_state_from_model};
use crate::model_store::{Model, ModelRevision, ModelStore};
use crate::schema::Schema;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A model field whose value could not be prepared for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSerializeError {
    /// The offending field.
    pub dependency: Dependency,
    /// What went wrong.
    pub source: SerializeError,
}

impl fmt::Display for ModelSerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot serialize {}: {}", self.dependency, self.source)
    }
}

impl std::error::Error for ModelSerializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Schema plus the canonical and transient stores of one editing context.
#[derive(Debug)]
pub struct EditSession {
    id: SessionId,
    schema: Arc<Schema>,
    models: ModelStore,
    form_state: FormStateStore,
}

impl EditSession {
    /// Create an empty session over a schema.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(session = %id, "edit session created");
        Self {
            id,
            schema,
            models: ModelStore::new(),
            form_state: FormStateStore::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The compiled schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// A collector resolving references against this session's schema.
    #[must_use]
    pub fn collector(&self) -> DependencyCollector {
        DependencyCollector::new(Arc::clone(&self.schema))
    }

    /// Canonical models.
    #[must_use]
    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub(crate) fn models_mut(&mut self) -> &mut ModelStore {
        &mut self.models
    }

    /// Replace one canonical model outside a form commit.
    ///
    /// If the model already has form state, its untouched fields are
    /// reseeded from the new value (keeping their `active` flag) and touched
    /// fields keep their edits. A form whose bound fields in this model are
    /// all untouched can then submit without a conflict.
    pub fn update_model(&mut self, name: impl Into<String>, model: Model) -> ModelRevision {
        let name = name.into();
        let revision = self.models.update_model(name.clone(), model);
        self.refresh_untouched(&name);
        revision
    }

    fn refresh_untouched(&mut self, name: &str) {
        let (Some(model_schema), Some(current)) =
            (self.schema.model(name), self.form_state.model(name))
        else {
            return;
        };
        let canonical = self.models.model(name);
        let mut refreshed = 0usize;
        let next: ModelFormState = model_schema
            .fields()
            .map(|(field, def)| {
                let state = match current.get(field) {
                    Some(state) if state.is_touched() => state.clone(),
                    previous => {
                        refreshed += 1;
                        let mut fresh =
                            FieldState::seeded(canonical.and_then(|m| m.get(field)), &def.field_type);
                        fresh.set_active(previous.is_none_or(FieldState::is_active));
                        fresh
                    }
                };
                (field.to_string(), state)
            })
            .collect();
        self.form_state.replace_model(name, next);
        tracing::trace!(session = %self.id, model = %name, refreshed, "untouched fields reseeded");
    }

    /// Transient form state.
    #[must_use]
    pub fn form_state(&self) -> &FormStateStore {
        &self.form_state
    }

    /// Transient form state, mutable.
    pub fn form_state_mut(&mut self) -> &mut FormStateStore {
        &mut self.form_state
    }

    /// Seed the canonical store from a backend `models` map.
    ///
    /// Each record goes through [`update_model`](Self::update_model). Non-object
    /// entries are skipped. Returns the number of models stored.
    pub fn load_models(&mut self, models: &Map<String, Value>) -> usize {
        let mut loaded = 0;
        for (name, value) in models {
            match value {
                Value::Object(model) => {
                    self.update_model(name.clone(), model.clone());
                    loaded += 1;
                }
                other => {
                    tracing::warn!(model = %name, value = %other, "skipping non-record model");
                }
            }
        }
        tracing::debug!(session = %self.id, loaded, "models loaded");
        loaded
    }

    /// Store a defaults-only model for every schema model the canonical
    /// store lacks.
    pub fn fill_missing_defaults(&mut self) -> usize {
        let missing: Vec<(String, Model)> = self
            .schema
            .model_names()
            .filter(|name| !self.models.contains(name))
            .filter_map(|name| Some((name.to_string(), self.schema.default_model(name)?)))
            .collect();
        let count = missing.len();
        for (name, model) in missing {
            self.update_model(name, model);
        }
        count
    }

    /// Seed form state for every stored model the schema knows.
    ///
    /// Models without a schema entry (backend data records) get no form state.
    pub fn initialize_form_state(&mut self) {
        let names: Vec<String> = self
            .models
            .iter()
            .map(|(name, _)| name.to_string())
            .filter(|name| self.schema.has_model(name))
            .collect();
        for name in &names {
            self.reseed_model(name);
        }
        tracing::debug!(session = %self.id, models = names.len(), "form state initialized");
    }

    /// Rebuild one model's form state from its canonical value.
    ///
    /// Returns `false` if the schema has no such model.
    pub(crate) fn reseed_model(&mut self, name: &str) -> bool {
        let Some(model_schema) = self.schema.model(name) else {
            return false;
        };
        let state = form_state_from_model(self.models.model(name), model_schema);
        self.form_state.replace_model(name, state);
        true
    }

    /// Current canonical values of several fields, `null` where missing.
    #[must_use]
    pub fn dependency_values(&self, dependencies: &[Dependency]) -> Vec<Value> {
        self.models.select_values(dependencies)
    }

    /// Committed models, with every schema field canonicalized for the wire.
    ///
    /// Fields and models the schema does not describe pass through unchanged.
    pub fn serialized_models(&self) -> Result<Map<String, Value>, ModelSerializeError> {
        let mut out = Map::new();
        for (name, model) in self.models.iter() {
            let model_schema = self.schema.model(name);
            let mut wire = Model::new();
            for (field, value) in model {
                let def = model_schema.and_then(|s| s.field(field));
                let value = match def {
                    Some(def) => def.field_type.serialize(value).map_err(|source| {
                        ModelSerializeError {
                            dependency: Dependency::new(name, field.as_str()),
                            source,
                        }
                    })?,
                    None => value.clone(),
                };
                wire.insert(field.clone(), value);
            }
            out.insert(name.to_string(), Value::Object(wire));
        }
        Ok(out)
    }
}
