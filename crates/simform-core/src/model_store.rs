#![forbid(unsafe_code)]

//! Canonical model storage.
//!
//! The [`ModelStore`] is the single source of truth for committed simulation
//! configuration. Each model is an arbitrary JSON record. Models are replaced
//! wholesale, never patched field by field, and every replacement bumps the
//! model's [`ModelRevision`] and notifies subscribers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc;

use serde_json::{Map, Value};

use crate::dependency::Dependency;

/// A named record of configuration values.
pub type Model = Map<String, Value>;

/// Monotonic per-store revision stamped on every model replacement.
///
/// `ModelRevision::NONE` is reported for models that were never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModelRevision(u64);

impl ModelRevision {
    /// The revision of a model that does not exist.
    pub const NONE: Self = Self(0);

    /// Raw revision value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev{}", self.0)
    }
}

/// Notification sent to subscribers after a model is replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelChange {
    /// Name of the replaced model.
    pub model: String,
    /// Revision after the replacement.
    pub revision: ModelRevision,
}

#[derive(Debug, Clone)]
struct StoredModel {
    value: Model,
    revision: ModelRevision,
}

/// Canonical store of model name → model value.
#[derive(Debug, Default)]
pub struct ModelStore {
    models: BTreeMap<String, StoredModel>,
    last_revision: u64,
    subscribers: Vec<mpsc::Sender<ModelChange>>,
}

impl ModelStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a model and notify subscribers. Returns the new revision.
    pub fn update_model(&mut self, name: impl Into<String>, value: Model) -> ModelRevision {
        let name = name.into();
        self.last_revision += 1;
        let revision = ModelRevision(self.last_revision);
        tracing::trace!(model = %name, %revision, fields = value.len(), "model updated");
        self.models
            .insert(name.clone(), StoredModel { value, revision });

        let change = ModelChange {
            model: name,
            revision,
        };
        // Dropped receivers are pruned on the next send.
        self.subscribers
            .retain(|tx| tx.send(change.clone()).is_ok());
        revision
    }

    /// Look up a model.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name).map(|m| &m.value)
    }

    /// Whether a model is stored.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Revision of a model, or [`ModelRevision::NONE`] if absent.
    #[must_use]
    pub fn revision(&self, name: &str) -> ModelRevision {
        self.models
            .get(name)
            .map_or(ModelRevision::NONE, |m| m.revision)
    }

    /// Canonical value of one field, if both model and field exist.
    #[must_use]
    pub fn field_value(&self, dependency: &Dependency) -> Option<&Value> {
        self.model(dependency.model_name())?
            .get(dependency.field_name())
    }

    /// Current values of several fields, `null` where missing.
    ///
    /// The result is the "dependency value vector" reports compare to decide
    /// whether they must be recomputed.
    #[must_use]
    pub fn select_values(&self, dependencies: &[Dependency]) -> Vec<Value> {
        dependencies
            .iter()
            .map(|d| self.field_value(d).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Iterate models in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Model)> {
        self.models.iter().map(|(k, v)| (k.as_str(), &v.value))
    }

    /// A detached copy of every model.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Model> {
        self.models
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Number of stored models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Receive a [`ModelChange`] for every subsequent replacement.
    pub fn subscribe(&mut self) -> mpsc::Receiver<ModelChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }
}
