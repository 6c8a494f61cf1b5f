#![forbid(unsafe_code)]

//! Per-panel form controller: bind fields, edit, then commit or roll back.
//!
//! # Lifecycle
//!
//! ```text
//! unbound ──hook──▶ bound-clean ──update_value──▶ bound-dirty
//!                        ▲                           │
//!                        └──── submit / cancel ◀─────┘
//! ```
//!
//! A controller is created when an editor panel opens and dropped when it
//! closes. It owns only its bindings; all state lives in the
//! [`EditSession`] passed to each operation. The first operation attaches the
//! controller to that session and later calls with a different session fail
//! with [`FormError::ForeignSession`].
//!
//! # Concurrency
//!
//! Several controllers may edit the same model. Each one records the model's
//! [`ModelRevision`] when it binds (and after every commit or cancel). A
//! submit whose recorded revision no longer matches the store fails with
//! [`FormError::Conflict`] and writes nothing when this controller has touched
//! a bound field of that model; the panel must cancel to rebase onto the newer
//! canonical value. A model with no touched bound fields has nothing to lose:
//! its untouched fields were reseeded by
//! [`EditSession::update_model`], so the submit adopts the newer revision.
//!
//! # Commit
//!
//! `submit_changes` is all-or-nothing across every bound model. Validity and
//! revisions are checked for all models before the first one is written.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;

use crate::collector::{ResolveError, ResolvedField};
use crate::dependency::Dependency;
use crate::field_type::RenderHint;
use crate::form_state::FieldState;
use crate::model_store::{Model, ModelRevision};
use crate::session::{EditSession, SessionId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by [`FormController`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// The field was never hooked by this controller.
    UnboundField(Dependency),
    /// The session's schema has no such model.
    UnknownModel(String),
    /// A reference could not be resolved while hooking.
    Resolve(ResolveError),
    /// At least one active field is invalid.
    Invalid {
        /// Every active, invalid bound field.
        fields: Vec<Dependency>,
    },
    /// A bound model was replaced since this controller last synced with it.
    Conflict {
        model: String,
        expected: ModelRevision,
        found: ModelRevision,
    },
    /// The controller is attached to another session.
    ForeignSession {
        attached: SessionId,
        given: SessionId,
    },
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundField(d) => write!(f, "field {d} is not bound to this form"),
            Self::UnknownModel(m) => write!(f, "schema has no model {m:?}"),
            Self::Resolve(e) => write!(f, "{e}"),
            Self::Invalid { fields } => {
                write!(f, "form has {} invalid field(s):", fields.len())?;
                for dep in fields {
                    write!(f, " {dep}")?;
                }
                Ok(())
            }
            Self::Conflict {
                model,
                expected,
                found,
            } => write!(
                f,
                "model {model:?} changed underneath the form (expected {expected}, found {found})"
            ),
            Self::ForeignSession { attached, given } => {
                write!(f, "form is attached to {attached}, not {given}")
            }
        }
    }
}

impl std::error::Error for FormError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolve(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ResolveError> for FormError {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A bound field joined with its current state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldView<'a> {
    /// Schema binding.
    pub field: &'a ResolvedField,
    /// Editing state.
    pub state: &'a FieldState,
    /// Committed value, if the model and field exist.
    pub canonical: Option<&'a Value>,
}

impl FieldView<'_> {
    /// Rendering hint for the current state.
    #[must_use]
    pub fn render_hint(&self) -> RenderHint {
        self.field
            .field_type
            .render_hint(self.state.is_valid(), self.state.is_touched())
    }
}

/// Models written by a successful submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Model name and its revision after the commit.
    pub models: Vec<(String, ModelRevision)>,
}

// ---------------------------------------------------------------------------
// FormController
// ---------------------------------------------------------------------------

/// Bindings of one editor panel.
#[derive(Debug, Default)]
pub struct FormController {
    session: Option<SessionId>,
    fields: Vec<ResolvedField>,
    index: HashMap<Dependency, usize>,
    revisions: BTreeMap<String, ModelRevision>,
}

impl FormController {
    /// A controller with no bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&mut self, session: &EditSession) -> Result<(), FormError> {
        match self.session {
            None => {
                self.session = Some(session.id());
                Ok(())
            }
            Some(attached) if attached == session.id() => Ok(()),
            Some(attached) => Err(FormError::ForeignSession {
                attached,
                given: session.id(),
            }),
        }
    }

    fn bound(&self, dependency: &Dependency) -> Result<&ResolvedField, FormError> {
        self.index
            .get(dependency)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| FormError::UnboundField(dependency.clone()))
    }

    /// Resolve a `"model.field"` reference and bind it.
    pub fn hook(
        &mut self,
        session: &mut EditSession,
        reference: &str,
    ) -> Result<Dependency, FormError> {
        let field = session.collector().resolve(reference)?;
        let dependency = field.dependency.clone();
        self.hook_field(session, field)?;
        Ok(dependency)
    }

    /// Bind a resolved field. Binding twice is a no-op.
    ///
    /// The first bind seeds the field's state from its canonical value unless
    /// the form-state store already holds edits for it.
    pub fn hook_field(
        &mut self,
        session: &mut EditSession,
        field: ResolvedField,
    ) -> Result<(), FormError> {
        self.attach(session)?;
        if self.index.contains_key(&field.dependency) {
            return Ok(());
        }
        let model = field.model_name().to_string();
        if !session.schema().has_model(&model) {
            return Err(FormError::UnknownModel(model));
        }

        let revision = session.models().revision(&model);
        self.revisions.entry(model).or_insert(revision);

        let keep_edits = session
            .form_state()
            .field(&field.dependency)
            .is_some_and(FieldState::is_touched);
        if !keep_edits {
            let state = FieldState::seeded(
                session.models().field_value(&field.dependency),
                &field.field_type,
            );
            session.form_state_mut().set_field(&field.dependency, state);
        }

        tracing::trace!(session = %session.id(), field = %field.dependency, "field bound");
        self.index.insert(field.dependency.clone(), self.fields.len());
        self.fields.push(field);
        Ok(())
    }

    /// A bound field and its current state.
    pub fn get_field<'a>(
        &'a self,
        session: &'a EditSession,
        dependency: &Dependency,
    ) -> Result<FieldView<'a>, FormError> {
        let field = self.bound(dependency)?;
        let state = session
            .form_state()
            .field(dependency)
            .ok_or_else(|| FormError::UnboundField(dependency.clone()))?;
        Ok(FieldView {
            field,
            state,
            canonical: session.models().field_value(dependency),
        })
    }

    /// Record a user edit: revalidate and mark touched.
    pub fn update_value(
        &mut self,
        session: &mut EditSession,
        dependency: &Dependency,
        value: Value,
    ) -> Result<(), FormError> {
        self.attach(session)?;
        let field = self.bound(dependency)?;
        let next = match session.form_state().field(dependency) {
            Some(state) => state.edited(value, &field.field_type),
            None => FieldState::seeded(None, &field.field_type).edited(value, &field.field_type),
        };
        tracing::trace!(field = %dependency, valid = next.is_valid(), "field edited");
        session.form_state_mut().set_field(dependency, next);
        Ok(())
    }

    /// Include or exclude a field from the aggregates.
    pub fn update_active(
        &mut self,
        session: &mut EditSession,
        dependency: &Dependency,
        active: bool,
    ) -> Result<(), FormError> {
        self.attach(session)?;
        self.bound(dependency)?;
        let state = session
            .form_state_mut()
            .field_mut(dependency)
            .ok_or_else(|| FormError::UnboundField(dependency.clone()))?;
        state.set_active(active);
        Ok(())
    }

    fn has_touched_fields(&self, session: &EditSession, model: &str) -> bool {
        self.fields
            .iter()
            .filter(|f| f.model_name() == model)
            .filter_map(|f| session.form_state().field(&f.dependency))
            .any(FieldState::is_touched)
    }

    fn bound_states<'a>(
        &'a self,
        session: &'a EditSession,
    ) -> impl Iterator<Item = (&'a Dependency, &'a FieldState)> + 'a {
        self.fields.iter().filter_map(move |f| {
            session
                .form_state()
                .field(&f.dependency)
                .map(|s| (&f.dependency, s))
        })
    }

    /// Whether any active bound field has been edited.
    #[must_use]
    pub fn is_form_state_dirty(&self, session: &EditSession) -> bool {
        self.bound_states(session).any(|(_, s)| s.is_dirty())
    }

    /// Whether no active bound field is invalid.
    #[must_use]
    pub fn is_form_state_valid(&self, session: &EditSession) -> bool {
        !self.bound_states(session).any(|(_, s)| s.blocks_submit())
    }

    /// Active bound fields that fail validation, in bind order.
    #[must_use]
    pub fn invalid_fields(&self, session: &EditSession) -> Vec<Dependency> {
        self.bound_states(session)
            .filter(|(_, s)| s.blocks_submit())
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// Commit every bound model.
    ///
    /// Bound field values are folded into a copy of each canonical model, the
    /// copies replace the canonical models, and each model's form state is
    /// rebuilt from the result.
    pub fn submit_changes(
        &mut self,
        session: &mut EditSession,
    ) -> Result<CommitSummary, FormError> {
        self.attach(session)?;
        let span = tracing::debug_span!(
            "submit_changes",
            session = %session.id(),
            models = self.revisions.len()
        );
        let _guard = span.enter();

        let invalid = self.invalid_fields(session);
        if !invalid.is_empty() {
            tracing::debug!(invalid = invalid.len(), "submit rejected: invalid fields");
            return Err(FormError::Invalid { fields: invalid });
        }

        let mut rebased = Vec::new();
        for (model, &expected) in &self.revisions {
            let found = session.models().revision(model);
            if found == expected {
                continue;
            }
            if self.has_touched_fields(session, model) {
                tracing::warn!(model = %model, %expected, %found, "submit rejected: stale form");
                return Err(FormError::Conflict {
                    model: model.clone(),
                    expected,
                    found,
                });
            }
            rebased.push((model.clone(), found));
        }
        for (model, found) in rebased {
            tracing::debug!(model = %model, %found, "clean model rebased");
            self.revisions.insert(model, found);
        }

        let mut pending: Vec<(String, Model)> = Vec::with_capacity(self.revisions.len());
        for model in self.revisions.keys() {
            let mut next = session.models().model(model).cloned().unwrap_or_default();
            for field in self.fields.iter().filter(|f| f.model_name() == model.as_str()) {
                if let Some(state) = session.form_state().field(&field.dependency) {
                    next.insert(field.field_name().to_string(), state.value().clone());
                }
            }
            pending.push((model.clone(), next));
        }

        let mut committed = Vec::with_capacity(pending.len());
        for (model, next) in pending {
            let revision = session.models_mut().update_model(model.clone(), next);
            session.reseed_model(&model);
            self.revisions.insert(model.clone(), revision);
            tracing::debug!(model = %model, %revision, "model committed");
            committed.push((model, revision));
        }
        Ok(CommitSummary { models: committed })
    }

    /// Discard all edits: rebuild every bound model's form state from its
    /// canonical value and adopt the current revisions.
    pub fn cancel_changes(&mut self, session: &mut EditSession) -> Result<(), FormError> {
        self.attach(session)?;
        let _guard = tracing::debug_span!("cancel_changes", session = %session.id()).entered();
        for (model, revision) in &mut self.revisions {
            session.reseed_model(model);
            *revision = session.models().revision(model);
        }
        tracing::debug!(models = self.revisions.len(), "form state reset");
        Ok(())
    }

    /// Bound fields in bind order.
    #[must_use]
    pub fn bound_fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    /// Whether a field is bound.
    #[must_use]
    pub fn is_bound(&self, dependency: &Dependency) -> bool {
        self.index.contains_key(dependency)
    }

    /// Names of bound models.
    pub fn bound_models(&self) -> impl Iterator<Item = &str> {
        self.revisions.keys().map(String::as_str)
    }

    /// Revision this controller last synced a model at.
    #[must_use]
    pub fn synced_revision(&self, model: &str) -> Option<ModelRevision> {
        self.revisions.get(model).copied()
    }
}
