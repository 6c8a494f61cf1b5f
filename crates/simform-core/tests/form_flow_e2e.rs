//! Form Flow E2E Tests
//!
//! Drives a complete editing session the way an editor panel does: compile a
//! schema, load backend models, resolve a view, bind its fields, edit, and
//! commit or roll back.
//!
//! # Running Tests
//!
//! ```sh
//! cargo test -p simform-core --test form_flow_e2e
//! ```
//!
//! # Invariants
//!
//! 1. **Clean form mirrors canonical**: untouched fields equal committed values
//! 2. **Commit is whole**: an invalid field blocks every model
//! 3. **Resync after commit**: form state is rebuilt from the store
//! 4. **Malformed references fail**: nothing defaults to an arbitrary model
//! 5. **Valid means sendable**: text the backend could not parse never passes
//! 6. **Reloads keep clean fields in sync**: an administrative model update
//!    reseeds untouched fields and does not turn into a conflict

use std::sync::Arc;

use serde_json::{Value, json};
use simform_core::{
    Dependency, EditSession, FormController, FormError, InputKind, ResolveError, Schema,
    interpolate,
};

// ============================================================================
// Fixtures
// ============================================================================

fn schema() -> Arc<Schema> {
    let schema = Schema::from_value(json!({
        "types": {
            "Species": { "base": "Enum", "config": { "allowedValues": [["e", "Electron"], ["p", "Proton"]] } },
            "LatticeFile": { "base": "File", "config": { "pattern": "\\.madx$", "isRequired": false } }
        },
        "models": {
            "beamSettings": {
                "current": { "displayName": "Current", "type": "Float" },
                "species": { "displayName": "Species", "type": "Species" },
                "tracking": { "displayName": "Tracking", "type": "Boolean" }
            },
            "simulationSettings": {
                "particles": { "displayName": "Particles", "type": "Integer" },
                "lattice": { "displayName": "Lattice", "type": "LatticeFile" }
            }
        },
        "views": [
            {
                "name": "beam",
                "title": "Beam $(beamSettings.species)",
                "basic": [
                    { "layout": "fieldList", "fields": ["beamSettings.current", "beamSettings.species"] },
                    { "layout": "autoRunReport", "report": "beamAnimation", "dependencies": ["simulationSettings.particles"] }
                ],
                "advanced": [
                    { "layout": "fieldTable", "columns": ["Value"], "rows": [
                        { "label": "Particles", "fields": ["simulationSettings.particles"] },
                        { "label": "Tracking", "fields": ["beamSettings.tracking"] }
                    ] },
                    { "layout": "fieldList", "fields": ["simulationSettings.lattice"] }
                ]
            }
        ]
    }))
    .expect("schema compiles");
    Arc::new(schema)
}

fn loaded_session() -> EditSession {
    let mut session = EditSession::new(schema());
    let source = json!({
        "beamSettings": { "current": "0.5", "species": "e", "tracking": "1" },
        "simulationSettings": { "particles": "1000", "lattice": "" },
        "plotData": { "points": [1, 2, 3] }
    });
    session.load_models(source.as_object().expect("object"));
    session.initialize_form_state();
    session
}

fn open_panel(session: &mut EditSession, view: &str) -> FormController {
    let view = session.schema().view(view).expect("view").clone();
    let fields = session.collector().resolve_view(&view).expect("view resolves");
    let mut form = FormController::new();
    for field in fields {
        form.hook_field(session, field).expect("bind");
    }
    form
}

fn dep(r: &str) -> Dependency {
    Dependency::parse(r).expect("reference")
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn panel_opens_clean() {
    let mut session = loaded_session();
    let form = open_panel(&mut session, "beam");

    assert_eq!(form.bound_fields().len(), 5);
    assert!(!form.is_form_state_dirty(&session));
    assert!(form.is_form_state_valid(&session));

    for field in form.bound_fields() {
        let view = form.get_field(&session, &field.dependency).expect("bound");
        assert_eq!(Some(view.state.value()), view.canonical);
    }
    let species = form.get_field(&session, &dep("beamSettings.species")).expect("bound");
    assert_eq!(species.render_hint().input, InputKind::Select);
}

#[test]
fn edit_then_submit_commits_both_models() {
    let mut session = loaded_session();
    let mut form = open_panel(&mut session, "beam");

    form.update_value(&mut session, &dep("beamSettings.current"), json!("1.25"))
        .expect("edit");
    form.update_value(&mut session, &dep("simulationSettings.particles"), json!("+2000"))
        .expect("edit");
    assert!(form.is_form_state_dirty(&session));

    let summary = form.submit_changes(&mut session).expect("valid form");
    assert_eq!(summary.models.len(), 2);
    assert!(!form.is_form_state_dirty(&session));

    let wire = session.serialized_models().expect("serializable");
    assert_eq!(wire["beamSettings"]["current"], json!(1.25));
    assert_eq!(wire["beamSettings"]["tracking"], json!("1"));
    assert_eq!(wire["simulationSettings"]["particles"], json!(2000));
    assert_eq!(wire["plotData"]["points"], json!([1, 2, 3]));
}

#[test]
fn invalid_field_blocks_every_model() {
    let mut session = loaded_session();
    let mut form = open_panel(&mut session, "beam");
    let before = session.models().snapshot();

    form.update_value(&mut session, &dep("beamSettings.current"), json!("2.0"))
        .expect("edit");
    form.update_value(&mut session, &dep("beamSettings.species"), json!("muon"))
        .expect("edit");

    let err = form.submit_changes(&mut session).unwrap_err();
    assert_eq!(
        err,
        FormError::Invalid {
            fields: vec![dep("beamSettings.species")]
        }
    );
    assert_eq!(session.models().snapshot(), before);

    // Hiding the offending field lets the rest through.
    form.update_active(&mut session, &dep("beamSettings.species"), false)
        .expect("bound");
    form.submit_changes(&mut session).expect("valid once hidden");
    assert_eq!(
        session.models().field_value(&dep("beamSettings.current")),
        Some(&json!("2.0"))
    );
}

#[test]
fn cancel_discards_edits() {
    let mut session = loaded_session();
    let mut form = open_panel(&mut session, "beam");
    form.update_value(&mut session, &dep("beamSettings.tracking"), Value::Bool(false))
        .expect("edit");
    form.cancel_changes(&mut session).expect("same session");

    let view = form.get_field(&session, &dep("beamSettings.tracking")).expect("bound");
    assert_eq!(view.state.value(), &json!("1"));
    assert!(!form.is_form_state_dirty(&session));
}

#[test]
fn malformed_reference_fails_resolution() {
    let mut session = loaded_session();
    let mut form = FormController::new();
    assert!(matches!(
        form.hook(&mut session, "current"),
        Err(FormError::Resolve(ResolveError::Dependency(_)))
    ));
    assert!(form.bound_fields().is_empty());
}

#[test]
fn title_interpolates_committed_values() {
    let mut session = loaded_session();
    let title = session.schema().view("beam").expect("view").title().to_string();
    assert_eq!(interpolate(&title, session.models()).expect("resolves"), "Beam e");

    let mut form = open_panel(&mut session, "beam");
    form.update_value(&mut session, &dep("beamSettings.species"), json!("p"))
        .expect("edit");
    assert_eq!(interpolate(&title, session.models()).expect("resolves"), "Beam e");
    form.submit_changes(&mut session).expect("valid");
    assert_eq!(interpolate(&title, session.models()).expect("resolves"), "Beam p");
}

#[test]
fn unsendable_number_blocks_submit() {
    let mut session = loaded_session();
    let mut form = open_panel(&mut session, "beam");
    let current = dep("beamSettings.current");

    for text in [".", "-.", "1e999"] {
        form.update_value(&mut session, &current, json!(text))
            .expect("edit");
        assert!(!form.is_form_state_valid(&session), "{text:?} accepted");
        assert_eq!(
            form.submit_changes(&mut session).unwrap_err(),
            FormError::Invalid {
                fields: vec![current.clone()]
            }
        );
    }
    session.serialized_models().expect("canonical store untouched");
}

#[test]
fn reload_keeps_clean_panel_submittable() {
    let mut session = loaded_session();
    let mut form = open_panel(&mut session, "beam");

    let reloaded = json!({
        "beamSettings": { "current": "9.9", "species": "p", "tracking": "0" }
    });
    session.load_models(reloaded.as_object().expect("object"));

    for field in form.bound_fields() {
        let view = form.get_field(&session, &field.dependency).expect("bound");
        assert_eq!(Some(view.state.value()), view.canonical, "{}", field.dependency);
    }
    assert!(!form.is_form_state_dirty(&session));

    form.submit_changes(&mut session).expect("no conflict for a clean form");
    assert_eq!(
        session.models().field_value(&dep("beamSettings.current")),
        Some(&json!("9.9"))
    );
}
