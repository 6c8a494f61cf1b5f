#![forbid(unsafe_code)]

//! Compiled application schema: models, their typed fields, and views.
//!
//! # JSON shape
//!
//! ```json
//! {
//!   "types":  { "Species": { "base": "Enum", "config": { "allowedValues": [["e", "Electron"]] } } },
//!   "models": { "beam": { "current": { "displayName": "Current", "type": "Float", "defaultValue": 1.0 } } },
//!   "views":  [ { "name": "beam", "title": "Beam", "basic": [ { "layout": "fieldList", "fields": ["beam.current"] } ] } ]
//! }
//! ```
//!
//! `views` may also be a map keyed by view name, with the layouts nested under
//! `config` and an optional view `type`:
//!
//! ```json
//! { "views": { "beam": { "title": "Beam", "type": "panel", "config": { "basic": [], "advanced": [] } } } }
//! ```
//!
//! Keyed views are listed in name order.
//!
//! Compilation resolves every field's type name through a
//! [`FieldTypeRegistry`] and checks that every field reference in every view
//! names an existing model field, so a compiled [`Schema`] never contains a
//! dangling reference.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::dependency::{Dependency, DependencyError};
use crate::field_type::FieldType;
use crate::model_store::Model;
use crate::registry::FieldTypeRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while compiling a schema.
#[derive(Debug)]
pub enum SchemaError {
    /// The document is not valid JSON or does not have the expected shape.
    Json(serde_json::Error),
    /// A field names a type that is not registered.
    UnknownType {
        model: String,
        field: String,
        type_name: String,
    },
    /// A partial type names an unsupported base kind.
    UnknownBase { type_name: String, base: String },
    /// A partial type's config is malformed.
    BadTypeConfig { type_name: String, reason: String },
    /// A view contains a reference that is not `"model.field"`.
    BadReference {
        view: String,
        source: DependencyError,
    },
    /// A view references a model field the schema does not define.
    UnknownField { view: String, dependency: Dependency },
    /// A view entry is malformed (no name, wrong container shape).
    BadView { view: String, reason: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "schema JSON error: {e}"),
            Self::UnknownType {
                model,
                field,
                type_name,
            } => write!(f, "{model}.{field}: unknown field type {type_name:?}"),
            Self::UnknownBase { type_name, base } => {
                write!(f, "type {type_name:?}: unknown base kind {base:?}")
            }
            Self::BadTypeConfig { type_name, reason } => {
                write!(f, "type {type_name:?}: {reason}")
            }
            Self::BadReference { view, source } => write!(f, "view {view:?}: {source}"),
            Self::UnknownField { view, dependency } => {
                write!(f, "view {view:?}: no schema field for {dependency}")
            }
            Self::BadView { view, reason } => write!(f, "view {view:?}: {reason}"),
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::BadReference { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A compiled field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Label shown next to the input.
    pub display_name: String,
    /// Validation/serialization rules.
    pub field_type: FieldType,
    /// Value used when building a model from scratch.
    pub default_value: Option<Value>,
    /// Tooltip text.
    pub description: Option<String>,
}

/// All fields of one model, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSchema {
    fields: BTreeMap<String, FieldDef>,
}

impl ModelSchema {
    /// Build a model schema from field definitions.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = (String, FieldDef)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Look up a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// Iterate fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the model has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// One row of a field table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableRow {
    /// Optional row label.
    #[serde(default)]
    pub label: Option<String>,
    /// One field reference per column.
    pub fields: Vec<String>,
}

/// One tab of a tab layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TabConfig {
    /// Tab title and key.
    pub name: String,
    /// Layouts shown inside the tab.
    pub items: Vec<Layout>,
}

/// A declarative layout element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "layout", rename_all = "camelCase")]
pub enum Layout {
    /// Labeled fields, one per line.
    FieldList { fields: Vec<String> },
    /// A grid of fields with column headers.
    FieldTable {
        columns: Vec<String>,
        rows: Vec<TableRow>,
    },
    /// Nested layouts grouped in tabs.
    Tabs { tabs: Vec<TabConfig> },
    /// A report that is recomputed whenever its dependencies change.
    #[serde(rename_all = "camelCase")]
    AutoRunReport {
        report: String,
        #[serde(default)]
        dependencies: Vec<String>,
    },
}

impl Layout {
    /// Field references edited by this layout, in document order.
    fn collect_field_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::FieldList { fields } => out.extend(fields.iter().map(String::as_str)),
            Self::FieldTable { rows, .. } => {
                for row in rows {
                    out.extend(row.fields.iter().map(String::as_str));
                }
            }
            Self::Tabs { tabs } => {
                for tab in tabs {
                    for item in &tab.items {
                        item.collect_field_refs(out);
                    }
                }
            }
            Self::AutoRunReport { .. } => {}
        }
    }

    fn collect_reports<'a>(&'a self, out: &mut Vec<ReportConfig<'a>>) {
        match self {
            Self::AutoRunReport {
                report,
                dependencies,
            } => out.push(ReportConfig {
                report,
                dependencies,
            }),
            Self::Tabs { tabs } => {
                for tab in tabs {
                    for item in &tab.items {
                        item.collect_reports(out);
                    }
                }
            }
            Self::FieldList { .. } | Self::FieldTable { .. } => {}
        }
    }
}

/// A report declared inside a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportConfig<'a> {
    /// Report (analysis model) name sent to the backend.
    pub report: &'a str,
    /// Report-specific dependency references.
    pub dependencies: &'a [String],
}

/// View kind used when a view declares no `type`.
pub const DEFAULT_VIEW_KIND: &str = "panel";

/// A panel: a title plus basic and advanced layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    /// Unique view name.
    pub name: String,
    /// Panel title; falls back to the name.
    pub title: Option<String>,
    /// Which view builder renders this view.
    pub kind: String,
    /// Layouts always shown.
    pub basic: Vec<Layout>,
    /// Layouts shown in the advanced (modal) editor.
    pub advanced: Vec<Layout>,
}

impl ViewConfig {
    /// A panel view with no layouts.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            kind: DEFAULT_VIEW_KIND.to_string(),
            basic: Vec::new(),
            advanced: Vec::new(),
        }
    }

    /// Panel title.
    #[must_use]
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Every field reference edited by this view, basic then advanced.
    #[must_use]
    pub fn field_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for layout in self.basic.iter().chain(&self.advanced) {
            layout.collect_field_refs(&mut out);
        }
        out
    }

    /// Parsed, deduplicated form dependencies in document order.
    pub fn form_dependencies(&self) -> Result<Vec<Dependency>, DependencyError> {
        let mut seen = BTreeSet::new();
        let mut deps = Vec::new();
        for reference in self.field_refs() {
            let dep = Dependency::parse(reference)?;
            if seen.insert(dep.clone()) {
                deps.push(dep);
            }
        }
        Ok(deps)
    }

    /// Reports declared anywhere in this view.
    #[must_use]
    pub fn reports(&self) -> Vec<ReportConfig<'_>> {
        let mut out = Vec::new();
        for layout in self.basic.iter().chain(&self.advanced) {
            layout.collect_reports(&mut out);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    types: BTreeMap<String, RawTypeDef>,
    models: BTreeMap<String, BTreeMap<String, RawFieldDef>>,
    /// A list of named views or a map keyed by view name.
    #[serde(default)]
    views: Value,
}

#[derive(Deserialize)]
struct RawView {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    config: Option<RawViewLayouts>,
    #[serde(default)]
    basic: Vec<Layout>,
    #[serde(default)]
    advanced: Vec<Layout>,
}

#[derive(Deserialize)]
struct RawViewLayouts {
    #[serde(default)]
    basic: Vec<Layout>,
    #[serde(default)]
    advanced: Vec<Layout>,
}

impl RawView {
    /// `key` is the map key for keyed views; it wins over an inner `name`.
    fn into_view(self, key: Option<String>) -> Result<ViewConfig, SchemaError> {
        let Some(name) = key.or(self.name) else {
            return Err(SchemaError::BadView {
                view: self.title.unwrap_or_default(),
                reason: "view has no name".to_string(),
            });
        };
        let (basic, advanced) = match self.config {
            Some(config) => (config.basic, config.advanced),
            None => (self.basic, self.advanced),
        };
        Ok(ViewConfig {
            name,
            title: self.title,
            kind: self.kind.unwrap_or_else(|| DEFAULT_VIEW_KIND.to_string()),
            basic,
            advanced,
        })
    }
}

fn compile_views(views: Value) -> Result<Vec<ViewConfig>, SchemaError> {
    match views {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value::<RawView>(item)?.into_view(None))
            .collect(),
        Value::Object(entries) => entries
            .into_iter()
            .map(|(name, item)| serde_json::from_value::<RawView>(item)?.into_view(Some(name)))
            .collect(),
        other => Err(SchemaError::BadView {
            view: String::new(),
            reason: format!("views must be a list or a map, not {other}"),
        }),
    }
}

#[derive(Deserialize)]
struct RawTypeDef {
    base: String,
    #[serde(default)]
    config: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldDef {
    display_name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A compiled schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    models: BTreeMap<String, ModelSchema>,
    views: Vec<ViewConfig>,
}

impl Schema {
    /// Compile a schema document with the built-in type registry.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Compile a parsed schema document with the built-in type registry.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        Self::compile(value, FieldTypeRegistry::builtin())
    }

    /// Compile a parsed schema document, extending `registry` with the
    /// document's own parameterised types.
    pub fn compile(value: Value, mut registry: FieldTypeRegistry) -> Result<Self, SchemaError> {
        let raw: RawSchema = serde_json::from_value(value)?;

        for (name, def) in &raw.types {
            registry.register_partial(name, &def.base, &def.config)?;
        }

        let mut models = BTreeMap::new();
        for (model_name, raw_fields) in raw.models {
            let mut fields = BTreeMap::new();
            for (field_name, raw_field) in raw_fields {
                let Some(field_type) = registry.get(&raw_field.type_name).cloned() else {
                    return Err(SchemaError::UnknownType {
                        model: model_name,
                        field: field_name,
                        type_name: raw_field.type_name,
                    });
                };
                fields.insert(
                    field_name,
                    FieldDef {
                        display_name: raw_field.display_name,
                        field_type,
                        default_value: raw_field.default_value,
                        description: raw_field.description,
                    },
                );
            }
            models.insert(model_name, ModelSchema { fields });
        }

        let schema = Self {
            models,
            views: compile_views(raw.views)?,
        };
        schema.check_views()?;
        tracing::debug!(
            models = schema.models.len(),
            views = schema.views.len(),
            "schema compiled"
        );
        Ok(schema)
    }

    /// Build a schema directly from compiled parts.
    pub fn from_parts(
        models: impl IntoIterator<Item = (String, ModelSchema)>,
        views: Vec<ViewConfig>,
    ) -> Result<Self, SchemaError> {
        let schema = Self {
            models: models.into_iter().collect(),
            views,
        };
        schema.check_views()?;
        Ok(schema)
    }

    fn check_views(&self) -> Result<(), SchemaError> {
        for view in &self.views {
            let report_refs = view
                .reports()
                .into_iter()
                .flat_map(|r| r.dependencies.iter().map(String::as_str));
            for reference in view.field_refs().into_iter().chain(report_refs) {
                let dependency =
                    Dependency::parse(reference).map_err(|source| SchemaError::BadReference {
                        view: view.name.clone(),
                        source,
                    })?;
                if self.field(&dependency).is_none() {
                    return Err(SchemaError::UnknownField {
                        view: view.name.clone(),
                        dependency,
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a model schema.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    /// Whether the schema defines a model.
    #[must_use]
    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Iterate model names in order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Look up the definition of a dependency's field.
    #[must_use]
    pub fn field(&self, dependency: &Dependency) -> Option<&FieldDef> {
        self.models
            .get(dependency.model_name())?
            .field(dependency.field_name())
    }

    /// All views, in document order.
    #[must_use]
    pub fn views(&self) -> &[ViewConfig] {
        &self.views
    }

    /// Look up a view by name.
    #[must_use]
    pub fn view(&self, name: &str) -> Option<&ViewConfig> {
        self.views.iter().find(|v| v.name == name)
    }

    /// A model populated from field defaults. Fields without a default are
    /// left out.
    #[must_use]
    pub fn default_model(&self, name: &str) -> Option<Model> {
        let model = self.models.get(name)?;
        Some(
            model
                .fields()
                .filter_map(|(field, def)| {
                    def.default_value
                        .as_ref()
                        .map(|v| (field.to_string(), v.clone()))
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "types": {
                "Species": { "base": "Enum", "config": { "allowedValues": [["e", "Electron"], ["p", "Proton"]] } }
            },
            "models": {
                "beam": {
                    "current": { "displayName": "Current", "type": "Float", "defaultValue": 1.5 },
                    "species": { "displayName": "Species", "type": "Species", "defaultValue": "e" },
                    "label":   { "displayName": "Label", "type": "OptionalString" }
                },
                "grid": {
                    "nx": { "displayName": "NX", "type": "Integer", "defaultValue": 32 }
                }
            },
            "views": [
                {
                    "name": "beam",
                    "title": "Beam Settings",
                    "basic": [
                        { "layout": "fieldList", "fields": ["beam.current", "beam.species"] },
                        { "layout": "tabs", "tabs": [
                            { "name": "Grid", "items": [
                                { "layout": "fieldTable", "columns": ["x"], "rows": [ { "label": "n", "fields": ["grid.nx"] } ] },
                                { "layout": "autoRunReport", "report": "beamReport", "dependencies": ["grid.nx"] }
                            ] }
                        ] }
                    ],
                    "advanced": [
                        { "layout": "fieldList", "fields": ["beam.label", "beam.current"] }
                    ]
                }
            ]
        })
    }

    #[test]
    fn compiles_models_and_partial_types() {
        let schema = Schema::from_value(sample()).unwrap();
        let species = schema.field(&Dependency::new("beam", "species")).unwrap();
        assert_eq!(species.field_type.enum_entries().len(), 2);
        assert_eq!(
            schema.field(&Dependency::new("grid", "nx")).unwrap().field_type,
            FieldType::Integer { required: true }
        );
        assert_eq!(schema.model_names().collect::<Vec<_>>(), vec!["beam", "grid"]);
    }

    #[test]
    fn form_dependencies_walk_layouts_in_order_without_duplicates() {
        let schema = Schema::from_value(sample()).unwrap();
        let view = schema.view("beam").unwrap();
        let deps: Vec<String> = view
            .form_dependencies()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            deps,
            vec!["beam.current", "beam.species", "grid.nx", "beam.label"]
        );
        assert_eq!(view.title(), "Beam Settings");
    }

    #[test]
    fn reports_are_found_inside_tabs() {
        let schema = Schema::from_value(sample()).unwrap();
        let reports = schema.view("beam").unwrap().reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report, "beamReport");
        assert_eq!(reports[0].dependencies, ["grid.nx".to_string()]);
    }

    #[test]
    fn default_model_uses_declared_defaults() {
        let schema = Schema::from_value(sample()).unwrap();
        let model = schema.default_model("beam").unwrap();
        assert_eq!(model.get("current"), Some(&json!(1.5)));
        assert!(model.get("label").is_none());
        assert!(schema.default_model("nope").is_none());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Schema::from_value(json!({
            "models": { "m": { "f": { "displayName": "F", "type": "Tensor" } } }
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { ref type_name, .. } if type_name == "Tensor"));
    }

    #[test]
    fn dangling_view_reference_is_rejected() {
        let err = Schema::from_value(json!({
            "models": { "m": { "f": { "displayName": "F", "type": "String" } } },
            "views": [ { "name": "v", "basic": [ { "layout": "fieldList", "fields": ["m.g"] } ] } ]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { .. }));

        let err = Schema::from_value(json!({
            "models": { "m": { "f": { "displayName": "F", "type": "String" } } },
            "views": [ { "name": "v", "basic": [ { "layout": "fieldList", "fields": ["f"] } ] } ]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::BadReference { .. }));
    }

    #[test]
    fn keyed_views_with_nested_config_compile() {
        let schema = Schema::from_value(json!({
            "models": {
                "beam": {
                    "current": { "displayName": "Current", "type": "Float" },
                    "species": { "displayName": "Species", "type": "String" }
                }
            },
            "views": {
                "beamSettings": {
                    "title": "Beam",
                    "config": {
                        "basic": [ { "layout": "fieldList", "fields": ["beam.current"] } ],
                        "advanced": [ { "layout": "fieldList", "fields": ["beam.species"] } ]
                    }
                },
                "animation": {
                    "type": "panel",
                    "config": { "basic": [] }
                }
            }
        }))
        .unwrap();

        let names: Vec<&str> = schema.views().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["animation", "beamSettings"]);
        let beam = schema.view("beamSettings").unwrap();
        assert_eq!(beam.title(), "Beam");
        assert_eq!(beam.kind, DEFAULT_VIEW_KIND);
        assert_eq!(beam.field_refs(), vec!["beam.current", "beam.species"]);
        assert_eq!(schema.view("animation").unwrap().title(), "animation");
    }

    #[test]
    fn keyed_views_are_checked_like_listed_ones() {
        let err = Schema::from_value(json!({
            "models": { "m": { "f": { "displayName": "F", "type": "String" } } },
            "views": { "v": { "config": { "basic": [ { "layout": "fieldList", "fields": ["m.g"] } ] } } }
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { ref view, .. } if view == "v"));
    }

    #[test]
    fn malformed_views_are_rejected() {
        let err = Schema::from_value(json!({
            "models": {},
            "views": [ { "title": "Nameless" } ]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::BadView { ref view, .. } if view == "Nameless"));

        let err = Schema::from_value(json!({ "models": {}, "views": "beam" })).unwrap_err();
        assert!(matches!(err, SchemaError::BadView { .. }));
    }
}
