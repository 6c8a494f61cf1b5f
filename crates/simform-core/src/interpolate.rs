#![forbid(unsafe_code)]

//! `$(model.field)` substitution in display strings.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::dependency::{Dependency, DependencyError};
use crate::field_type::value_text;
use crate::model_store::ModelStore;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([^)]+)\)").expect("placeholder pattern compiles"));

/// Errors raised while interpolating a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpolateError {
    /// A placeholder is not `"model.field"`.
    Dependency(DependencyError),
    /// A placeholder names a model or field with no canonical value.
    Missing(Dependency),
}

impl fmt::Display for InterpolateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependency(e) => write!(f, "{e}"),
            Self::Missing(d) => write!(f, "no value for $({d})"),
        }
    }
}

impl std::error::Error for InterpolateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dependency(e) => Some(e),
            Self::Missing(_) => None,
        }
    }
}

/// The dependencies a template reads, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<Dependency>, DependencyError> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| Dependency::parse(&caps[1]))
        .collect()
}

/// Replace every `$(model.field)` with the field's canonical value.
///
/// `null` renders as an empty string; arrays and records render as JSON.
pub fn interpolate(template: &str, models: &ModelStore) -> Result<String, InterpolateError> {
    let mut failure = None;
    let out = PLACEHOLDER_RE.replace_all(template, |caps: &Captures<'_>| {
        if failure.is_some() {
            return String::new();
        }
        let dependency = match Dependency::parse(&caps[1]) {
            Ok(d) => d,
            Err(e) => {
                failure = Some(InterpolateError::Dependency(e));
                return String::new();
            }
        };
        match models.field_value(&dependency) {
            Some(value) if value.is_null() => String::new(),
            Some(value) => value_text(value)
                .map_or_else(|| value.to_string(), |t| t.into_owned()),
            None => {
                failure = Some(InterpolateError::Missing(dependency));
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}
