#![forbid(unsafe_code)]

//! Structured references to a single field of a named model.
//!
//! Schemas and report configs refer to fields with dotted strings such as
//! `"beamSettings.current"`. [`Dependency::parse`] splits such a reference on
//! its first `.` into a model name and a field name. Parsing never checks that
//! the model or field exists; that happens when the reference is resolved
//! against a compiled [`Schema`](crate::schema::Schema).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors produced while parsing a `"model.field"` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// The reference has no `.` separator.
    MissingSeparator(String),
    /// The model part before the first `.` is empty.
    EmptyModel(String),
    /// The field part after the first `.` is empty.
    EmptyField(String),
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSeparator(r) => {
                write!(f, "dependency {r:?} is not of the form \"model.field\"")
            }
            Self::EmptyModel(r) => write!(f, "dependency {r:?} has an empty model name"),
            Self::EmptyField(r) => write!(f, "dependency {r:?} has an empty field name"),
        }
    }
}

impl std::error::Error for DependencyError {}

/// A pointer to one field within one model.
///
/// Immutable once parsed. Ordering is by model name, then field name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dependency {
    model_name: String,
    field_name: String,
}

impl Dependency {
    /// Build a dependency from its parts.
    #[must_use]
    pub fn new(model_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            field_name: field_name.into(),
        }
    }

    /// Parse a `"model.field"` reference, splitting on the first `.`.
    ///
    /// Everything after the first separator belongs to the field name, so
    /// `"a.b.c"` parses as model `a`, field `b.c`.
    pub fn parse(reference: &str) -> Result<Self, DependencyError> {
        let Some((model, field)) = reference.split_once('.') else {
            return Err(DependencyError::MissingSeparator(reference.to_string()));
        };
        if model.is_empty() {
            return Err(DependencyError::EmptyModel(reference.to_string()));
        }
        if field.is_empty() {
            return Err(DependencyError::EmptyField(reference.to_string()));
        }
        Ok(Self::new(model, field))
    }

    /// The model this field belongs to.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// The field within the model.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model_name, self.field_name)
    }
}

impl FromStr for Dependency {
    type Err = DependencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Dependency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dependency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_and_field() {
        let dep = Dependency::parse("beamSettings.current").unwrap();
        assert_eq!(dep.model_name(), "beamSettings");
        assert_eq!(dep.field_name(), "current");
    }

    #[test]
    fn splits_on_first_dot_only() {
        let dep = Dependency::parse("lattice.elements.0").unwrap();
        assert_eq!(dep.model_name(), "lattice");
        assert_eq!(dep.field_name(), "elements.0");
    }

    #[test]
    fn reference_without_dot_is_rejected() {
        assert_eq!(
            Dependency::parse("current"),
            Err(DependencyError::MissingSeparator("current".into()))
        );
    }

    #[test]
    fn empty_parts_are_rejected() {
        assert!(matches!(
            Dependency::parse(".current"),
            Err(DependencyError::EmptyModel(_))
        ));
        assert!(matches!(
            Dependency::parse("beam."),
            Err(DependencyError::EmptyField(_))
        ));
    }

    #[test]
    fn display_matches_reference_form() {
        let dep: Dependency = "beam.energy".parse().unwrap();
        assert_eq!(dep.to_string(), "beam.energy");
    }

    #[test]
    fn deserializes_from_string() {
        let deps: Vec<Dependency> =
            serde_json::from_str(r#"["a.x", "b.y"]"#).unwrap();
        assert_eq!(deps, vec![Dependency::new("a", "x"), Dependency::new("b", "y")]);
        assert!(serde_json::from_str::<Dependency>(r#""nodot""#).is_err());
    }
}
