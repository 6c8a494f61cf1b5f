#![forbid(unsafe_code)]

//! Field types: validation and wire serialization rules per scalar kind.
//!
//! Every schema field carries a [`FieldType`]. The set of kinds is closed, so
//! each operation (`check`, `serialize`, `render_hint`) is a single exhaustive
//! `match` rather than a lookup with a fallback.
//!
//! Required and optional variants share their format rules. An optional field
//! additionally accepts an absent value (`null`) or an empty string; a required
//! one rejects both.
//!
//! Numeric kinds validate the *text* of the value with fixed-format patterns
//! instead of a lenient numeric parse, so half-typed input such as `"1e"` or
//! `"12abc"` is rejected. Text that passes the pattern must also parse the way
//! `serialize` parses it (a finite `f64`, an `i64`), so every valid value can be
//! sent. JSON numbers coming from the backend are validated through their
//! textual form.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Number, Value};

// ---------------------------------------------------------------------------
// Error Codes
// ---------------------------------------------------------------------------

/// Error code for a missing or empty required value.
pub const ERROR_CODE_REQUIRED: &str = "required";
/// Error code for text that is not an integer.
pub const ERROR_CODE_INTEGER: &str = "integer";
/// Error code for text that is not a float.
pub const ERROR_CODE_FLOAT: &str = "float";
/// Error code for a value that is not a boolean representation.
pub const ERROR_CODE_BOOLEAN: &str = "boolean";
/// Error code for a value outside an enum's allowed set.
pub const ERROR_CODE_ENUM: &str = "enum";
/// Error code for a value of the wrong JSON shape (array/object).
pub const ERROR_CODE_SHAPE: &str = "shape";

static INTEGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?[0-9]+$").expect("integer pattern compiles")
});

static FLOAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-+]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]+)?\s*$")
        .expect("float pattern compiles")
});

// ---------------------------------------------------------------------------
// ValidationError / ValidationResult
// ---------------------------------------------------------------------------

/// A field-scoped validation failure.
///
/// `code` is a stable identifier for programmatic handling; `message` is a
/// template whose `{key}` placeholders are filled from `params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Stable error code.
    pub code: &'static str,
    /// Human-readable message template.
    pub message: String,
    /// Parameters for message interpolation.
    pub params: HashMap<String, String>,
}

impl ValidationError {
    /// Create a new validation error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            params: HashMap::new(),
        }
    }

    /// Add a parameter for message interpolation.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// Format the message with parameter substitution.
    #[must_use]
    pub fn format_message(&self) -> String {
        let mut result = self.message.clone();
        for (key, value) in &self.params {
            result = result.replace(&format!("{{{key}}}"), value);
        }
        result
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_message())
    }
}

impl std::error::Error for ValidationError {}

/// The outcome of checking a value against a field type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidationResult {
    /// The value is acceptable.
    #[default]
    Valid,
    /// The value is rejected.
    Invalid(ValidationError),
}

impl ValidationResult {
    /// Returns `true` if the result is `Valid`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns the error if the result is `Invalid`.
    #[must_use]
    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            Self::Valid => None,
            Self::Invalid(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// SerializeError
// ---------------------------------------------------------------------------

/// Failure to canonicalize a value for network transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    /// Numeric text could not be parsed (or is not finite).
    NotANumber(String),
    /// Text is not one of the boolean spellings.
    NotABoolean(String),
    /// The value has a shape the type cannot represent.
    Shape {
        /// Name of the field kind.
        kind: &'static str,
        /// The offending value, rendered as JSON.
        value: String,
    },
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotANumber(text) => write!(f, "{text:?} is not a number"),
            Self::NotABoolean(text) => write!(f, "{text:?} is not a boolean"),
            Self::Shape { kind, value } => write!(f, "{kind} field cannot hold {value}"),
        }
    }
}

impl std::error::Error for SerializeError {}

// ---------------------------------------------------------------------------
// Enum entries / file patterns
// ---------------------------------------------------------------------------

/// One allowed value of an enum field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    /// The stored value.
    pub value: String,
    /// Label shown to the user.
    pub display_name: String,
}

impl EnumEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(value: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            display_name: display_name.into(),
        }
    }
}

/// A compiled file-name filter for file fields.
#[derive(Debug, Clone)]
pub struct FilePattern(Regex);

impl FilePattern {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    /// The source pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether a file name passes the filter.
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        !file_name.is_empty() && self.0.is_match(file_name)
    }
}

impl PartialEq for FilePattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for FilePattern {}

/// A backend computation that supplies a field's options at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeSource {
    /// Name of the stateful-compute method to invoke.
    pub method: String,
    /// Key of the option list in the computation's response.
    pub result_name: String,
}

// ---------------------------------------------------------------------------
// Render hints
// ---------------------------------------------------------------------------

/// Which input control a field is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Single-line text box.
    Text,
    /// Checkbox.
    Checkbox,
    /// Drop-down of fixed options.
    Select,
    /// Drop-down of server-side files with upload/download actions.
    FileSelect,
}

/// Horizontal text alignment inside the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// Left-aligned (text).
    Start,
    /// Right-aligned (numbers).
    End,
}

/// The framework-independent part of the rendering contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderHint {
    /// Control kind.
    pub input: InputKind,
    /// Alignment.
    pub align: Align,
    /// Whether the control shows an invalid marker for this value.
    ///
    /// Mirrors the UI rule that errors are shown only once a field is touched.
    pub show_invalid: bool,
}

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// The closed set of field kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Free text.
    String { required: bool },
    /// Floating-point number entered as text.
    Float { required: bool },
    /// Integer entered as text.
    Integer { required: bool },
    /// Boolean flag, transmitted as `"1"`/`"0"`.
    Boolean { required: bool },
    /// Reference to a server-side file by name.
    File {
        required: bool,
        pattern: Option<FilePattern>,
    },
    /// One of a fixed set of values.
    Enum {
        required: bool,
        allowed: Vec<EnumEntry>,
    },
    /// One of a set of values computed by the backend.
    ///
    /// The options are not known when the schema compiles, so validation
    /// only enforces presence.
    StatefulComputeEnum {
        required: bool,
        source: ComputeSource,
    },
}

impl FieldType {
    /// Short name of the kind, for logging and errors.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "String",
            Self::Float { .. } => "Float",
            Self::Integer { .. } => "Integer",
            Self::Boolean { .. } => "Boolean",
            Self::File { .. } => "File",
            Self::Enum { .. } => "Enum",
            Self::StatefulComputeEnum { .. } => "StatefulComputeEnum",
        }
    }

    /// Whether the field demands a non-empty value.
    #[must_use]
    pub fn is_required(&self) -> bool {
        match self {
            Self::String { required }
            | Self::Float { required }
            | Self::Integer { required }
            | Self::Boolean { required }
            | Self::File { required, .. }
            | Self::Enum { required, .. }
            | Self::StatefulComputeEnum { required, .. } => *required,
        }
    }

    /// Validate a raw value. Deterministic; never panics.
    #[must_use]
    pub fn validate(&self, value: &Value) -> bool {
        self.check(value).is_valid()
    }

    /// Validate a raw value, explaining any failure.
    #[must_use]
    pub fn check(&self, value: &Value) -> ValidationResult {
        let Some(text) = value_text(value) else {
            if value.is_null() {
                return self.missing();
            }
            return ValidationResult::Invalid(
                ValidationError::new(ERROR_CODE_SHAPE, "{kind} field cannot hold a {shape}")
                    .with_param("kind", self.kind_name())
                    .with_param("shape", shape_name(value)),
            );
        };

        // JSON `false` renders as "false", so it is never blank here.
        if text.trim().is_empty() {
            return self.missing();
        }

        match self {
            Self::String { .. } | Self::File { .. } | Self::StatefulComputeEnum { .. } => {
                ValidationResult::Valid
            }
            Self::Integer { .. } => {
                if INTEGER_RE.is_match(&text) && parse_integer(&text).is_some() {
                    ValidationResult::Valid
                } else {
                    ValidationResult::Invalid(
                        ValidationError::new(ERROR_CODE_INTEGER, "{value} is not an integer")
                            .with_param("value", &text),
                    )
                }
            }
            Self::Float { .. } => {
                if FLOAT_RE.is_match(&text) && parse_float(text.trim()).is_some() {
                    ValidationResult::Valid
                } else {
                    ValidationResult::Invalid(
                        ValidationError::new(ERROR_CODE_FLOAT, "{value} is not a number")
                            .with_param("value", &text),
                    )
                }
            }
            Self::Boolean { .. } => {
                if parse_bool(value).is_some() {
                    ValidationResult::Valid
                } else {
                    ValidationResult::Invalid(
                        ValidationError::new(ERROR_CODE_BOOLEAN, "{value} is not a boolean")
                            .with_param("value", &text),
                    )
                }
            }
            Self::Enum { allowed, .. } => {
                if allowed.iter().any(|entry| entry.value == text) {
                    ValidationResult::Valid
                } else {
                    ValidationResult::Invalid(
                        ValidationError::new(ERROR_CODE_ENUM, "{value} is not one of {allowed}")
                            .with_param("value", &text)
                            .with_param(
                                "allowed",
                                allowed
                                    .iter()
                                    .map(|e| e.value.as_str())
                                    .collect::<Vec<_>>()
                                    .join(", "),
                            ),
                    )
                }
            }
        }
    }

    fn missing(&self) -> ValidationResult {
        if self.is_required() {
            ValidationResult::Invalid(ValidationError::new(
                ERROR_CODE_REQUIRED,
                "This field is required",
            ))
        } else {
            ValidationResult::Valid
        }
    }

    /// Canonicalize a value for network transmission.
    ///
    /// Booleans become `"1"`/`"0"` (an absent or blank flag is `"0"`), numeric
    /// text becomes a JSON number, and absent or empty numeric values become
    /// `null`. Strings, files and enums pass through unchanged.
    pub fn serialize(&self, value: &Value) -> Result<Value, SerializeError> {
        match self {
            Self::String { .. }
            | Self::File { .. }
            | Self::Enum { .. }
            | Self::StatefulComputeEnum { .. } => Ok(value.clone()),
            Self::Boolean { .. } => {
                let flag = match value_text(value) {
                    None if value.is_null() => false,
                    Some(text) if text.trim().is_empty() => false,
                    None => {
                        return Err(SerializeError::Shape {
                            kind: self.kind_name(),
                            value: value.to_string(),
                        });
                    }
                    Some(text) => parse_bool(value)
                        .ok_or_else(|| SerializeError::NotABoolean(text.into_owned()))?,
                };
                Ok(Value::String(if flag { "1" } else { "0" }.to_string()))
            }
            Self::Float { .. } => {
                let Some(text) = self.numeric_text(value)? else {
                    return Ok(Value::Null);
                };
                parse_float(&text)
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| SerializeError::NotANumber(text.to_string()))
            }
            Self::Integer { .. } => {
                let Some(text) = self.numeric_text(value)? else {
                    return Ok(Value::Null);
                };
                parse_integer(&text)
                    .map(|n| Value::Number(n.into()))
                    .ok_or_else(|| SerializeError::NotANumber(text.to_string()))
            }
        }
    }

    fn numeric_text<'v>(&self, value: &'v Value) -> Result<Option<Cow<'v, str>>, SerializeError> {
        match value_text(value) {
            Some(text) if text.trim().is_empty() => Ok(None),
            Some(text) => Ok(Some(match text {
                Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
                Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
            })),
            None if value.is_null() => Ok(None),
            None => Err(SerializeError::Shape {
                kind: self.kind_name(),
                value: value.to_string(),
            }),
        }
    }

    /// Rendering hint for a field in the given state.
    #[must_use]
    pub fn render_hint(&self, valid: bool, touched: bool) -> RenderHint {
        let (input, align) = match self {
            Self::String { .. } => (InputKind::Text, Align::Start),
            Self::Float { .. } | Self::Integer { .. } => (InputKind::Text, Align::End),
            Self::Boolean { .. } => (InputKind::Checkbox, Align::Start),
            Self::File { .. } => (InputKind::FileSelect, Align::Start),
            Self::Enum { .. } | Self::StatefulComputeEnum { .. } => (InputKind::Select, Align::Start),
        };
        RenderHint {
            input,
            align,
            show_invalid: !valid && touched,
        }
    }

    /// The file-name filter, for file fields that declare one.
    #[must_use]
    pub fn file_pattern(&self) -> Option<&FilePattern> {
        match self {
            Self::File { pattern, .. } => pattern.as_ref(),
            _ => None,
        }
    }

    /// The allowed entries, for enum fields.
    #[must_use]
    pub fn enum_entries(&self) -> &[EnumEntry] {
        match self {
            Self::Enum { allowed, .. } => allowed,
            _ => &[],
        }
    }

    /// Where the options come from, for backend-computed enums.
    #[must_use]
    pub fn compute_source(&self) -> Option<&ComputeSource> {
        match self {
            Self::StatefulComputeEnum { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Textual form of a scalar value; `None` for null, arrays and objects.
#[must_use]
pub fn value_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// A finite float; overflow to infinity is a failure.
fn parse_float(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_integer(text: &str) -> Option<i64> {
    text.parse().ok()
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "list",
        Value::Object(_) => "record",
        _ => "scalar",
    }
}
