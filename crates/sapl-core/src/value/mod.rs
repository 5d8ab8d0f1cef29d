//! Immutable tagged values.
//!
//! Every [`Value`] pairs a [`ValueKind`] with [`ValueMetadata`] describing
//! the attribute lookups it was derived from. Containers share their
//! children through `Arc`, so "modifying" a value rebuilds only the path
//! that changed.

mod json;
mod metadata;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::SourceLocation;

pub use metadata::{AttributeRecord, ValueMetadata};

/// Ordered key/value content of an object value.
pub type ObjectMap = IndexMap<String, Value>;

/// An error travelling through the value tree as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl ErrorValue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    pub fn at(location: &SourceLocation, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: Some(location.clone()),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "ERROR[{} at {location}]", self.message),
            None => write!(f, "ERROR[{}]", self.message),
        }
    }
}

/// The closed set of value variants.
#[derive(Debug, Clone)]
pub enum ValueKind {
    Undefined,
    Null,
    Error(ErrorValue),
    Boolean(bool),
    Number(f64),
    Text(Arc<str>),
    Array(Arc<Vec<Value>>),
    Object(Arc<ObjectMap>),
}

#[derive(Clone)]
pub struct Value {
    kind: ValueKind,
    metadata: ValueMetadata,
}

impl Value {
    pub const UNDEFINED: Value = Value::constant(ValueKind::Undefined);
    pub const NULL: Value = Value::constant(ValueKind::Null);
    pub const TRUE: Value = Value::constant(ValueKind::Boolean(true));
    pub const FALSE: Value = Value::constant(ValueKind::Boolean(false));

    const fn constant(kind: ValueKind) -> Self {
        Self {
            kind,
            metadata: ValueMetadata::EMPTY,
        }
    }

    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            metadata: ValueMetadata::default(),
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn boolean(value: bool) -> Self {
        Self::new(ValueKind::Boolean(value))
    }

    pub fn number(value: impl Into<f64>) -> Self {
        Self::new(ValueKind::Number(value.into()))
    }

    pub fn text(value: impl Into<Arc<str>>) -> Self {
        Self::new(ValueKind::Text(value.into()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(Arc::new(values)))
    }

    pub fn empty_array() -> Self {
        Self::array(Vec::new())
    }

    pub fn object(entries: ObjectMap) -> Self {
        Self::new(ValueKind::Object(Arc::new(entries)))
    }

    pub fn empty_object() -> Self {
        Self::object(ObjectMap::new())
    }

    /// Object from `(key, value)` pairs; later duplicates replace earlier ones.
    pub fn object_from<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ValueKind::Error(ErrorValue::new(message)))
    }

    pub fn error_at(location: &SourceLocation, message: impl Into<String>) -> Self {
        Self::new(ValueKind::Error(ErrorValue::at(location, message)))
    }

    pub fn from_error(error: ErrorValue) -> Self {
        Self::new(ValueKind::Error(error))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    #[must_use]
    pub fn metadata(&self) -> &ValueMetadata {
        &self.metadata
    }

    pub fn into_parts(self) -> (ValueKind, ValueMetadata) {
        (self.kind, self.metadata)
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self.kind, ValueKind::Undefined)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.kind, ValueKind::Error(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Boolean(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            ValueKind::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Integral numbers only, as used by index and slice steps.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Some(n as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match &self.kind {
            ValueKind::Array(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectMap> {
        match &self.kind {
            ValueKind::Object(entries) => Some(entries),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error(&self) -> Option<&ErrorValue> {
        match &self.kind {
            ValueKind::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Field lookup on object values.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|entries| entries.get(key))
    }

    /// Type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Error(_) => "error",
            ValueKind::Boolean(_) => "boolean",
            ValueKind::Number(_) => "number",
            ValueKind::Text(_) => "text",
            ValueKind::Array(_) => "array",
            ValueKind::Object(_) => "object",
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    #[must_use]
    pub fn with_metadata(mut self, metadata: ValueMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds the provenance of `other` to this value.
    #[must_use]
    pub fn merge_metadata(mut self, other: &ValueMetadata) -> Self {
        self.metadata = self.metadata.merge(other);
        self
    }

    #[must_use]
    pub fn with_record(mut self, record: AttributeRecord) -> Self {
        self.metadata = self.metadata.with_record(record);
        self
    }

    /// Error values without a location pick up the given one.
    #[must_use]
    pub fn locate_error(self, location: &SourceLocation) -> Self {
        match self.kind {
            ValueKind::Error(ErrorValue {
                message,
                location: None,
            }) => Self {
                kind: ValueKind::Error(ErrorValue::at(location, message)),
                metadata: self.metadata,
            },
            kind => Self {
                kind,
                metadata: self.metadata,
            },
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (ValueKind::Undefined, ValueKind::Undefined) | (ValueKind::Null, ValueKind::Null) => {
                true
            }
            (ValueKind::Error(a), ValueKind::Error(b)) => a == b,
            (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a == b,
            (ValueKind::Number(a), ValueKind::Number(b)) => a == b,
            (ValueKind::Text(a), ValueKind::Text(b)) => a == b,
            (ValueKind::Array(a), ValueKind::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            (ValueKind::Object(a), ValueKind::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::array(values)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValueKind::Undefined => f.write_str("undefined"),
            ValueKind::Error(error) => write!(f, "{error}"),
            ValueKind::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            ValueKind::Object(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{value}", serde_json::Value::String(key.clone()))?;
                }
                f.write_str("}")
            }
            _ => write!(f, "{}", self.to_json()),
        }
    }
}
