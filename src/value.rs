//! Dynamic values carried through sources, fields and snapshots.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Flat name → value mapping produced by sources and consumed by `Settings::update`.
///
/// Keeps insertion order, so keys are applied in the order a source yields them.
pub type ValueMap = Map<String, Value>;

/// Runtime type of a [`Value`], used for field type constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Null,
    Bool,
    /// Integral number.
    Int,
    /// Non-integral number.
    Float,
    Str,
    List,
    Map,
}

impl ValueType {
    /// Runtime type of the given value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueType::Int,
            Value::Number(_) => ValueType::Float,
            Value::String(_) => ValueType::Str,
            Value::Array(_) => ValueType::List,
            Value::Object(_) => ValueType::Map,
        }
    }

    /// Check whether the value's runtime type is any of `types`.
    pub fn matches_any(types: &[ValueType], value: &Value) -> bool {
        types.contains(&Self::of(value))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Null => write!(f, "null"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Str => write!(f, "str"),
            ValueType::List => write!(f, "list"),
            ValueType::Map => write!(f, "map"),
        }
    }
}

/// Format a type set as `(str, null)` for error messages.
pub(crate) fn describe_types(types: &[ValueType]) -> String {
    let names: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("({})", names.join(", "))
}

/// Current value of a field: either a real value or the `Undefined` sentinel.
///
/// `Undefined` means no source ever supplied a value and no default was declared.
/// It is distinct from `Value(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Undefined,
    Value(Value),
}

impl FieldValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, FieldValue::Undefined)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Undefined => None,
            FieldValue::Value(v) => Some(v),
        }
    }

    pub fn into_option(self) -> Option<Value> {
        match self {
            FieldValue::Undefined => None,
            FieldValue::Value(v) => Some(v),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<Option<Value>> for FieldValue {
    fn from(value: Option<Value>) -> Self {
        value.map_or(FieldValue::Undefined, FieldValue::Value)
    }
}

impl PartialEq<Value> for FieldValue {
    fn eq(&self, other: &Value) -> bool {
        self.as_value() == Some(other)
    }
}

/// Arguments handed to a transform, shaped after the value being transformed.
///
/// Sequences are spread as positional arguments, mappings as keyword arguments,
/// anything else is passed as a single argument.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformInput {
    Positional(Vec<Value>),
    Keyword(Map<String, Value>),
    Single(Value),
}

impl TransformInput {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => TransformInput::Positional(items),
            Value::Object(map) => TransformInput::Keyword(map),
            other => TransformInput::Single(other),
        }
    }

    /// Positional argument at `index`, if the input is positional.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        match self {
            TransformInput::Positional(items) => items.get(index),
            _ => None,
        }
    }

    /// Keyword argument `name`, if the input is a mapping.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        match self {
            TransformInput::Keyword(map) => map.get(name),
            _ => None,
        }
    }

    /// Reassemble the input into a plain value.
    pub fn into_value(self) -> Value {
        match self {
            TransformInput::Positional(items) => Value::Array(items),
            TransformInput::Keyword(map) => Value::Object(map),
            TransformInput::Single(value) => value,
        }
    }
}

/// True if every cased character in `name` is uppercase and at least one exists.
///
/// `USE_YAML` and `HOST_2` qualify; `Debug`, `_` and `123` do not.
pub fn is_upper_name(name: &str) -> bool {
    let mut cased = false;
    for c in name.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}
