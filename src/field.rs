//! Field descriptors: typed, named, validated settings slots.
//!
//! A [`Field`] holds no per-instance state. It describes how a raw value is
//! converted and checked before a [`Settings`](crate::Settings) container stores
//! it, and how the stored value is read back:
//!
//! ```text
//! raw ──(str? converter chain)──> value ──(choices | types + validators)──> stored
//! stored | default | composed ──(transform chain)──> read
//! ```
//!
//! Derived fields are read-only and compose their value from other fields,
//! either as a mapping (`keys`) or an ordered list (`sequence`).

use crate::error::{Result, SettingsError};
use crate::value::{FieldValue, TransformInput, ValueType, describe_types, is_upper_name};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// String-to-value conversion step. Only applied when the raw value is a string;
/// each step receives its predecessor's output.
pub type Converter = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// Post-processing step applied to a field's value on every read.
pub type Transform = Arc<dyn Fn(TransformInput) -> anyhow::Result<Value> + Send + Sync>;

/// A named predicate checked against every assigned value.
#[derive(Clone)]
pub struct Validator {
    name: String,
    check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl Validator {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, value: &Value) -> bool {
        (self.check)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.name)
    }
}

/// How a derived field assembles its value from other fields.
#[derive(Debug, Clone, Default)]
pub struct Composition {
    /// Output key → referenced field name.
    keys: Option<Vec<(String, String)>>,
    /// Referenced field names, in output order.
    sequence: Option<Vec<String>>,
}

impl Composition {
    /// Names of every field this composition reads.
    pub fn referenced(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(ref keys) = self.keys {
            names.extend(keys.iter().map(|(_, field)| field.as_str()));
        }
        if let Some(ref sequence) = self.sequence {
            names.extend(sequence.iter().map(String::as_str));
        }
        names
    }

    fn check(&self) -> Result<()> {
        let has_keys = self.keys.as_ref().is_some_and(|k| !k.is_empty());
        let has_sequence = self.sequence.as_ref().is_some_and(|s| !s.is_empty());
        if has_keys == has_sequence {
            return Err(SettingsError::configuration(
                "At least and only one of `keys` or `sequence` parameter should be specified",
            ));
        }
        Ok(())
    }
}

/// Declaration of one settings field.
#[derive(Clone)]
pub struct Field {
    name: String,
    types: Option<Vec<ValueType>>,
    choices: Vec<Value>,
    default: FieldValue,
    validators: Vec<Validator>,
    converters: Vec<Converter>,
    transforms: Vec<Transform>,
    composition: Option<Composition>,
}

impl Field {
    /// Declare a plain field. Its types must be set before `pre_validate` passes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: None,
            choices: Vec::new(),
            default: FieldValue::Undefined,
            validators: Vec::new(),
            converters: Vec::new(),
            transforms: Vec::new(),
            composition: None,
        }
    }

    /// Declare a read-only field composed from other fields.
    pub fn derived(name: impl Into<String>) -> Self {
        Self {
            composition: Some(Composition::default()),
            ..Self::new(name)
        }
    }

    pub fn types(mut self, types: impl IntoIterator<Item = ValueType>) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    /// Accept values of any runtime type.
    pub fn any_type(mut self) -> Self {
        self.types = Some(Vec::new());
        self
    }

    pub fn choices<V: Into<Value>>(mut self, choices: impl IntoIterator<Item = V>) -> Self {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = FieldValue::Value(value.into());
        self
    }

    pub fn validator<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validators.push(Validator::new(name, check));
        self
    }

    pub fn converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.converters.push(Arc::new(convert));
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(TransformInput) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Compose this derived field as a mapping of `output key → field name`.
    pub fn keys<K, F>(mut self, keys: impl IntoIterator<Item = (K, F)>) -> Self
    where
        K: Into<String>,
        F: Into<String>,
    {
        let keys = keys.into_iter().map(|(k, f)| (k.into(), f.into())).collect();
        self.composition.get_or_insert_with(Composition::default).keys = Some(keys);
        self
    }

    /// Compose this derived field as an ordered list of field values.
    pub fn sequence<F: Into<String>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        let fields = fields.into_iter().map(Into::into).collect();
        self.composition.get_or_insert_with(Composition::default).sequence = Some(fields);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_types(&self) -> Option<&[ValueType]> {
        self.types.as_deref()
    }

    pub fn declared_choices(&self) -> &[Value] {
        &self.choices
    }

    pub fn declared_default(&self) -> &FieldValue {
        &self.default
    }

    pub fn is_derived(&self) -> bool {
        self.composition.is_some()
    }

    pub fn composition(&self) -> Option<&Composition> {
        self.composition.as_ref()
    }

    /// Run the converter chain if `value` is a string; other values pass through.
    pub fn convert(&self, value: Value) -> Result<Value> {
        if !value.is_string() {
            return Ok(value);
        }
        self.converters
            .iter()
            .try_fold(value, |acc, convert| convert(acc))
            .map_err(|e| SettingsError::conversion(&self.name, e))
    }

    /// Check an already-converted value against choices, or types then validators.
    pub fn check(&self, value: &Value) -> Result<()> {
        if !self.choices.is_empty() {
            if !self.choices.contains(value) {
                return Err(SettingsError::validation(
                    &self.name,
                    format!(
                        "Value of {} property should be equal to any of {}",
                        self.name,
                        join_values(&self.choices)
                    ),
                ));
            }
            return Ok(());
        }

        if let Some(ref types) = self.types
            && !types.is_empty()
            && !ValueType::matches_any(types, value)
        {
            return Err(SettingsError::validation(
                &self.name,
                format!(
                    "Value of {} property should be any of {} types",
                    self.name,
                    describe_types(types)
                ),
            )
            .with_details(format!("got {}", ValueType::of(value))));
        }

        for validator in &self.validators {
            if !validator.check(value) {
                return Err(SettingsError::validation(
                    &self.name,
                    format!(
                        "Property {} falls validation on {}",
                        self.name,
                        validator.name()
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Convert and check a raw value, yielding what should be stored.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if self.is_derived() {
            return Err(SettingsError::read_only(&self.name));
        }
        let value = self.convert(value)?;
        self.check(&value)?;
        Ok(value)
    }

    /// Apply the transform chain to a value.
    pub fn apply_transforms(&self, value: Value) -> Result<Value> {
        self.transforms
            .iter()
            .try_fold(value, |acc, transform| {
                transform(TransformInput::from_value(acc))
            })
            .map_err(|e| SettingsError::conversion(&self.name, e))
    }

    /// Resolve the readable value of this field.
    ///
    /// `stored` is the container's current value for a plain field; `lookup`
    /// resolves referenced fields for a derived one. Undefined values are
    /// returned as-is without running transforms.
    pub fn resolve<F>(&self, stored: Option<&Value>, lookup: F) -> Result<FieldValue>
    where
        F: Fn(&str) -> Result<FieldValue>,
    {
        let value = match self.composition {
            Some(ref composition) => match compose(composition, lookup)? {
                Some(value) => value,
                None => return Ok(FieldValue::Undefined),
            },
            None => match stored {
                Some(value) => value.clone(),
                None => match self.default {
                    FieldValue::Value(ref value) => value.clone(),
                    FieldValue::Undefined => return Ok(FieldValue::Undefined),
                },
            },
        };
        self.apply_transforms(value).map(FieldValue::Value)
    }

    /// Declaration-time checks, run by `pre_validate` before any data is loaded.
    pub(crate) fn validate_declaration(&self) -> Result<()> {
        if !is_upper_name(&self.name) {
            return Err(SettingsError::configuration(format!(
                "Field name {} should be uppercase",
                self.name
            ))
            .with_field(&self.name));
        }

        if let Some(ref composition) = self.composition {
            return composition
                .check()
                .map_err(|e| e.with_field(&self.name));
        }

        self.validate_types()?;
        self.validate_choices()?;
        self.validate_default()
    }

    fn validate_types(&self) -> Result<()> {
        if self.types.is_none() {
            return Err(SettingsError::configuration(format!(
                "Types should be specified on {} property",
                self.name
            ))
            .with_field(&self.name));
        }
        Ok(())
    }

    fn validate_choices(&self) -> Result<()> {
        let types = self.types.as_deref().unwrap_or_default();
        for choice in &self.choices {
            if !types.is_empty() && !ValueType::matches_any(types, choice) {
                return Err(SettingsError::configuration(format!(
                    "Choices values of {} property should be any of {} types",
                    self.name,
                    describe_types(types)
                ))
                .with_field(&self.name));
            }
            if !self.validators.iter().all(|v| v.check(choice)) {
                return Err(SettingsError::configuration(format!(
                    "Choices values of {} property falls validation",
                    self.name
                ))
                .with_field(&self.name));
            }
        }
        Ok(())
    }

    fn validate_default(&self) -> Result<()> {
        let FieldValue::Value(ref default) = self.default else {
            return Ok(());
        };

        if !self.choices.is_empty() && !self.choices.contains(default) {
            return Err(SettingsError::configuration(format!(
                "Default value of {} property should be any of {} choices",
                self.name,
                join_values(&self.choices)
            ))
            .with_field(&self.name));
        }

        let types = self.types.as_deref().unwrap_or_default();
        if self.choices.is_empty() && !types.is_empty() && !ValueType::matches_any(types, default)
        {
            return Err(SettingsError::configuration(format!(
                "Default value of {} property should be any of {} types",
                self.name,
                describe_types(types)
            ))
            .with_field(&self.name));
        }

        for validator in &self.validators {
            if !validator.check(default) {
                return Err(SettingsError::configuration(format!(
                    "Default value of {} property fall validation on {}",
                    self.name,
                    validator.name()
                ))
                .with_field(&self.name));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("types", &self.types)
            .field("choices", &self.choices)
            .field("default", &self.default)
            .field("validators", &self.validators)
            .field("converters", &self.converters.len())
            .field("transforms", &self.transforms.len())
            .field("composition", &self.composition)
            .finish()
    }
}

/// Assemble a derived value; `None` if any referenced field is still undefined.
fn compose<F>(composition: &Composition, lookup: F) -> Result<Option<Value>>
where
    F: Fn(&str) -> Result<FieldValue>,
{
    composition.check()?;

    if let Some(ref keys) = composition.keys
        && !keys.is_empty()
    {
        let mut map = Map::new();
        for (key, field) in keys {
            match lookup(field)? {
                FieldValue::Value(value) => {
                    map.insert(key.clone(), value);
                }
                FieldValue::Undefined => return Ok(None),
            }
        }
        return Ok(Some(Value::Object(map)));
    }

    let mut items = Vec::new();
    for field in composition.sequence.iter().flatten() {
        match lookup(field)? {
            FieldValue::Value(value) => items.push(value),
            FieldValue::Undefined => return Ok(None),
        }
    }
    Ok(Some(Value::Array(items)))
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn no_lookup(_: &str) -> Result<FieldValue> {
        Ok(FieldValue::Undefined)
    }

    #[test]
    fn test_converters_only_run_on_strings() {
        let field = Field::new("INT")
            .types([ValueType::Int])
            .converter(|v| Ok(json!(v.as_str().unwrap_or_default().parse::<i64>()?)));

        assert_eq!(field.coerce(json!("5")).unwrap(), json!(5));
        assert_eq!(field.coerce(json!(5)).unwrap(), json!(5));
    }

    #[test]
    fn test_converter_chain_feeds_forward() {
        let field = Field::new("WORDS")
            .types([ValueType::List])
            .converter(|v| Ok(json!(v.as_str().unwrap_or_default().to_lowercase())))
            .converter(|v| {
                let s = v.as_str().unwrap_or_default();
                Ok(json!(s.split(',').collect::<Vec<_>>()))
            });

        assert_eq!(field.coerce(json!("A,B")).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn test_converter_failure_is_conversion_error() {
        let field = Field::new("INT")
            .types([ValueType::Int])
            .converter(|v| Ok(json!(v.as_str().unwrap_or_default().parse::<i64>()?)));

        let err = field.coerce(json!("five")).unwrap_err();
        assert_eq!(err.code, ErrorCode::Conversion);
        assert_eq!(err.field.as_deref(), Some("INT"));
    }

    #[test]
    fn test_choices_supersede_types() {
        let field = Field::new("MODE")
            .types([ValueType::Int])
            .choices(["fast", "slow"]);

        assert!(field.coerce(json!("fast")).is_ok());
        let err = field.coerce(json!("medium")).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(err.message.contains("fast, slow"));
        assert!(field.coerce(json!(1)).is_err());
    }

    #[test]
    fn test_types_then_validators() {
        let field = Field::new("PORT")
            .types([ValueType::Int])
            .validator("positive", |v| v.as_i64().is_some_and(|n| n > 0));

        assert!(field.coerce(json!(8080)).is_ok());
        let err = field.coerce(json!("8080")).unwrap_err();
        assert!(err.message.contains("types"));
        let err = field.coerce(json!(-1)).unwrap_err();
        assert!(err.message.contains("positive"));
    }

    #[test]
    fn test_unconstrained_types_accept_anything() {
        let field = Field::new("ANY").any_type();
        assert!(field.coerce(json!({"nested": [1, 2]})).is_ok());
        assert!(field.validate_declaration().is_ok());
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let field = Field::new("NAME").types([ValueType::Str]).default("anon");
        assert_eq!(field.resolve(None, no_lookup).unwrap(), json!("anon"));
        assert_eq!(
            field.resolve(Some(&json!("bob")), no_lookup).unwrap(),
            json!("bob")
        );

        let required = Field::new("TOKEN").types([ValueType::Str]);
        assert!(required.resolve(None, no_lookup).unwrap().is_undefined());
    }

    #[test]
    fn test_transform_spreads_list_and_map() {
        let field = Field::new("PAIR")
            .types([ValueType::List])
            .transform(|input| {
                let a = input.arg(0).and_then(Value::as_i64).unwrap_or_default();
                let b = input.arg(1).and_then(Value::as_i64).unwrap_or_default();
                Ok(json!({"sum": a + b}))
            })
            .transform(|input| Ok(input.kwarg("sum").cloned().unwrap_or(Value::Null)))
            .transform(|input| match input {
                TransformInput::Single(v) => Ok(json!(v.as_i64().unwrap_or_default() * 10)),
                other => Ok(other.into_value()),
            });

        assert_eq!(
            field.resolve(Some(&json!([2, 3])), no_lookup).unwrap(),
            json!(50)
        );
    }

    #[test]
    fn test_derived_keys_and_sequence() {
        let lookup = |name: &str| -> Result<FieldValue> {
            Ok(match name {
                "HOST" => json!("localhost").into(),
                "PORT" => json!(5432).into(),
                _ => FieldValue::Undefined,
            })
        };

        let by_keys = Field::derived("DB").keys([("host", "HOST"), ("port", "PORT")]);
        assert_eq!(
            by_keys.resolve(None, lookup).unwrap(),
            json!({"host": "localhost", "port": 5432})
        );

        let by_seq = Field::derived("ADDR").sequence(["HOST", "PORT"]);
        assert_eq!(
            by_seq.resolve(None, lookup).unwrap(),
            json!(["localhost", 5432])
        );

        let missing = Field::derived("PARTIAL").sequence(["HOST", "USER"]);
        assert!(missing.resolve(None, lookup).unwrap().is_undefined());
    }

    #[test]
    fn test_derived_needs_exactly_one_composition() {
        let neither = Field::derived("NONE");
        assert_eq!(
            neither.resolve(None, no_lookup).unwrap_err().code,
            ErrorCode::Configuration
        );
        assert!(neither.validate_declaration().is_err());

        let both = Field::derived("BOTH").keys([("a", "A")]).sequence(["A"]);
        assert_eq!(
            both.validate_declaration().unwrap_err().code,
            ErrorCode::Configuration
        );
    }

    #[test]
    fn test_derived_is_read_only() {
        let field = Field::derived("DB").sequence(["HOST"]);
        assert_eq!(field.coerce(json!("x")).unwrap_err().code, ErrorCode::ReadOnly);
    }

    #[test]
    fn test_declaration_requires_types() {
        let err = Field::new("UNTYPED").validate_declaration().unwrap_err();
        assert_eq!(err.code, ErrorCode::Configuration);
        assert!(err.message.contains("UNTYPED"));
    }

    #[test]
    fn test_declaration_rejects_lowercase_name() {
        let err = Field::new("debug")
            .types([ValueType::Bool])
            .validate_declaration()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Configuration);
    }

    #[test]
    fn test_declaration_checks_choices_and_default() {
        let bad_choice = Field::new("LEVEL")
            .types([ValueType::Int])
            .choices(["high"]);
        assert!(bad_choice.validate_declaration().is_err());

        let bad_default = Field::new("LEVEL")
            .types([ValueType::Str])
            .choices(["high", "low"])
            .default("mid");
        assert!(bad_default.validate_declaration().is_err());

        let bad_type_default = Field::new("COUNT").types([ValueType::Int]).default("3");
        assert!(bad_type_default.validate_declaration().is_err());

        let failing_validator = Field::new("COUNT")
            .types([ValueType::Int])
            .validator("small", |v| v.as_i64().is_some_and(|n| n < 10))
            .default(42);
        let err = failing_validator.validate_declaration().unwrap_err();
        assert!(err.message.contains("small"));

        let ok = Field::new("LEVEL")
            .types([ValueType::Str])
            .choices(["high", "low"])
            .default("low");
        assert!(ok.validate_declaration().is_ok());
    }
}
