//! Stock converters and field presets for common setting shapes.

use crate::field::Field;
use crate::value::ValueType;
use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};

fn as_str(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("expected a string, got {}", ValueType::of(value)))
}

/// Parse a string as a signed integer.
pub fn to_int(value: Value) -> Result<Value> {
    let s = as_str(&value)?;
    let n: i64 = s
        .parse()
        .with_context(|| format!("invalid literal for int: '{}'", s))?;
    Ok(json!(n))
}

/// Parse a string as a float.
pub fn to_float(value: Value) -> Result<Value> {
    let s = as_str(&value)?;
    let n: f64 = s
        .parse()
        .with_context(|| format!("could not convert string to float: '{}'", s))?;
    if !n.is_finite() {
        bail!("non-finite float not supported: '{}'", s);
    }
    Ok(json!(n))
}

/// Parse `true`/`false` (any case) or an integer, where non-zero is true.
pub fn to_bool(value: Value) -> Result<Value> {
    let s = as_str(&value)?;
    match s.to_lowercase().as_str() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => {
            let n: i64 = s
                .parse()
                .with_context(|| format!("invalid literal for bool: '{}'", s))?;
            Ok(Value::Bool(n != 0))
        }
    }
}

/// Split a string on `delimiter` into a list of strings.
pub fn split(delimiter: impl Into<String>) -> impl Fn(Value) -> Result<Value> + Send + Sync {
    let delimiter = delimiter.into();
    move |value| {
        let s = as_str(&value)?;
        Ok(Value::Array(
            s.split(delimiter.as_str())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ))
    }
}

/// Parse comma-separated `host:port` pairs into `[[host, port], ...]`.
pub fn host_list(value: Value) -> Result<Value> {
    let s = as_str(&value)?;
    let mut hosts = Vec::new();
    for pair in s.split(',') {
        let Some((host, port)) = pair.split_once(':') else {
            bail!("host '{}' has no port", pair);
        };
        let port: i64 = port
            .parse()
            .with_context(|| format!("invalid port in '{}'", pair))?;
        hosts.push(json!([host, port]));
    }
    Ok(Value::Array(hosts))
}

pub fn lowercase(value: Value) -> Result<Value> {
    Ok(Value::String(as_str(&value)?.to_lowercase()))
}

pub fn uppercase(value: Value) -> Result<Value> {
    Ok(Value::String(as_str(&value)?.to_uppercase()))
}

impl Field {
    /// A string field.
    pub fn string(name: impl Into<String>) -> Self {
        Field::new(name).types([ValueType::Str])
    }

    /// An integer field; strings are parsed.
    pub fn int(name: impl Into<String>) -> Self {
        Field::new(name).types([ValueType::Int]).converter(to_int)
    }

    /// A float field; strings are parsed.
    pub fn float(name: impl Into<String>) -> Self {
        Field::new(name).types([ValueType::Float]).converter(to_float)
    }

    /// A boolean field accepting `true`/`false` or numeric strings.
    pub fn boolean(name: impl Into<String>) -> Self {
        Field::new(name).types([ValueType::Bool]).converter(to_bool)
    }

    /// A list of strings, split from a delimited string.
    pub fn string_list(name: impl Into<String>, delimiter: impl Into<String>) -> Self {
        let delimiter: String = delimiter.into();
        Field::new(name)
            .types([ValueType::List])
            .converter(split(delimiter))
    }

    /// A list of `[host, port]` pairs parsed from `host:port,host:port`.
    pub fn host_list(name: impl Into<String>) -> Self {
        Field::new(name).types([ValueType::List]).converter(host_list)
    }
}
