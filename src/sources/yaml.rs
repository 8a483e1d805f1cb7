//! Single-level YAML settings files.

use crate::value::ValueMap;
use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::error;

/// Parse a YAML document holding one flat mapping of string keys to
/// scalar or list values. An empty document yields an empty mapping.
pub fn parse_yaml(content: &str) -> Result<ValueMap> {
    if content.trim().is_empty() {
        return Ok(ValueMap::new());
    }
    let document: serde_yaml::Value = serde_yaml::from_str(content)?;
    let mapping = match document {
        serde_yaml::Value::Null => return Ok(ValueMap::new()),
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => bail!("configuration file has several levels of nesting"),
    };

    let mut values = ValueMap::new();
    for (key, value) in mapping {
        let serde_yaml::Value::String(key) = key else {
            bail!("configuration file has several levels of nesting");
        };
        if value.is_mapping() {
            bail!("configuration file has several levels of nesting");
        }
        values.insert(key, serde_json::to_value(&value)?);
    }
    Ok(values)
}

/// Read a YAML settings file. Any failure is logged and yields an empty
/// mapping, so a broken YAML file never aborts the whole load.
pub fn from_yaml(path: &Path) -> ValueMap {
    let result = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))
        .and_then(|content| parse_yaml(&content));

    match result {
        Ok(values) => values,
        Err(e) => {
            error!("Cannot read YAML config: {:#}", e);
            ValueMap::new()
        }
    }
}
