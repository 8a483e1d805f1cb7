//! In-process modules: named bags of constants.

use crate::error::{Result, SettingsError};
use crate::value::{ValueMap, is_upper_name};
use serde::Serialize;
use serde_json::{Map, Value};

/// A named set of constants compiled into the application.
///
/// Only uppercase-named entries are read as settings, so a module can carry
/// helpers or lowercase bookkeeping next to its settings.
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    values: Map<String, Value>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Build a module from any value that serializes to a mapping.
    pub fn from_serialize<T: Serialize>(name: impl Into<String>, value: &T) -> Result<Self> {
        let name = name.into();
        match serde_json::to_value(value)? {
            Value::Object(values) => Ok(Self { name, values }),
            other => Err(SettingsError::configuration(format!(
                "Module {} should serialize to a mapping, got {}",
                name, other
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Collect every uppercase-named constant of a module.
pub fn from_module(module: &Module) -> ValueMap {
    module
        .values
        .iter()
        .filter(|(key, _)| is_upper_name(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
