//! Settings container: field storage, multi-source loading and validation passes.
//!
//! ```ignore
//! let schema = Schema::new()
//!     .field(Field::string("FOO").default("foo").converter(convert::lowercase))
//!     .field(Field::int("PORT"));
//!
//! let settings = Settings::with_sources(schema, SourceConfig::new().with_prefix("APP"));
//! settings.init()?;
//! let port: i64 = settings.get_as("PORT")?;
//! ```

use crate::error::{Result, SettingsError};
use crate::field::Field;
use crate::schema::Schema;
use crate::sources::{
    Environment, SourceConfig, SourceRecord, env, from_env, from_module, from_yaml, load_dotenv,
};
use crate::value::{FieldValue, ValueMap};
use arc_swap::ArcSwap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A set of declared fields plus their current values.
///
/// Values can be read and written through a shared reference; writes swap in
/// a new value map, so readers always see a consistent snapshot. Concurrent
/// writers to the same field are not serialized: the last write wins.
pub struct Settings {
    schema: Arc<Schema>,
    sources: SourceConfig,
    values: ArcSwap<ValueMap>,
}

impl Settings {
    /// Settings reading only the process environment.
    pub fn new(schema: Schema) -> Self {
        Self::with_sources(schema, SourceConfig::default())
    }

    pub fn with_sources(schema: Schema, sources: SourceConfig) -> Self {
        Self {
            schema: Arc::new(schema),
            sources,
            values: ArcSwap::from_pointee(ValueMap::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn sources(&self) -> &SourceConfig {
        &self.sources
    }

    /// Every declared field, restartable.
    pub fn properties(&self) -> impl Iterator<Item = &Field> {
        self.schema.properties()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schema.contains(name)
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.schema
            .get(name)
            .ok_or_else(|| SettingsError::unknown_field(name))
    }

    /// Raw stored value, ignoring defaults and transforms.
    fn stored(&self, name: &str) -> Option<Value> {
        self.values.load().get(name).cloned()
    }

    /// Current value of a field.
    ///
    /// Unset fields read as their default (possibly `Undefined`); derived
    /// fields are composed from their referenced fields on every read.
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        self.lookup(name, &[])
    }

    /// Resolve `name` while tracking the derived fields being composed, so a
    /// cyclic schema that skipped `pre_validate` errors instead of recursing.
    fn lookup(&self, name: &str, path: &[String]) -> Result<FieldValue> {
        if path.iter().any(|p| p == name) {
            return Err(SettingsError::configuration(format!(
                "Derived property {} references itself through {}",
                name,
                path.join(" -> ")
            ))
            .with_field(name));
        }

        let field = self.field(name)?;
        let values = self.values.load();
        field.resolve(values.get(name), |referenced| {
            let mut next = path.to_vec();
            next.push(name.to_string());
            self.lookup(referenced, &next)
        })
    }

    /// Current value of a field, deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        match self.get(name)? {
            FieldValue::Value(value) => Ok(serde_json::from_value(value)?),
            FieldValue::Undefined => Err(SettingsError::required(name)),
        }
    }

    /// Convert, validate and store a value for a declared field.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = self.field(name)?.coerce(value.into())?;
        self.store(name, Some(value));
        Ok(())
    }

    fn store(&self, name: &str, value: Option<Value>) {
        self.values.rcu(|current| {
            let mut next = ValueMap::clone(current);
            match value {
                Some(ref value) => {
                    next.insert(name.to_string(), value.clone());
                }
                None => {
                    next.remove(name);
                }
            }
            next
        });
    }

    /// Assign every pair through its field. Keys with no declared field are
    /// skipped. Stops at the first failing key; earlier keys stay applied.
    pub fn update<I, K, V>(&self, values: I) -> Result<&Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (key, value) in values {
            let key = key.as_ref();
            if !self.contains(key) {
                debug!("Skipping {}: no such property", key);
                continue;
            }
            self.set(key, value)?;
            debug!("Applied {}", key);
        }
        Ok(self)
    }

    /// Check field declarations before any data is loaded.
    pub fn pre_validate(&self) -> Result<()> {
        self.schema.validate()
    }

    /// Check that every field ended up with a value.
    pub fn post_validate(&self) -> Result<()> {
        let plain = self.properties().filter(|f| !f.is_derived());
        let derived = self.properties().filter(|f| f.is_derived());
        for field in plain.chain(derived) {
            if self.get(field.name())?.is_undefined() {
                return Err(SettingsError::required(field.name()));
            }
        }
        Ok(())
    }

    /// Load every configured source using a snapshot of the process environment.
    pub fn init(&self) -> Result<()> {
        let environ = if self.sources.use_env {
            env::snapshot()
        } else {
            Environment::new()
        };
        self.init_with_env(environ)
    }

    /// Load every configured source, reading environment variables from `environ`.
    ///
    /// Order: pre-validate, modules, environment (after overlaying the dotenv
    /// file), YAML, post-validate. Later sources override earlier ones.
    pub fn init_with_env(&self, environ: Environment) -> Result<()> {
        self.pre_validate()?;

        for module in &self.sources.modules {
            debug!("Loading settings module {}", module.name());
            self.update(from_module(module))?;
        }

        if self.sources.use_env {
            let environ = match self.sources.dotenv_path {
                Some(ref path) => load_dotenv(path, self.sources.override_env, environ),
                None => environ,
            };
            self.update(from_env(&self.sources.prefix, &environ))?;
        }

        if let Some(ref path) = self.sources.yaml_path {
            self.update(from_yaml(path))?;
        }

        self.post_validate()?;
        info!("Settings initialized ({} properties)", self.schema.len());
        Ok(())
    }

    /// Current values plus the configured sources, for introspection.
    pub fn to_dict(&self) -> Result<Snapshot> {
        let mut properties = Map::new();
        for field in self.properties() {
            let value = self.get(field.name())?.into_option().unwrap_or(Value::Null);
            properties.insert(field.name().to_string(), value);
        }
        Ok(Snapshot {
            properties,
            sources: self.sources.records(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_dict()?)?)
    }

    /// Temporarily override fields until the returned guard is dropped.
    ///
    /// Every name must be a declared field; nothing is changed otherwise.
    /// Overrides are validated like any assignment. Not safe against other
    /// writers touching the same fields while the guard is alive.
    pub fn temp_set<I, K, V>(&self, overrides: I) -> Result<TempOverride<'_>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let overrides: Vec<(String, Value)> = overrides
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.into()))
            .collect();

        if let Some((missing, _)) = overrides.iter().find(|(k, _)| !self.contains(k)) {
            return Err(SettingsError::unknown_field(missing));
        }

        let mut guard = TempOverride {
            settings: self,
            saved: Vec::with_capacity(overrides.len()),
        };
        for (name, value) in overrides {
            guard.saved.push((name.clone(), self.stored(&name)));
            // On failure the guard drops here and restores what was applied.
            self.set(&name, value)?;
        }
        Ok(guard)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("schema", &self.schema.names().collect::<Vec<_>>())
            .field("sources", &self.sources)
            .field("values", &self.values.load_full())
            .finish()
    }
}

/// Serializable view of a settings container.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Field name → current value (`null` when undefined).
    pub properties: Map<String, Value>,
    pub sources: Vec<SourceRecord>,
}

/// Guard returned by [`Settings::temp_set`]; restores the original values on drop.
#[must_use = "overrides are reverted as soon as the guard is dropped"]
pub struct TempOverride<'a> {
    settings: &'a Settings,
    saved: Vec<(String, Option<Value>)>,
}

impl Drop for TempOverride<'_> {
    fn drop(&mut self) {
        for (name, value) in self.saved.drain(..).rev() {
            self.settings.store(&name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::value::ValueType;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::new(
            Schema::new()
                .field(Field::string("FOO").default("BAR"))
                .field(Field::string("BAR").default("FOO"))
                .field(Field::int("COUNT")),
        )
    }

    #[test]
    fn test_get_is_idempotent() {
        let s = settings();
        assert!(s.get("COUNT").unwrap().is_undefined());
        assert!(s.get("COUNT").unwrap().is_undefined());
        assert_eq!(s.get("FOO").unwrap(), json!("BAR"));
        assert_eq!(s.get("FOO").unwrap(), json!("BAR"));
    }

    #[test]
    fn test_string_and_typed_assignment_agree() {
        let s = settings();
        s.set("COUNT", "5").unwrap();
        let from_string = s.get("COUNT").unwrap();
        s.set("COUNT", 5).unwrap();
        assert_eq!(s.get("COUNT").unwrap(), from_string);
    }

    #[test]
    fn test_update_skips_unknown_keys() {
        let s = settings();
        s.update([("COUNT", json!("7")), ("NOT_A_FIELD", json!(1))])
            .unwrap();
        assert_eq!(s.get_as::<i64>("COUNT").unwrap(), 7);
        assert_eq!(s.get("NOT_A_FIELD").unwrap_err().code, ErrorCode::UnknownField);
    }

    #[test]
    fn test_get_as_undefined_is_required_error() {
        let s = settings();
        assert_eq!(
            s.get_as::<i64>("COUNT").unwrap_err().code,
            ErrorCode::RequiredValue
        );
    }

    #[test]
    fn test_temp_set_restores() {
        let s = settings();
        {
            let _guard = s.temp_set([("FOO", "TEMP_FOO"), ("BAR", "TEMP_BAR")]).unwrap();
            assert_eq!(s.get("FOO").unwrap(), json!("TEMP_FOO"));
            assert_eq!(s.get("BAR").unwrap(), json!("TEMP_BAR"));
        }
        assert_eq!(s.get("FOO").unwrap(), json!("BAR"));
        assert_eq!(s.get("BAR").unwrap(), json!("FOO"));
    }

    #[test]
    fn test_temp_set_unknown_changes_nothing() {
        let s = settings();
        let err = s
            .temp_set([("FOO", "TEMP_FOO"), ("BAD_ATTR", "BAD_ATTR")])
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::UnknownField);
        assert_eq!(s.get("FOO").unwrap(), json!("BAR"));
    }

    #[test]
    fn test_temp_set_invalid_value_rolls_back() {
        let s = settings();
        s.set("COUNT", 1).unwrap();
        let result = s.temp_set([("COUNT", json!(2)), ("FOO", json!(3))]);
        assert_eq!(result.err().unwrap().code, ErrorCode::Validation);
        assert_eq!(s.get("COUNT").unwrap(), json!(1));
    }

    #[test]
    fn test_temp_set_restores_undefined() {
        let s = settings();
        {
            let _guard = s.temp_set([("COUNT", 3)]).unwrap();
            assert_eq!(s.get("COUNT").unwrap(), json!(3));
        }
        assert!(s.get("COUNT").unwrap().is_undefined());
    }

    #[test]
    fn test_derived_reads_current_values() {
        let s = Settings::new(
            Schema::new()
                .field(Field::string("HOST").default("localhost"))
                .field(Field::int("PORT").default(5432))
                .field(Field::derived("DSN").sequence(["HOST", "PORT"]).transform(|input| {
                    let host = input.arg(0).and_then(Value::as_str).unwrap_or_default();
                    let port = input.arg(1).and_then(Value::as_i64).unwrap_or_default();
                    Ok(json!(format!("{}:{}", host, port)))
                })),
        );
        assert_eq!(s.get("DSN").unwrap(), json!("localhost:5432"));
        s.set("PORT", "6543").unwrap();
        assert_eq!(s.get("DSN").unwrap(), json!("localhost:6543"));
        assert_eq!(s.set("DSN", "x").unwrap_err().code, ErrorCode::ReadOnly);
    }

    #[test]
    fn test_cyclic_derived_get_errors_without_pre_validate() {
        let s = Settings::new(
            Schema::new()
                .field(Field::derived("A").sequence(["B"]))
                .field(Field::derived("B").sequence(["A"])),
        );

        let err = s.get("A").unwrap_err();
        assert_eq!(err.code, ErrorCode::Configuration);
        assert!(err.message.contains("references itself"));
        assert_eq!(s.to_dict().unwrap_err().code, ErrorCode::Configuration);
    }

    #[test]
    fn test_shared_reference_is_not_a_cycle() {
        let s = Settings::new(
            Schema::new()
                .field(Field::int("PORT").default(1))
                .field(Field::derived("PAIR").sequence(["PORT", "PORT"])),
        );
        assert_eq!(s.get("PAIR").unwrap(), json!([1, 1]));
    }

    #[test]
    fn test_failed_update_keeps_keys_before_the_failure() {
        let s = Settings::new(
            Schema::new()
                .field(Field::int("A").default(0))
                .field(Field::int("B").default(0))
                .field(Field::int("C").default(0))
                .field(Field::int("D").default(0)),
        );
        let values: ValueMap = [("A", "1"), ("B", "bad"), ("C", "1"), ("D", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();

        for _ in 0..20 {
            let err = s.update(values.clone()).unwrap_err();
            assert_eq!(err.field.as_deref(), Some("B"));
            let state: Vec<i64> = ["A", "B", "C", "D"]
                .iter()
                .map(|name| s.get_as::<i64>(name).unwrap())
                .collect();
            assert_eq!(state, vec![1, 0, 0, 0]);
        }
    }

    #[test]
    fn test_temp_set_restores_after_panic() {
        let s = settings();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = s.temp_set([("FOO", "TEMP_FOO")]).unwrap();
            assert_eq!(s.get("FOO").unwrap(), json!("TEMP_FOO"));
            panic!("boom while overridden");
        }));

        assert!(result.is_err());
        assert_eq!(s.get("FOO").unwrap(), json!("BAR"));
    }

    #[test]
    fn test_post_validate_names_missing_field() {
        let s = settings();
        let err = s.post_validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::RequiredValue);
        assert_eq!(err.field.as_deref(), Some("COUNT"));
    }

    #[test]
    fn test_pre_validate_catches_untyped_field() {
        let s = Settings::new(Schema::new().field(Field::new("LOOSE")));
        assert_eq!(s.pre_validate().unwrap_err().code, ErrorCode::Configuration);

        let s = Settings::new(Schema::new().field(Field::new("LOOSE").types([ValueType::Str])));
        assert!(s.pre_validate().is_ok());
    }

    #[test]
    fn test_to_dict_reports_undefined_as_null() {
        let s = settings();
        let snapshot = s.to_dict().unwrap();
        assert_eq!(snapshot.properties["FOO"], json!("BAR"));
        assert_eq!(snapshot.properties["COUNT"], Value::Null);
        assert_eq!(snapshot.sources.len(), 1);
    }
}
