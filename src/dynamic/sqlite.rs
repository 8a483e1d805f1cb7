//! SQLite-backed settings source.
//!
//! Reads rows of `(key, value, active)` from a table whose key matches a
//! declared field and whose active flag is set. Table and column names are
//! configurable.

use super::SettingsSource;
use crate::error::{ErrorCode, Result, SettingsError};
use crate::settings::Settings;
use crate::value::ValueMap;
use async_trait::async_trait;
use regex_lite::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

/// Table and column names holding the settings rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteColumns {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default = "default_value")]
    pub value: String,
    #[serde(default = "default_active")]
    pub active: String,
}

impl Default for SqliteColumns {
    fn default() -> Self {
        Self {
            table: default_table(),
            key: default_key(),
            value: default_value(),
            active: default_active(),
        }
    }
}

fn default_table() -> String {
    "settings".to_string()
}

fn default_key() -> String {
    "key".to_string()
}

fn default_value() -> String {
    "value".to_string()
}

fn default_active() -> String {
    "active".to_string()
}

impl SqliteColumns {
    /// Names are interpolated into SQL, so only plain identifiers are allowed.
    fn validate(&self) -> Result<()> {
        let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .map_err(|e| SettingsError::configuration(e.to_string()))?;
        for name in [&self.table, &self.key, &self.value, &self.active] {
            if !identifier.is_match(name) {
                return Err(SettingsError::configuration(format!(
                    "Invalid SQL identifier for settings table: {:?}",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Settings source reading a SQLite table.
#[derive(Clone)]
pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
    columns: SqliteColumns,
}

impl SqliteSource {
    /// Open the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, columns: SqliteColumns) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| SettingsError::source_unavailable(&path.display().to_string(), e))?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Self::from_connection(conn, columns)
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection, columns: SqliteColumns) -> Result<Self> {
        columns.validate()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            columns,
        })
    }

    pub fn columns(&self) -> &SqliteColumns {
        &self.columns
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Create the settings table if it does not exist.
    pub fn ensure_table(&self) -> Result<()> {
        let SqliteColumns {
            table,
            key,
            value,
            active,
        } = &self.columns;
        self.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    {key} TEXT PRIMARY KEY NOT NULL,
                    {value} TEXT,
                    {active} INTEGER NOT NULL DEFAULT 1
                );"
            ))?;
            Ok(())
        })
    }

    /// Active rows whose key is one of `names`, in the order of `names`.
    pub fn fetch(&self, names: &[&str]) -> Result<ValueMap> {
        if names.is_empty() {
            return Ok(ValueMap::new());
        }

        let SqliteColumns {
            table,
            key,
            value,
            active,
        } = &self.columns;
        let placeholders: Vec<&str> = names.iter().map(|_| "?").collect();
        let sql = format!(
            "SELECT {key}, {value} FROM {table} WHERE {active} = 1 AND {key} IN ({})",
            placeholders.join(", ")
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(names.iter()), |row| {
                let key: String = row.get(0)?;
                let value = column_to_value(row.get_ref(1)?);
                Ok((key, value))
            })?;
            let mut found = rows.collect::<rusqlite::Result<ValueMap>>()?;
            Ok(names
                .iter()
                .filter_map(|name| found.remove(*name).map(|value| (name.to_string(), value)))
                .collect())
        })
    }

    /// Store `raw` as the value of an existing row.
    fn write(&self, name: &str, raw: &str) -> Result<()> {
        let SqliteColumns {
            table, key, value, ..
        } = &self.columns;
        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                &format!("UPDATE {table} SET {value} = ?1 WHERE {key} = ?2"),
                params![raw, name],
            )?)
        })?;
        if updated == 0 {
            return Err(SettingsError::new(
                ErrorCode::UnknownField,
                format!("No stored row for {} property in {}", name, table),
            )
            .with_field(name));
        }
        Ok(())
    }
}

fn column_to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[async_trait]
impl SettingsSource for SqliteSource {
    fn name(&self) -> String {
        format!("sqlite:{}", self.columns.table)
    }

    async fn update_settings_from_source(&self, settings: &Settings) -> Result<()> {
        let names: Vec<&str> = settings.schema().names().collect();
        let values = match self.fetch(&names) {
            Ok(values) => values,
            Err(e) => {
                error!("Error while updating settings from {}: {}", self.name(), e);
                return Ok(());
            }
        };
        debug!("Fetched {} active settings from {}", values.len(), self.name());

        settings.pre_validate()?;
        settings.update(values)?;
        settings.post_validate()
    }

    /// Values must be strings, as stored; each is checked against its field
    /// before the row is written.
    async fn update_config(&self, settings: &Settings, values: ValueMap) -> Result<()> {
        for (name, value) in &values {
            let Value::String(raw) = value else {
                return Err(SettingsError::validation(
                    name,
                    format!(
                        "Value of {} property should be str for dynamic properties",
                        name
                    ),
                ));
            };
            let field = settings
                .schema()
                .get(name)
                .ok_or_else(|| SettingsError::unknown_field(name))?;
            field.coerce(value.clone())?;
            self.write(name, raw)?;
        }
        settings.update(values)?;
        Ok(())
    }
}
