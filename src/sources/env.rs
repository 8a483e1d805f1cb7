//! Environment variables and dotenv files.
//!
//! The process environment is never mutated here: a dotenv file is overlaid
//! onto an environment snapshot, and the snapshot is what gets filtered.

use crate::value::ValueMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error};

/// String-keyed environment mapping.
pub type Environment = HashMap<String, String>;

/// Snapshot the process environment, skipping entries that are not valid UTF-8.
pub fn snapshot() -> Environment {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Extract variables starting with `prefix_`, with the prefix removed.
///
/// A missing trailing `_` is appended to a non-empty prefix. An empty prefix
/// returns the whole environment. A key equal to the prefix itself is skipped.
/// Entries come out sorted by variable name.
pub fn from_env(prefix: &str, environ: &Environment) -> ValueMap {
    let prefix = if !prefix.is_empty() && !prefix.ends_with('_') {
        format!("{}_", prefix)
    } else {
        prefix.to_string()
    };

    let mut entries: Vec<(&String, &String)> = environ.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let stripped = if prefix.is_empty() {
                key.as_str()
            } else {
                key.strip_prefix(prefix.as_str()).filter(|rest| !rest.is_empty())?
            };
            Some((stripped.to_string(), Value::String(value.clone())))
        })
        .collect()
}

/// Overlay the entries of a dotenv file onto `environ`.
///
/// With `override_env` the file wins over existing entries; otherwise existing
/// entries are kept. A missing or malformed file is logged and leaves the
/// snapshot unchanged.
pub fn load_dotenv(path: &Path, override_env: bool, mut environ: Environment) -> Environment {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) => {
            error!("Cannot read dotenv file {}: {}", path.display(), e);
            return environ;
        }
    };

    let mut loaded = Environment::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                loaded.insert(key, value);
            }
            Err(e) => {
                error!("Cannot parse dotenv file {}: {}", path.display(), e);
                return environ;
            }
        }
    }

    debug!("Loaded {} entries from {}", loaded.len(), path.display());
    for (key, value) in loaded {
        if override_env || !environ.contains_key(&key) {
            environ.insert(key, value);
        }
    }
    environ
}
