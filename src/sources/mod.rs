//! Settings sources.
//!
//! Readers are pure functions turning a source into a flat name → value
//! mapping. No field-level coercion happens here; values are converted when
//! `Settings::update` routes them through their field.
//!
//! ## Precedence (lowest to highest)
//! 1. **Modules** - in list order, later modules override earlier ones
//! 2. **Environment** - process environment (plus optional dotenv file), filtered by prefix
//! 3. **YAML** - a single-level YAML file

pub mod env;
pub mod module;
pub mod yaml;

pub use env::{Environment, from_env, load_dotenv};
pub use module::{Module, from_module};
pub use yaml::{from_yaml, parse_yaml};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which sources a settings container reads during `init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// In-process modules, applied in order.
    #[serde(skip)]
    pub modules: Vec<Module>,

    /// Environment variable prefix (default: none, read every variable).
    #[serde(default)]
    pub prefix: String,

    /// Dotenv file overlaid onto the environment before it is read.
    #[serde(default)]
    pub dotenv_path: Option<PathBuf>,

    /// Let dotenv entries win over existing environment variables (default: false).
    #[serde(default)]
    pub override_env: bool,

    /// YAML settings file.
    #[serde(default)]
    pub yaml_path: Option<PathBuf>,

    /// Read the environment at all (default: true).
    #[serde(default = "default_use_env")]
    pub use_env: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            prefix: String::new(),
            dotenv_path: None,
            override_env: false,
            yaml_path: None,
            use_env: default_use_env(),
        }
    }
}

fn default_use_env() -> bool {
    true
}

impl SourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_dotenv(mut self, path: impl Into<PathBuf>, override_env: bool) -> Self {
        self.dotenv_path = Some(path.into());
        self.override_env = override_env;
        self
    }

    pub fn with_yaml(mut self, path: impl Into<PathBuf>) -> Self {
        self.yaml_path = Some(path.into());
        self
    }

    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Describe the configured sources for introspection.
    pub fn records(&self) -> Vec<SourceRecord> {
        let mut records: Vec<SourceRecord> = self
            .modules
            .iter()
            .map(|module| SourceRecord {
                source_type: SourceType::Module,
                address: SourceAddress::Module {
                    name: module.name().to_string(),
                },
            })
            .collect();

        if self.use_env {
            records.push(SourceRecord {
                source_type: SourceType::Dotenv,
                address: SourceAddress::Dotenv {
                    dotenv_path: self.dotenv_path.clone(),
                    override_env: self.override_env,
                },
            });
        }

        if let Some(ref path) = self.yaml_path {
            records.push(SourceRecord {
                source_type: SourceType::Yaml,
                address: SourceAddress::Yaml {
                    yaml_settings_path: path.clone(),
                },
            });
        }

        records
    }
}

/// Kind of a configured source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Module,
    Dotenv,
    Yaml,
}

/// Where a configured source reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceAddress {
    Module {
        name: String,
    },
    Dotenv {
        dotenv_path: Option<PathBuf>,
        #[serde(rename = "override")]
        override_env: bool,
    },
    Yaml {
        yaml_settings_path: PathBuf,
    },
}

/// One entry of the `sources` list in a settings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_type: SourceType,
    pub address: SourceAddress,
}
