//! Declarative layered configuration.
//!
//! Declare typed fields in a [`Schema`], then let a [`Settings`] container load
//! them from in-process modules, the environment (plus an optional dotenv
//! file) and a YAML file, in that order of increasing precedence.
//! [`DynamicSettings`] keeps a container refreshed from an external store.

pub mod convert;
pub mod dynamic;
pub mod error;
pub mod field;
pub mod logging;
pub mod schema;
pub mod settings;
pub mod sources;
pub mod value;

pub use dynamic::{
    DynamicSettings, RefreshConfig, RefreshState, SettingsSource, SqliteColumns, SqliteSource,
};
pub use error::{ErrorCode, Result, SettingsError};
pub use field::{Field, Validator};
pub use schema::Schema;
pub use settings::{Settings, Snapshot, TempOverride};
pub use sources::{Module, SourceConfig};
pub use value::{FieldValue, TransformInput, ValueMap, ValueType};
