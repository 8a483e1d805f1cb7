//! Structured error types for settings operations.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Declaration errors (fatal at startup)
    Configuration,

    // Assignment errors
    Conversion,
    Validation,
    ReadOnly,
    UnknownField,

    // Load completeness
    RequiredValue,

    // Source errors
    SourceUnavailable,
    Store,
    Serialization,

    // Background refresh task
    TaskFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Configuration => "configuration",
            ErrorCode::Conversion => "conversion",
            ErrorCode::Validation => "validation",
            ErrorCode::ReadOnly => "read_only",
            ErrorCode::UnknownField => "unknown_field",
            ErrorCode::RequiredValue => "required_value",
            ErrorCode::SourceUnavailable => "source_unavailable",
            ErrorCode::Store => "store",
            ErrorCode::Serialization => "serialization",
            ErrorCode::TaskFailed => "task_failed",
        };
        f.write_str(s)
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structured error raised by field assignment, validation passes and sources.
#[derive(Debug, Error, Serialize)]
#[error("{message}")]
pub struct SettingsError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip)]
    #[source]
    source: Option<BoxError>,
}

impl SettingsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    // Convenience constructors

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, message)
    }

    pub fn conversion(field: &str, err: anyhow::Error) -> Self {
        Self::new(
            ErrorCode::Conversion,
            format!("Failed to convert property {} with error: {}", field, err),
        )
        .with_field(field)
        .with_source(err)
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message).with_field(field)
    }

    pub fn read_only(field: &str) -> Self {
        Self::new(
            ErrorCode::ReadOnly,
            format!("Direct setting of {} property not allowed", field),
        )
        .with_field(field)
    }

    pub fn unknown_field(field: &str) -> Self {
        Self::new(
            ErrorCode::UnknownField,
            format!("Settings don't have a {} attribute", field),
        )
        .with_field(field)
    }

    pub fn required(field: &str) -> Self {
        Self::new(
            ErrorCode::RequiredValue,
            format!(
                "Undefined value of required {} property, you must specify it in your config source",
                field
            ),
        )
        .with_field(field)
    }

    pub fn source_unavailable(source: &str, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SourceUnavailable,
            format!("Settings source {} is unavailable: {}", source, err),
        )
    }

    pub fn task_failed(err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::TaskFailed,
            format!("Settings refresh task failed: {}", err),
        )
    }

    /// True for errors detected while checking declarations or completeness,
    /// which should abort process initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Configuration | ErrorCode::RequiredValue
        )
    }
}

impl From<rusqlite::Error> for SettingsError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(ErrorCode::Store, err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Serialization, err.to_string()).with_source(err)
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keeps_field_and_source() {
        let err = SettingsError::conversion("PORT", anyhow::anyhow!("invalid digit"));
        assert_eq!(err.code, ErrorCode::Conversion);
        assert_eq!(err.field.as_deref(), Some("PORT"));
        assert!(err.to_string().contains("PORT"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_serializes_code_screaming_case() {
        let err = SettingsError::required("DB_URL");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "REQUIRED_VALUE");
        assert_eq!(json["field"], "DB_URL");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_fatal_codes() {
        assert!(SettingsError::configuration("bad").is_fatal());
        assert!(SettingsError::required("X").is_fatal());
        assert!(!SettingsError::validation("X", "bad").is_fatal());
    }
}
