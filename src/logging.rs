//! Tracing setup for applications and tests.
//!
//! The library itself only emits `tracing` events. Binaries embedding it call
//! [`init`] once at startup; tests call [`init_for_tests`].

use crate::error::{Result, SettingsError};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Where log output goes.
///
/// Parsed from the same shorthand a `--log` flag would take:
/// `0`/`off`, `1`/`stdout`, `2`/`stderr`, anything else is a file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Off,
    Stdout,
    Stderr,
    File(PathBuf),
}

impl FromStr for LogTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "0" | "off" => LogTarget::Off,
            "1" | "stdout" => LogTarget::Stdout,
            "2" | "stderr" => LogTarget::Stderr,
            path => LogTarget::File(PathBuf::from(path)),
        })
    }
}

/// Filter from `RUST_LOG`, falling back to `default_level`.
fn filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()))
}

/// Install the global subscriber.
///
/// Fails with a configuration error if a subscriber is already installed or
/// the log file cannot be opened.
pub fn init(target: &LogTarget, default_level: Level) -> Result<()> {
    let installed = match target {
        LogTarget::Off => return Ok(()),
        LogTarget::Stdout => FmtSubscriber::builder()
            .with_env_filter(filter(default_level))
            .with_writer(std::io::stdout)
            .try_init(),
        LogTarget::Stderr => FmtSubscriber::builder()
            .with_env_filter(filter(default_level))
            .with_writer(std::io::stderr)
            .try_init(),
        LogTarget::File(path) => {
            // Append mode
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    SettingsError::configuration(format!(
                        "Cannot open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            FmtSubscriber::builder()
                .with_env_filter(filter(default_level))
                .with_writer(file)
                .with_ansi(false)
                .try_init()
        }
    };
    installed.map_err(|e| SettingsError::configuration(format!("Cannot install logger: {}", e)))
}

/// Route logs through the test harness's captured output. Safe to call from
/// every test; only the first call installs anything.
pub fn init_for_tests() {
    let _ = FmtSubscriber::builder()
        .with_env_filter(filter(Level::DEBUG))
        .with_test_writer()
        .try_init();
}
