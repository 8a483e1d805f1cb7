//! Periodically refreshed settings.
//!
//! A [`DynamicSettings`] wraps a [`Settings`] container and a [`SettingsSource`].
//! `start_update` spawns a background task that pulls values from the source
//! every `update_period` and routes them through `Settings::update`.
//!
//! ## Retry budget
//! Each failed refresh is logged and consumes one retry; a successful refresh
//! restores the full budget. When a failure happens with no retries left, the
//! task ends on its own (`Terminated`) and no further refreshes occur.
//!
//! ## States
//! `Idle -[start]-> Running -[stop]-> Idle`, `Running -[budget exhausted]-> Terminated`.
//! Stopping a terminated task returns it to `Idle`.

pub mod sqlite;

pub use sqlite::{SqliteColumns, SqliteSource};

use crate::error::{Result, SettingsError};
use crate::settings::Settings;
use crate::value::ValueMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An external store that settings are refreshed from.
#[async_trait]
pub trait SettingsSource: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> String {
        "source".to_string()
    }

    /// Fetch current values and apply them to `settings`.
    async fn update_settings_from_source(&self, settings: &Settings) -> Result<()>;

    /// Apply explicit updates. Store-backed sources write them back first.
    async fn update_config(&self, settings: &Settings, values: ValueMap) -> Result<()> {
        settings.update(values)?;
        Ok(())
    }
}

/// Refresh loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Delay between refreshes in milliseconds (default: 60000).
    #[serde(default = "default_update_period_ms")]
    pub update_period_ms: u64,

    /// Consecutive failures tolerated before the loop stops (default: 3).
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay after a failed refresh in milliseconds (default: the update period).
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            update_period_ms: default_update_period_ms(),
            retries: default_retries(),
            retry_delay_ms: None,
        }
    }
}

fn default_update_period_ms() -> u64 {
    60_000 // 1 minute
}

fn default_retries() -> u32 {
    3
}

impl RefreshConfig {
    pub fn new(update_period: Duration, retries: u32) -> Self {
        Self {
            update_period_ms: saturating_millis(update_period),
            retries,
            retry_delay_ms: None,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = Some(saturating_millis(delay));
        self
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms.unwrap_or(self.update_period_ms))
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Lifecycle state of the background refresh task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    /// No task.
    Idle,
    /// Refreshing on the configured period.
    Running,
    /// Ended after exhausting its retry budget.
    Terminated,
}

struct RefreshTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
    status: watch::Receiver<RefreshState>,
}

/// Settings kept up to date by a background refresh task.
pub struct DynamicSettings<S: SettingsSource> {
    settings: Arc<Settings>,
    source: Arc<S>,
    config: RefreshConfig,
    task: Mutex<Option<RefreshTask>>,
}

impl<S: SettingsSource> DynamicSettings<S> {
    pub fn new(settings: Settings, source: S, config: RefreshConfig) -> Self {
        Self {
            settings: Arc::new(settings),
            source: Arc::new(source),
            config,
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Refresh once from the source, outside the background loop.
    pub async fn update_settings_from_source(&self) -> Result<()> {
        self.source.update_settings_from_source(&self.settings).await
    }

    /// Apply explicit updates through the source (which may persist them).
    pub async fn update_config(&self, values: ValueMap) -> Result<&Self> {
        self.source.update_config(&self.settings, values).await?;
        Ok(self)
    }

    pub fn state(&self) -> RefreshState {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        match *task {
            None => RefreshState::Idle,
            Some(ref task) => {
                let state = *task.status.borrow();
                if state == RefreshState::Running && task.handle.is_finished() {
                    RefreshState::Terminated
                } else {
                    state
                }
            }
        }
    }

    /// Spawn the refresh loop on the current Tokio runtime and return immediately.
    ///
    /// Does nothing if a task is already present (running or terminated).
    pub fn start_update(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(SettingsError::task_failed)?;

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            warn!(source = %self.source.name(), "Settings refresh already started");
            return Ok(());
        }

        let token = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(RefreshState::Running);
        let handle = runtime.spawn(refresh_loop(
            Arc::clone(&self.settings),
            Arc::clone(&self.source),
            self.config.clone(),
            token.clone(),
            status_tx,
        ));

        info!(
            source = %self.source.name(),
            "Settings refresh started (every {:?}, {} retries)",
            self.config.update_period(),
            self.config.retries
        );
        *task = Some(RefreshTask {
            token,
            handle,
            status: status_rx,
        });
        Ok(())
    }

    /// Cancel the refresh task and wait for it to finish.
    ///
    /// Cancellation is the expected outcome and is not reported; a panic inside
    /// the task surfaces as a `TaskFailed` error.
    pub async fn stop_update(&self) -> Result<()> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return Ok(());
        };

        task.token.cancel();
        let result = match task.handle.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(SettingsError::task_failed(e)),
        };
        info!(source = %self.source.name(), "Settings refresh stopped");
        result
    }
}

impl<S: SettingsSource> Deref for DynamicSettings<S> {
    type Target = Settings;

    fn deref(&self) -> &Settings {
        &self.settings
    }
}

impl<S: SettingsSource> Drop for DynamicSettings<S> {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = task.take() {
            task.token.cancel();
        }
    }
}

async fn refresh_loop<S: SettingsSource>(
    settings: Arc<Settings>,
    source: Arc<S>,
    config: RefreshConfig,
    token: CancellationToken,
    status: watch::Sender<RefreshState>,
) {
    let name = source.name();
    let budget = i64::from(config.retries);
    let mut remaining = budget;

    loop {
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            outcome = source.update_settings_from_source(&settings) => outcome,
        };

        let delay = match outcome {
            Ok(()) => {
                debug!(source = %name, "Settings refreshed");
                remaining = budget;
                config.update_period()
            }
            Err(e) => {
                remaining -= 1;
                if remaining < 0 {
                    error!(
                        source = %name,
                        "Settings refresh failed, retry budget exhausted; stopping: {}", e
                    );
                    let _ = status.send(RefreshState::Terminated);
                    return;
                }
                warn!(
                    source = %name,
                    "Settings refresh failed ({} retries left): {}", remaining, e
                );
                config.retry_delay()
            }
        };

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
