//! Configuration management for the sync layer.

use std::env;
use std::time::Duration;

use crate::optimistic::EngineConfig;

/// Default trailing window for post-mutation reconciliation loads.
pub const DEFAULT_RECONCILE_DELAY: Duration = Duration::from_millis(500);
/// Default trailing window for [`OptimisticEngine::sync`](crate::OptimisticEngine::sync).
pub const DEFAULT_SYNC_DELAY: Duration = Duration::from_millis(300);
/// Default prefix of client-generated temporary ids.
pub const DEFAULT_TEMP_ID_PREFIX: &str = "temp-";

/// Sync configuration, loadable from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Apply mutations before the remote confirms them
    pub enable_optimistic: bool,
    /// Quiet period before a reconciliation load runs
    pub reconcile_delay: Duration,
    /// Quiet period for explicit debounced syncs
    pub sync_delay: Duration,
    /// Prefix for temporary record ids
    pub temp_id_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable_optimistic: true,
            reconcile_delay: DEFAULT_RECONCILE_DELAY,
            sync_delay: DEFAULT_SYNC_DELAY,
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// - `ORDERLY_OPTIMISTIC` (`true`/`false`, default `true`)
    /// - `ORDERLY_RECONCILE_DELAY_MS` (default 500)
    /// - `ORDERLY_SYNC_DELAY_MS` (default 300)
    /// - `ORDERLY_TEMP_ID_PREFIX` (default `temp-`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let enable_optimistic = match env::var("ORDERLY_OPTIMISTIC") {
            Ok(value) => parse_bool("ORDERLY_OPTIMISTIC", &value)?,
            Err(_) => defaults.enable_optimistic,
        };

        let reconcile_delay = match env::var("ORDERLY_RECONCILE_DELAY_MS") {
            Ok(value) => parse_millis("ORDERLY_RECONCILE_DELAY_MS", &value)?,
            Err(_) => defaults.reconcile_delay,
        };

        let sync_delay = match env::var("ORDERLY_SYNC_DELAY_MS") {
            Ok(value) => parse_millis("ORDERLY_SYNC_DELAY_MS", &value)?,
            Err(_) => defaults.sync_delay,
        };

        let temp_id_prefix =
            env::var("ORDERLY_TEMP_ID_PREFIX").unwrap_or(defaults.temp_id_prefix);

        Ok(Self {
            enable_optimistic,
            reconcile_delay,
            sync_delay,
            temp_id_prefix,
        })
    }

    /// Toggle optimistic application.
    pub fn with_optimistic(mut self, enable: bool) -> Self {
        self.enable_optimistic = enable;
        self
    }

    /// Set the reconciliation window.
    pub fn with_reconcile_delay(mut self, delay: Duration) -> Self {
        self.reconcile_delay = delay;
        self
    }

    /// Set the explicit sync window.
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = delay;
        self
    }

    /// Settings the optimistic engine needs.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            enable_optimistic: self.enable_optimistic,
            temp_id_prefix: self.temp_id_prefix.clone(),
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidDelay {
            var,
            value: value.to_string(),
        })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a boolean, got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("{var} must be a whole number of milliseconds, got '{value}'")]
    InvalidDelay { var: &'static str, value: String },
}
