//! Configuration loading for the `miclock` binary. Settings come from an
//! optional TOML file with `MICLOCK__`-prefixed environment variables
//! layered on top.

use config::{Config, Environment, File};
use miclock_engine::{EngineConfig, RetryPolicy};
use miclock_foundation::Settings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Retry and debounce knobs, all in integer milliseconds so they stay
/// friendly to TOML and environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSection {
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub debounce_window_ms: u64,
    pub error_dedup_window_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            max_retry_attempts: config.retry.max_attempts,
            initial_retry_delay_ms: config.retry.initial_delay.as_millis() as u64,
            max_retry_delay_ms: config.retry.max_delay.as_millis() as u64,
            debounce_window_ms: config.debounce_window.as_millis() as u64,
            error_dedup_window_ms: config.error_dedup_window.as_millis() as u64,
        }
    }
}

impl EngineSection {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts: self.max_retry_attempts,
                initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
            },
            debounce_window: Duration::from_millis(self.debounce_window_ms),
            error_dedup_window: Duration::from_millis(self.error_dedup_window_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub lock: Settings,
    pub engine: EngineSection,
}

impl AppConfig {
    /// Load from a specific config file path (for tests).
    pub fn from_path(config_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::build(Some(config_path.as_ref()), true)
    }

    /// Load from the default location if present, then the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Path::new(DEFAULT_CONFIG_PATH);
        if config_path.exists() {
            tracing::info!("loading configuration from {}", config_path.display());
            Self::build(Some(config_path), true)
        } else {
            tracing::debug!(
                "no configuration file at '{DEFAULT_CONFIG_PATH}'; using defaults and environment variables"
            );
            Self::build(None, false)
        }
    }

    fn build(config_path: Option<&Path>, required: bool) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(required));
        }
        // Environment variables override the file, e.g.
        // MICLOCK__LOCK__TARGET_VOLUME=0.65.
        builder = builder.add_source(Environment::with_prefix("MICLOCK").separator("__"));

        let config = builder.build()?;
        let mut app: AppConfig = config.try_deserialize()?;
        app.lock = app.lock.sanitized();
        Ok(app)
    }
}
