//! Application configuration.
//!
//! Loaded from YAML files and `BUSLINE__`-prefixed environment variables.
//! Everything has a default, so an empty configuration is valid.

use std::time::Duration;

use serde::Deserialize;

use crate::bus::BusKind;
use crate::signals::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "busline.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BUSLINE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BUSLINE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BUSLINE_LOG";

/// Default bound for the `wait` overflow mode.
pub const DEFAULT_ENQUEUE_TIMEOUT_MS: u64 = 100;

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bus connection settings.
    pub session: SessionConfig,
    /// Delivery queue settings.
    pub signals: SignalConfig,
    /// Signal subscription for the `busline-listen` binary.
    pub listen: Option<ListenConfig>,
}

/// Which bus to join and under what name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bus: BusKind,
    /// Well-known name to request. Empty is treated as none.
    pub name: Option<String>,
}

impl SessionConfig {
    /// Requested name, if one is set and non-empty.
    pub fn requested_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Full-queue behaviour as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowMode {
    #[default]
    Drop,
    Wait,
    Block,
}

/// Delivery queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Capacity of each per-signal queue.
    pub queue_capacity: usize,
    pub overflow: OverflowMode,
    /// How long `wait` mode holds a signal before dropping it.
    pub enqueue_timeout_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowMode::default(),
            enqueue_timeout_ms: DEFAULT_ENQUEUE_TIMEOUT_MS,
        }
    }
}

impl SignalConfig {
    pub fn overflow_policy(&self) -> OverflowPolicy {
        match self.overflow {
            OverflowMode::Drop => OverflowPolicy::Drop,
            OverflowMode::Wait => {
                OverflowPolicy::Wait(Duration::from_millis(self.enqueue_timeout_ms))
            }
            OverflowMode::Block => OverflowPolicy::Block,
        }
    }
}

/// One signal subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    pub path: String,
    pub sender: String,
    pub interface: String,
    pub member: String,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `busline.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `BUSLINE_CONFIG` environment variable (if set)
    /// 4. Environment variables such as `BUSLINE__SIGNALS__QUEUE_CAPACITY`
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests;
