//! Configuration file parsing and structures.
//!
//! fado uses a single TOML file. Everything has a default, so an empty file
//! runs the engine with in-memory storage and no platforms.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

use crate::easing::Easing;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub fade: FadeConfig,

    /// Per-light overrides, keyed by light id
    #[serde(default)]
    pub lights: HashMap<String, LightConfig>,

    #[serde(default)]
    pub integrations: IntegrationsConfig,

    /// HTTP API; disabled when absent
    #[serde(default)]
    pub api: Option<ApiConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"fado::fade" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

fn default_min_step_delay_ms() -> u64 {
    100
}

fn default_transition_s() -> f64 {
    3.0
}

fn default_expectation_retention() -> usize {
    2
}

fn default_min_brightness() -> u8 {
    2
}

/// Engine-wide fade settings
#[derive(Debug, Clone, Deserialize)]
pub struct FadeConfig {
    /// Global floor for the delay between fade steps
    #[serde(default = "default_min_step_delay_ms")]
    pub min_step_delay_ms: u64,

    /// Transition used when a request does not give one
    #[serde(default = "default_transition_s")]
    pub default_transition_s: f64,

    #[serde(default)]
    pub default_easing: Easing,

    /// Where brightness memory is persisted; in memory only when unset
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// How many recently commanded values are remembered per light
    #[serde(default = "default_expectation_retention")]
    pub expectation_retention: usize,
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            min_step_delay_ms: default_min_step_delay_ms(),
            default_transition_s: default_transition_s(),
            default_easing: Easing::default(),
            storage_path: None,
            expectation_retention: default_expectation_retention(),
        }
    }
}

/// Per-light overrides
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LightConfig {
    /// Slowest rate this light can accept commands at. Never below the
    /// global floor.
    #[serde(default)]
    pub min_delay_ms: Option<u64>,

    /// Lowest brightness at which the light actually emits light
    #[serde(default = "default_min_brightness")]
    pub min_brightness: u8,

    /// Let the hardware smooth each step with its own transition
    #[serde(default)]
    pub native_transitions: bool,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: None,
            min_brightness: default_min_brightness(),
            native_transitions: false,
        }
    }
}

/// Platform configuration container
#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    #[cfg(feature = "integration_mqtt")]
    #[serde(default)]
    pub mqtt: Option<crate::integrations::mqtt::MqttConfig>,
}

fn default_api_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8565
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fade.min_step_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "fade.min_step_delay_ms must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=3600.0).contains(&self.fade.default_transition_s) {
            return Err(ConfigError::Validation(format!(
                "fade.default_transition_s must be within 0..=3600, got {}",
                self.fade.default_transition_s
            )));
        }
        if self.fade.expectation_retention == 0 {
            return Err(ConfigError::Validation(
                "fade.expectation_retention must be at least 1".to_string(),
            ));
        }
        for (id, light) in &self.lights {
            if light.min_delay_ms == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "lights.\"{id}\".min_delay_ms must be greater than 0"
                )));
            }
            if light.min_brightness == 0 {
                return Err(ConfigError::Validation(format!(
                    "lights.\"{id}\".min_brightness must be within 1..=255"
                )));
            }
        }
        if let Some(api) = &self.api {
            api.listen.parse::<IpAddr>().map_err(|e| {
                ConfigError::Validation(format!("api.listen {:?} is invalid: {}", api.listen, e))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}
