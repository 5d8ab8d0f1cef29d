//! Decision point settings.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables such as `SAPL__PDP__DEFAULT_PDP_ID=tenant-a` or
//! `SAPL__ATTRIBUTES__RETRIES=5`.

use std::path::Path;

use config::{Config, Environment, File};
use sapl_compiler::attribute::{
    OPTION_BACKOFF, OPTION_FRESH, OPTION_INITIAL_TIMEOUT, OPTION_POLL_INTERVAL, OPTION_RETRIES,
};
use sapl_core::Value;
use sapl_core::broker::{DEFAULT_BACKOFF, DEFAULT_FRESH, DEFAULT_INITIAL_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_RETRIES};
use serde::{Deserialize, Serialize};

use crate::error::{PdpError, Result};

pub const ENV_PREFIX: &str = "SAPL";
pub const DEFAULT_SETTINGS_FILE: &str = "sapl.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pdp: PdpSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub attributes: AttributeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdpSettings {
    #[serde(default = "default_pdp_id")]
    pub default_pdp_id: String,
    /// Capacity of the per-pdp change notification channel.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    #[serde(default = "default_true")]
    pub keep_old_on_error: bool,
}

impl Default for PdpSettings {
    fn default() -> Self {
        Self {
            default_pdp_id: default_pdp_id(),
            notification_capacity: default_notification_capacity(),
            keep_old_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Global attribute-finder defaults, overridable per finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSettings {
    #[serde(default = "default_initial_timeout_ms")]
    pub initial_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_fresh")]
    pub fresh: bool,
}

impl Default for AttributeSettings {
    fn default() -> Self {
        Self {
            initial_timeout_ms: default_initial_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            backoff_ms: default_backoff_ms(),
            retries: default_retries(),
            fresh: default_fresh(),
        }
    }
}

impl AttributeSettings {
    /// The `attributeFinderOptions` object placed under the `SAPL` variable.
    pub fn to_options_value(&self) -> Value {
        Value::object_from([
            (OPTION_INITIAL_TIMEOUT, Value::number(self.initial_timeout_ms as f64)),
            (OPTION_POLL_INTERVAL, Value::number(self.poll_interval_ms as f64)),
            (OPTION_BACKOFF, Value::number(self.backoff_ms as f64)),
            (OPTION_RETRIES, Value::number(self.retries)),
            (OPTION_FRESH, Value::boolean(self.fresh)),
        ])
    }
}

fn default_pdp_id() -> String {
    "default".to_string()
}

fn default_notification_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_initial_timeout_ms() -> u64 {
    DEFAULT_INITIAL_TIMEOUT.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF.as_millis() as u64
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_fresh() -> bool {
    DEFAULT_FRESH
}

impl Settings {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.pdp.default_pdp_id.trim().is_empty() {
            return Err("pdp.default_pdp_id must not be empty".into());
        }
        if self.pdp.notification_capacity == 0 {
            return Err("pdp.notification_capacity must be > 0".into());
        }
        let level = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&level.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if self.attributes.initial_timeout_ms == 0 {
            return Err("attributes.initial_timeout_ms must be > 0".into());
        }
        if self.attributes.poll_interval_ms == 0 {
            return Err("attributes.poll_interval_ms must be > 0".into());
        }
        Ok(())
    }

    /// Loads `path` (or `sapl.toml` in the working directory when present)
    /// and applies `SAPL__` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(PdpError::configuration(format!(
                        "settings file {} does not exist",
                        path.display()
                    )));
                }
                builder = builder.add_source(File::from(path));
            }
            None => {
                let default_path = Path::new(DEFAULT_SETTINGS_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true).separator("__"));
        let settings: Settings = builder
            .build()
            .map_err(|e| PdpError::configuration(format!("settings build error: {e}")))?
            .try_deserialize()
            .map_err(|e| PdpError::configuration(format!("settings deserialize error: {e}")))?;
        settings.validate().map_err(PdpError::Configuration)?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PdpError::configuration(format!("settings serialize error: {e}")))
    }
}
