//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. See `config/default.toml` for an annotated sample.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::tail::TailSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sliding window configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    /// Time span kept per stream, in log time units (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: f64,
}

/// File change notification configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default = "default_max_frequency_hz")]
    pub max_frequency_hz: f64,

    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,
}

/// Control pipe configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Render cadence configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: u32,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file, in addition to stderr
    #[serde(default)]
    pub file: String,
}

// Default value functions
fn default_window_secs() -> f64 { 2.0 }

fn default_max_frequency_hz() -> f64 { 20.0 }
fn default_rescan_interval_ms() -> u64 { 2000 }

fn default_read_timeout_ms() -> u64 { 1000 }

fn default_refresh_hz() -> u32 { 10 }

fn default_log_level() -> String { "info".to_string() }

impl Default for BufferConfig {
    fn default() -> Self {
        Self { window_secs: default_window_secs() }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_frequency_hz: default_max_frequency_hz(),
            rescan_interval_ms: default_rescan_interval_ms(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { read_timeout_ms: default_read_timeout_ms() }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { refresh_hz: default_refresh_hz() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> MonitorError {
    MonitorError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_monitor::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let window = self.buffer.window_secs;
        if !window.is_finite() || window <= 0.0 || window > 3600.0 {
            return Err(invalid("window_secs must be greater than 0 and at most 3600"));
        }

        let max_frequency = self.notifier.max_frequency_hz;
        if !max_frequency.is_finite() || max_frequency <= 0.0 || max_frequency > 1000.0 {
            return Err(invalid("max_frequency_hz must be greater than 0 and at most 1000"));
        }

        if self.notifier.rescan_interval_ms == 0 || self.notifier.rescan_interval_ms > 60000 {
            return Err(invalid("rescan_interval_ms must be between 1 and 60000"));
        }

        if self.control.read_timeout_ms == 0 || self.control.read_timeout_ms > 60000 {
            return Err(invalid("read_timeout_ms must be between 1 and 60000"));
        }

        if self.render.refresh_hz == 0 || self.render.refresh_hz > 240 {
            return Err(invalid("refresh_hz must be between 1 and 240"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }

    /// Timing for the per-file tail tasks
    pub fn tail_settings(&self) -> TailSettings {
        TailSettings {
            max_frequency: self.notifier.max_frequency_hz,
            rescan_interval: Duration::from_millis(self.notifier.rescan_interval_ms),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.control.read_timeout_ms)
    }
}
