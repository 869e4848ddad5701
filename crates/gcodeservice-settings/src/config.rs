//! Configuration for GCodeService
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats, selected by file extension.
//!
//! Configuration is organized into logical sections:
//! - Serial link (port, baud rate, read timeout)
//! - Engine behaviour (checksums, queue sizes, reset timing, blocking codes)
//! - Logging (level, output format)

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the directory holding the configuration under the platform config dir
pub const CONFIG_DIR_NAME: &str = "gcodeservice";

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path of the controller UART
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound for a single blocking read in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 115200,
            read_timeout_ms: 100,
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Number and checksum outgoing lines
    pub checksum: bool,
    /// Maximum number of commands awaiting a reply
    pub reply_queue_size: usize,
    /// Re-check interval for unbounded reply waits, in milliseconds
    pub reply_poll_interval_ms: u64,
    /// Delay between a controller reset and the handshake, in milliseconds
    pub reset_settle_ms: u64,
    /// Commands sent after the line-number handshake
    pub handshake: Vec<String>,
    /// Codes awaited before streaming continues
    pub blocking_codes: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            checksum: false,
            reply_queue_size: 8,
            reply_poll_interval_ms: 3000,
            reset_settle_ms: 1500,
            handshake: Vec::new(),
            blocking_codes: ["G27", "G28", "G29", "M109", "M190", "M400"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON records instead of human readable lines
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Serial link
    pub serial: SerialSettings,
    /// Engine behaviour
    pub engine: EngineSettings,
    /// Logging
    pub logging: LoggingSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl ServiceConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match format_of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the file at `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(
                "No configuration at {}, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> SettingsResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.serial.port.trim().is_empty() {
            return Err(SettingsError::invalid("serial.port", "must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(SettingsError::invalid(
                "serial.baud_rate",
                "must be greater than 0",
            ));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "serial.read_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.engine.reply_queue_size == 0 {
            return Err(SettingsError::invalid(
                "engine.reply_queue_size",
                "must be greater than 0",
            ));
        }
        if self.engine.reply_poll_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "engine.reply_poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(SettingsError::invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }
}

/// Default configuration file location, e.g. `~/.config/gcodeservice/config.toml`
pub fn default_config_path() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| {
            SettingsError::ConfigDirectory("no platform configuration directory".to_string())
        })
}
