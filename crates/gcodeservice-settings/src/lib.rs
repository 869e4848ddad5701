//! GCodeService Settings Crate
//!
//! Handles service configuration: serial link, engine tuning and logging.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, EngineSettings, LoggingSettings, SerialSettings, ServiceConfig,
};
pub use error::{SettingsError, SettingsResult};
