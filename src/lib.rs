//! # GCodeService
//!
//! Command service for serial motion controllers. Streams G-code with one
//! outstanding acknowledgement per line, supports pause, resume, abort and
//! controller reset, and reports progress and firmware events to a single
//! subscriber.
//!
//! ## Architecture
//!
//! 1. **gcodeservice-core** - Error taxonomy, service events, callback dispatcher
//! 2. **gcodeservice-communication** - Serial transport, firmware protocol, engine, facade
//! 3. **gcodeservice-settings** - Configuration file loading and validation
//! 4. **gcodeservice** - Binary that wires configuration, logging and the service together

use std::time::Duration;

pub use gcodeservice_communication::{
    list_ports, EngineConfig, EngineState, EngineStatus, GcodeService, SerialParams,
    SerialPortInfo, SerialTransport, Transport,
};
pub use gcodeservice_core::{Error, EventSubscriber, Result, ServiceEvent};
pub use gcodeservice_settings::{
    default_config_path, EngineSettings, LoggingSettings, SerialSettings, ServiceConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging from the logging settings
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))?;

    if settings.json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Engine configuration from the `[engine]` section
pub fn engine_config(settings: &EngineSettings) -> EngineConfig {
    EngineConfig {
        checksum: settings.checksum,
        reply_queue_size: settings.reply_queue_size,
        reply_poll_interval: Duration::from_millis(settings.reply_poll_interval_ms),
        reset_settle: Duration::from_millis(settings.reset_settle_ms),
        handshake: settings.handshake.clone(),
        blocking_codes: settings
            .blocking_codes
            .iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .collect(),
    }
}

/// Serial parameters from the `[serial]` section
pub fn serial_params(settings: &SerialSettings) -> SerialParams {
    SerialParams {
        port: settings.port.clone(),
        baud_rate: settings.baud_rate,
        read_timeout: Duration::from_millis(settings.read_timeout_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_conversion() {
        let mut settings = EngineSettings::default();
        settings.checksum = true;
        settings.blocking_codes = vec![" m400 ".to_string()];

        let config = engine_config(&settings);
        assert!(config.checksum);
        assert_eq!(config.reply_poll_interval, Duration::from_secs(3));
        assert_eq!(config.reset_settle, Duration::from_millis(1500));
        assert!(config.is_blocking("M400"));
        assert!(!config.is_blocking("G28"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_agree() {
        let config = engine_config(&EngineSettings::default());
        let defaults = EngineConfig::default();
        assert_eq!(config.reply_queue_size, defaults.reply_queue_size);
        assert_eq!(config.blocking_codes, defaults.blocking_codes);

        let params = serial_params(&SerialSettings::default());
        let default_params = SerialParams::default();
        assert_eq!(params.port, default_params.port);
        assert_eq!(params.read_timeout, default_params.read_timeout);
    }

    #[test]
    fn test_config_file_to_runtime_types() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[serial]
port = "/dev/ttyUSB1"
baud_rate = 250000
read_timeout_ms = 50

[engine]
checksum = true
reply_poll_interval_ms = 500
reset_settle_ms = 200
handshake = ["M155 S0", "M302 S0"]
blocking_codes = ["g28", "M109"]
"#,
        )
        .expect("write config");

        let config = ServiceConfig::load(&path).expect("load");

        let params = serial_params(&config.serial);
        assert_eq!(params.port, "/dev/ttyUSB1");
        assert_eq!(params.baud_rate, 250000);
        assert_eq!(params.read_timeout, Duration::from_millis(50));

        let engine = engine_config(&config.engine);
        assert!(engine.checksum);
        assert_eq!(engine.reply_queue_size, 8);
        assert_eq!(engine.reply_poll_interval, Duration::from_millis(500));
        assert_eq!(engine.reset_settle, Duration::from_millis(200));
        assert_eq!(engine.handshake.len(), 2);
        assert_eq!(engine.blocking_codes, vec!["G28", "M109"]);
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "engine": { "reply_queue_size": 0 } }"#).expect("write config");

        assert!(ServiceConfig::load(&path).is_err());
    }
}
