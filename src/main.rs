use std::path::PathBuf;
use std::sync::Arc;

use gcodeservice::{
    default_config_path, engine_config, init_logging, serial_params, GcodeService,
    SerialTransport, ServiceConfig, ServiceEvent, BUILD_DATE, VERSION,
};

/// Usage: `gcodeservice [CONFIG] [GCODE_FILE]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => default_config_path()?,
    };
    let job = args.next();

    let config = ServiceConfig::load_or_default(&config_path)?;
    init_logging(&config.logging)?;
    tracing::info!("gcodeservice {} (built {})", VERSION, BUILD_DATE);

    let transport = Arc::new(SerialTransport::open(&serial_params(&config.serial))?);
    let service = GcodeService::start(transport, engine_config(&config.engine))?;

    let finished = Arc::new(tokio::sync::Notify::new());
    let on_done = finished.clone();
    service.register_fn(move |event| {
        match &event {
            ServiceEvent::FileDone | ServiceEvent::FileError { .. } => on_done.notify_one(),
            _ => {}
        }
        tracing::info!("event {}: {}", event.name(), event.data());
    });

    let streaming = match &job {
        Some(path) => {
            let queued = service.send_file(path);
            if !queued {
                tracing::warn!("Could not queue {}", path);
            }
            queued
        }
        None => false,
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupted, shutting down");
        }
        _ = service.stopped() => {
            tracing::warn!("Service stopped");
        }
        _ = finished.notified(), if streaming => {
            tracing::info!("Job finished");
        }
    }

    service.stop(false).await;
    Ok(())
}
