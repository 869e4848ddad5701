//! Serial port transport
//!
//! Provides the serial link to the controller board (UART or USB CDC).
//!
//! Supports:
//! - Port enumeration and discovery
//! - Baud rate and read timeout configuration
//! - Concurrent read and write through cloned port handles
//! - Controller reset by pulsing DTR

use super::{Transport, TransportResult};
use gcodeservice_core::TransportError;
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::time::Duration;

/// How long DTR is held low when resetting the controller
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyAMA0", "/dev/ttyACM0")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }
}

/// List serial ports a controller board could be attached to
///
/// Filters to on-board UARTs and USB serial devices:
/// - Linux: /dev/ttyAMA*, /dev/ttyS*, /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
/// - Windows: COM*
pub fn list_ports() -> TransportResult<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        TransportError::Io {
            reason: format!("Failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(|port| match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let mut info = SerialPortInfo::new(
                    &port.port_name,
                    format!(
                        "USB {} {}",
                        usb.manufacturer.as_deref().unwrap_or("Device"),
                        usb.product.as_deref().unwrap_or("Serial Port")
                    ),
                );
                info.manufacturer = usb.manufacturer.clone();
                info.vid = Some(usb.vid);
                info.pid = Some(usb.pid);
                info
            }
            _ => SerialPortInfo::new(&port.port_name, "Serial Port"),
        })
        .collect())
}

fn is_controller_port(port_name: &str) -> bool {
    if let Some(rest) = port_name.strip_prefix("COM") {
        return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit());
    }

    [
        "/dev/ttyAMA",
        "/dev/ttyS",
        "/dev/ttyUSB",
        "/dev/ttyACM",
        "/dev/cu.usbserial-",
        "/dev/cu.usbmodem",
    ]
    .iter()
    .any(|prefix| port_name.starts_with(prefix))
}

/// Parameters for opening a serial transport
#[derive(Debug, Clone)]
pub struct SerialParams {
    /// Device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound for a single blocking read
    pub read_timeout: Duration,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 115200,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Serial port transport using the serialport crate
///
/// Holds two handles to the same device so a blocking read never delays a
/// write.
pub struct SerialTransport {
    name: String,
    reader: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    writer: Mutex<Option<Box<dyn serialport::SerialPort>>>,
}

impl SerialTransport {
    /// Open a serial port with the given parameters and discard stale input
    pub fn open(params: &SerialParams) -> TransportResult<Self> {
        let failed = |reason: String| TransportError::FailedToOpen {
            port: params.port.clone(),
            reason,
        };

        let reader = serialport::new(&params.port, params.baud_rate)
            .timeout(params.read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                failed(e.to_string())
            })?;
        let writer = reader.try_clone().map_err(|e| failed(e.to_string()))?;

        reader
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| failed(e.to_string()))?;

        tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);

        Ok(Self {
            name: params.port.clone(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }
}

fn to_transport_error(err: serialport::Error) -> TransportError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => TransportError::ConnectionLost {
            reason: err.to_string(),
        },
        _ => TransportError::Io {
            reason: err.to_string(),
        },
    }
}

impl Transport for SerialTransport {
    fn read_available(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut guard = self.reader.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;

        // Everything that is there, or wait for one byte
        let waiting = port.bytes_to_read().map_err(to_transport_error)? as usize;
        let want = waiting.clamp(1, buf.len());

        match port.read(&mut buf[..want]) {
            Ok(0) => Err(TransportError::ConnectionLost {
                reason: "end of stream".to_string(),
            }),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, data: &[u8]) -> TransportResult<()> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(data)?;
        Ok(())
    }

    fn flush(&self) -> TransportResult<()> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        port.flush()?;
        Ok(())
    }

    fn reset_buffers(&self) -> TransportResult<()> {
        let guard = self.writer.lock();
        let port = guard.as_ref().ok_or(TransportError::NotOpen)?;
        port.clear(serialport::ClearBuffer::All)
            .map_err(to_transport_error)
    }

    fn reset_controller(&self) -> TransportResult<()> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        let reset_failed = |e: serialport::Error| TransportError::ResetFailed {
            reason: e.to_string(),
        };

        tracing::info!("Resetting controller on {}", self.name);
        port.write_data_terminal_ready(false).map_err(reset_failed)?;
        std::thread::sleep(RESET_PULSE);
        port.write_data_terminal_ready(true).map_err(reset_failed)?;
        Ok(())
    }

    fn close(&self) -> TransportResult<()> {
        let writer = self.writer.lock().take();
        let reader = self.reader.lock().take();
        if writer.is_some() || reader.is_some() {
            tracing::info!("Closed {}", self.name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
