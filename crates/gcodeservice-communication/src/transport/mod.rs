//! Transport layer
//!
//! A duplex byte stream to the firmware. Reads are bounded by the
//! transport's read timeout and return `Ok(0)` when nothing arrived; the
//! receiver relies on this to notice shutdown. Writes are whole-buffer.
//!
//! The sender worker only writes and the receiver worker only reads, so
//! implementations must allow a read and a write to be in progress at the
//! same time.

pub mod serial;

use gcodeservice_core::TransportError;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Line terminator appended to every outgoing line
pub const WRITE_TERMINATOR: &[u8] = b"\r\n";

/// Line terminator splitting the inbound stream
pub const READ_TERMINATOR: u8 = b'\n';

/// Duplex byte stream to the controller
pub trait Transport: Send + Sync {
    /// Read whatever is available, waiting up to the read timeout for at
    /// least one byte. Returns `Ok(0)` on timeout.
    fn read_available(&self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Write the whole buffer
    fn write(&self, data: &[u8]) -> TransportResult<()>;

    /// Flush pending output
    fn flush(&self) -> TransportResult<()>;

    /// Discard anything buffered in either direction
    fn reset_buffers(&self) -> TransportResult<()>;

    /// Physically reset the controller attached to this transport
    fn reset_controller(&self) -> TransportResult<()>;

    /// Close the transport; later reads and writes fail with `NotOpen`
    fn close(&self) -> TransportResult<()>;

    /// Whether the transport is open
    fn is_open(&self) -> bool;

    /// Human-readable name, used in logs
    fn name(&self) -> String;

    /// Write one line followed by the outbound terminator
    fn write_line(&self, line: &str) -> TransportResult<()> {
        let mut data = Vec::with_capacity(line.len() + WRITE_TERMINATOR.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(WRITE_TERMINATOR);
        self.write(&data)
    }
}

pub use serial::{list_ports, SerialParams, SerialPortInfo, SerialTransport};
