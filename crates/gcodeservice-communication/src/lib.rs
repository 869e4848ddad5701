//! # GCodeService Communication
//!
//! Serial transport, the command/reply engine and the service facade.
//! Streams G-code to a Marlin-derived controller with ACK-based flow
//! control, optional line checksums, pause/resume/abort of file streams and
//! controller reset.

pub mod command;
pub mod engine;
pub mod firmware;
pub mod hooks;
pub mod job;
pub mod service;
pub mod transport;

pub use command::{AckGroup, Command, CommandKind, DEFAULT_EXPECTED_REPLY};
pub use engine::{EngineConfig, EngineState, EngineStatus, DEFAULT_BLOCKING_CODES};
pub use job::{GcodeFile, JobInfo, LineAttributes};
pub use service::GcodeService;
pub use transport::{
    list_ports, SerialParams, SerialPortInfo, SerialTransport, Transport, TransportResult,
};
