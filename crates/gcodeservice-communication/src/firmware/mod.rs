//! Firmware protocol support
//!
//! The controller speaks a Marlin-derived line protocol:
//! - `ok` acknowledges a command
//! - `ERROR:<code>` reports a machine condition from a fixed table
//! - `Resend:<n>` asks for retransmission from line `n`
//! - status lines carry whitespace-delimited `KEY:value` tokens

pub mod checksum;
pub mod error_decoder;
pub mod response_parser;

pub use checksum::{checksum, frame_line, verify_line};
pub use error_decoder::{decode_error, format_error, is_fatal};
pub use response_parser::{
    parse, parse_error_code, parse_resend, parse_temperatures, parse_tokens, temperatures,
    FirmwareResponse, StatusToken,
};
