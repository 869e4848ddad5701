//! Receiver worker
//!
//! Runs on a blocking thread. Reads whatever the transport has, splits it on
//! `\n` and matches each line against the active command.

use super::Shared;
use crate::firmware::{self, FirmwareResponse};
use crate::transport::READ_TERMINATOR;
use gcodeservice_core::{ServiceEvent, TempChannel};
use std::sync::Arc;
use std::time::Instant;

const READ_CHUNK: usize = 1024;

/// Receiver loop; returns once the service stopped and, if requested, the
/// outstanding replies were collected
pub(crate) fn run(shared: Arc<Shared>) {
    tracing::debug!("Receiver started on {}", shared.transport.name());

    let mut buf = [0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();
    let mut drain_deadline: Option<Instant> = None;
    let mut reset_epoch = shared.reset_epoch();

    loop {
        if !shared.is_running() {
            if !shared.wait_for_reply() || !shared.replies.has_outstanding() {
                break;
            }
            let deadline =
                *drain_deadline.get_or_insert_with(|| Instant::now() + shared.config.reply_poll_interval);
            if Instant::now() >= deadline {
                tracing::warn!("Gave up waiting for outstanding replies");
                break;
            }
        }

        let n = match shared.transport.read_available(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                if shared.is_running() {
                    shared.transport_failed(e.to_string());
                }
                break;
            }
        };

        // A line cut off by a controller reset must not prefix the next one
        let epoch = shared.reset_epoch();
        if epoch != reset_epoch {
            reset_epoch = epoch;
            discard_partial(&mut pending);
        }
        if n == 0 {
            continue;
        }

        pending.extend_from_slice(&buf[..n]);
        while let Some(pos) = pending.iter().position(|b| *b == READ_TERMINATOR) {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            handle_line(&shared, line.trim_end_matches(['\r', '\n']));
        }
        if shared.is_resetting() {
            discard_partial(&mut pending);
        }
    }

    shared.replies.release_all();
    tracing::debug!("Receiver stopped");
}

fn discard_partial(pending: &mut Vec<u8>) {
    if !pending.is_empty() {
        tracing::debug!(
            "Discarding partial line across reset: {}",
            String::from_utf8_lossy(pending.as_slice())
        );
        pending.clear();
    }
}

/// Process one inbound line
pub(crate) fn handle_line(shared: &Shared, line: &str) {
    if shared.is_resetting() {
        tracing::trace!("Ignoring line during reset: {}", line);
        return;
    }

    shared.touch();
    tracing::debug!("<< {}", line);

    let Some(response) = firmware::parse(line) else {
        return;
    };

    match &response {
        FirmwareResponse::Error { code, kind } => {
            if firmware::is_fatal(kind) {
                tracing::error!("Firmware reported {}", firmware::format_error(code));
            } else {
                tracing::warn!("Firmware reported {}", firmware::format_error(code));
            }
            shared.trigger(ServiceEvent::FirmwareError {
                code: code.clone(),
                kind: kind.clone(),
            });
        }
        FirmwareResponse::Resend(n) => tracing::debug!("Resend request for line {}", n),
        _ => tracing::trace!("Classified as {}", response),
    }

    let Some(cmd) = shared.replies.current() else {
        tracing::warn!("Unattributed line discarded: {}", line);
        return;
    };

    cmd.push_reply(line);

    if cmd.has_expected_reply(line) {
        if let Some(n) = cmd.resend_request() {
            tracing::warn!("Firmware requested resend from line {}", n);
            shared.rewind_line(n);
            if !cmd.is_protocol_control() {
                cmd.discard_reply();
            }
        }
        shared.acknowledge(cmd.group());
        shared.replies.finish(&cmd);
        cmd.complete();
        return;
    }

    // Intermediate status line
    let FirmwareResponse::Status(tokens) = &response else {
        return;
    };
    let channel = match cmd.code().to_ascii_uppercase().as_str() {
        "M109" => TempChannel::Ext,
        "M190" => TempChannel::All,
        _ => return,
    };
    let reading = firmware::temperatures(tokens);
    if reading.is_empty() {
        return;
    }
    let channel = match channel {
        TempChannel::All if reading.extruder.is_none() => TempChannel::Bed,
        other => other,
    };
    shared.trigger(ServiceEvent::TempChange { channel, reading });
}
